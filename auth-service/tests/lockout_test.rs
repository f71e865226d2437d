//! Rate limiting, automatic IP blocking and admin unblock over the HTTP
//! surface.

mod common;

use auth_service::services::StaticGeoProvider;
use axum::http::StatusCode;
use common::{admin_request, create_user, device, harness, harness_with, request, ADMIN_API_KEY};

async fn attempt_login(
    h: &common::TestHarness,
    email: &str,
    password: &str,
    ip: &str,
) -> StatusCode {
    let (status, _) = request(
        &h.router,
        "POST",
        "/auth/login",
        ip,
        None,
        Some(serde_json::json!({
            "email": email,
            "password": password,
            "device": device("device-1"),
        })),
    )
    .await;
    status
}

#[tokio::test]
async fn test_sixth_login_attempt_is_rate_limited() {
    let h = harness().await;
    create_user(&h.store, "user@example.com", "hunter2hunter2").await;
    let ip = "203.0.113.20";

    // Budget of 5 per window
    for _ in 0..5 {
        assert_eq!(
            attempt_login(&h, "user@example.com", "wrong-password", ip).await,
            StatusCode::UNAUTHORIZED
        );
    }

    // The sixth attempt is refused before the credential check: even the
    // right password earns a 429 now
    assert_eq!(
        attempt_login(&h, "user@example.com", "hunter2hunter2", ip).await,
        StatusCode::TOO_MANY_REQUESTS
    );

    // A different IP keeps its own budget
    assert_eq!(
        attempt_login(&h, "user@example.com", "hunter2hunter2", "203.0.113.21").await,
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_failed_login_density_earns_auto_block() {
    // Per-action rate limit widened so the test reaches the block threshold
    let h = harness_with(StaticGeoProvider::new(), |c| {
        c.rate_limit.login_attempts = 100;
    })
    .await;
    create_user(&h.store, "user@example.com", "hunter2hunter2").await;
    let ip = "203.0.113.30";

    for _ in 0..14 {
        assert_eq!(
            attempt_login(&h, "user@example.com", "wrong-password", ip).await,
            StatusCode::UNAUTHORIZED
        );
    }
    assert!(!h.state.ip_blocks.is_blocked(ip).await.unwrap());

    // Failure 15 trips the block
    assert_eq!(
        attempt_login(&h, "user@example.com", "wrong-password", ip).await,
        StatusCode::UNAUTHORIZED
    );
    assert!(h.state.ip_blocks.is_blocked(ip).await.unwrap());

    // From now on the IP gate rejects before anything else
    assert_eq!(
        attempt_login(&h, "user@example.com", "hunter2hunter2", ip).await,
        StatusCode::FORBIDDEN
    );

    // Manual unblock immediately restores access
    let (status, _) = admin_request(
        &h.router,
        "DELETE",
        &format!("/auth/admin/ip-blocks/{}?actor=secops", ip),
        ADMIN_API_KEY,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        attempt_login(&h, "user@example.com", "hunter2hunter2", ip).await,
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_admin_block_list_and_manual_block() {
    let h = harness().await;
    create_user(&h.store, "user@example.com", "hunter2hunter2").await;

    let (status, body) = admin_request(
        &h.router,
        "POST",
        "/auth/admin/ip-blocks?actor=secops",
        ADMIN_API_KEY,
        Some(serde_json::json!({ "ip": "198.51.100.40", "duration_minutes": 60 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], true);
    assert_eq!(body["blocked_by"], "secops");

    assert_eq!(
        attempt_login(&h, "user@example.com", "hunter2hunter2", "198.51.100.40").await,
        StatusCode::FORBIDDEN
    );

    let (status, body) = admin_request(
        &h.router,
        "GET",
        "/auth/admin/ip-blocks",
        ADMIN_API_KEY,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert!(entries.iter().any(|e| e["ip"] == "198.51.100.40"));
}

#[tokio::test]
async fn test_admin_surface_rejects_bad_key() {
    let h = harness().await;
    let (status, _) = admin_request(
        &h.router,
        "GET",
        "/auth/admin/ip-blocks",
        "not-the-key",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unblocking_an_unblocked_ip_is_not_found() {
    let h = harness().await;
    let (status, _) = admin_request(
        &h.router,
        "DELETE",
        "/auth/admin/ip-blocks/198.51.100.99?actor=secops",
        ADMIN_API_KEY,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
