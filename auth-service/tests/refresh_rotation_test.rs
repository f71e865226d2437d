//! Rotation, replay detection and logout over the HTTP surface.

mod common;

use axum::http::StatusCode;
use common::{create_user, device, harness, login, request};

#[tokio::test]
async fn test_refresh_rotates_and_replay_is_rejected() {
    let h = harness().await;
    let user = create_user(&h.store, "user@example.com", "hunter2hunter2").await;
    let (_access, r1) = login(&h, "user@example.com", "hunter2hunter2", "device-1", "203.0.113.1").await;

    // refresh(R1) -> (A2, R2)
    let (status, body) = request(
        &h.router,
        "POST",
        "/auth/refresh",
        "203.0.113.1",
        None,
        Some(serde_json::json!({ "refresh_token": r1, "device": device("device-1") })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let r2 = body["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(r1, r2);

    // A token presented from the wrong device is refused outright
    let (status, _) = request(
        &h.router,
        "POST",
        "/auth/refresh",
        "203.0.113.1",
        None,
        Some(serde_json::json!({ "refresh_token": r2, "device": device("device-9") })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // refresh(R1) again -> replay detected, generic failure to the caller
    let (status, body) = request(
        &h.router,
        "POST",
        "/auth/refresh",
        "203.0.113.1",
        None,
        Some(serde_json::json!({ "refresh_token": r1 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Authentication failed");

    // R2 was revoked along with the rest of the chain
    let (status, _) = request(
        &h.router,
        "POST",
        "/auth/refresh",
        "203.0.113.1",
        None,
        Some(serde_json::json!({ "refresh_token": r2 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Session ended as compromised, critical alert raised
    let sessions = h.store.list_active_sessions(user.user_id).await.unwrap();
    assert!(sessions.is_empty());
    let alerts = h.store.list_alerts_for_user(user.user_id).await.unwrap();
    assert!(alerts
        .iter()
        .any(|a| a.alert_type_code == "token_reuse_detected" && a.severity_code == "critical"));
}

#[tokio::test]
async fn test_unknown_refresh_token_is_unauthorized() {
    let h = harness().await;
    let (status, _) = request(
        &h.router,
        "POST",
        "/auth/refresh",
        "203.0.113.1",
        None,
        Some(serde_json::json!({ "refresh_token": "deadbeef" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_this_device_keeps_other_sessions() {
    let h = harness().await;
    let user = create_user(&h.store, "user@example.com", "hunter2hunter2").await;
    let (access_1, r1) = login(&h, "user@example.com", "hunter2hunter2", "device-1", "203.0.113.1").await;
    let (_access_2, r2) = login(&h, "user@example.com", "hunter2hunter2", "device-2", "203.0.113.2").await;

    let (status, _) = request(
        &h.router,
        "POST",
        "/auth/logout",
        "203.0.113.1",
        Some(&access_1),
        Some(serde_json::json!({ "refresh_token": r1, "scope": "this_device" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Device 1's chain is dead, device 2 still refreshes
    let (status, _) = request(
        &h.router,
        "POST",
        "/auth/refresh",
        "203.0.113.1",
        None,
        Some(serde_json::json!({ "refresh_token": r1 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = request(
        &h.router,
        "POST",
        "/auth/refresh",
        "203.0.113.2",
        None,
        Some(serde_json::json!({ "refresh_token": r2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let sessions = h.store.list_active_sessions(user.user_id).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].device_id_text, "device-2");
}

#[tokio::test]
async fn test_logout_everywhere_revokes_all_chains() {
    let h = harness().await;
    let user = create_user(&h.store, "user@example.com", "hunter2hunter2").await;
    let (access_1, r1) = login(&h, "user@example.com", "hunter2hunter2", "device-1", "203.0.113.1").await;
    let (_access_2, r2) = login(&h, "user@example.com", "hunter2hunter2", "device-2", "203.0.113.2").await;

    let (status, _) = request(
        &h.router,
        "POST",
        "/auth/logout",
        "203.0.113.1",
        Some(&access_1),
        Some(serde_json::json!({ "refresh_token": r1, "scope": "all_devices" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    for token in [r1, r2] {
        let (status, _) = request(
            &h.router,
            "POST",
            "/auth/refresh",
            "203.0.113.1",
            None,
            Some(serde_json::json!({ "refresh_token": token })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    assert!(h
        .store
        .list_active_sessions(user.user_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_password_change_revokes_everything() {
    let h = harness().await;
    let user = create_user(&h.store, "user@example.com", "hunter2hunter2").await;
    let (access, refresh) = login(&h, "user@example.com", "hunter2hunter2", "device-1", "203.0.113.1").await;

    let (status, _) = request(
        &h.router,
        "POST",
        "/users/me/password",
        "203.0.113.1",
        Some(&access),
        Some(serde_json::json!({
            "current_password": "hunter2hunter2",
            "new_password": "even-better-passphrase",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // The old refresh chain is dead
    let (status, _) = request(
        &h.router,
        "POST",
        "/auth/refresh",
        "203.0.113.1",
        None,
        Some(serde_json::json!({ "refresh_token": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // And the new password works
    login(&h, "user@example.com", "even-better-passphrase", "device-1", "203.0.113.1").await;

    let alerts = h.store.list_alerts_for_user(user.user_id).await.unwrap();
    assert!(alerts.iter().any(|a| a.alert_type_code == "password_changed"));
}
