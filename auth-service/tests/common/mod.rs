//! Shared harness for the integration tests: the full router wired over
//! in-memory doubles (store, counters, email, SMS, geo lookup).

#![allow(dead_code)]

use auth_service::{
    build_router, build_state,
    config::{
        AuthConfig, AutoBlockConfig, DatabaseConfig, Environment, JwtConfig, RateLimitConfig,
        RedisConfig, SecurityConfig, SessionConfig, SmtpConfig, TwoFactorSettings,
    },
    models::User,
    services::{AuthStore, MemoryCounter, MemoryStore, MockEmailService, MockSmsService,
        StaticGeoProvider},
    utils::{hash_password, Password},
    AppState,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tower::util::ServiceExt;

pub const TEST_PRIVATE_KEY: &str = include_str!("../fixtures/jwt_test_key.pem");
pub const TEST_PUBLIC_KEY: &str = include_str!("../fixtures/jwt_test_key_pub.pem");

pub const ADMIN_API_KEY: &str = "test-admin-key";

pub struct TestHarness {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<dyn AuthStore>,
    pub email: Arc<MockEmailService>,
    pub sms: Arc<MockSmsService>,
    _key_files: (NamedTempFile, NamedTempFile),
}

fn write_key_files() -> (NamedTempFile, NamedTempFile) {
    let mut private_file = NamedTempFile::new().unwrap();
    private_file.write_all(TEST_PRIVATE_KEY.as_bytes()).unwrap();
    let mut public_file = NamedTempFile::new().unwrap();
    public_file.write_all(TEST_PUBLIC_KEY.as_bytes()).unwrap();
    (private_file, public_file)
}

fn test_config(private_key_path: String, public_key_path: String) -> AuthConfig {
    AuthConfig {
        common: service_core::config::Config { port: 8080 },
        environment: Environment::Dev,
        service_name: "auth-service".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
        },
        redis: RedisConfig {
            url: "redis://unused".to_string(),
        },
        jwt: JwtConfig {
            private_key_path,
            public_key_path,
            access_token_expiry_minutes: 15,
            challenge_token_expiry_minutes: 5,
        },
        refresh_token_expiry_days: 30,
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 587,
            user: String::new(),
            password: String::new(),
            from: "no-reply@localhost".to_string(),
        },
        sms_webhook_url: None,
        geo_provider_url: None,
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            admin_api_key: ADMIN_API_KEY.to_string(),
        },
        rate_limit: RateLimitConfig {
            login_attempts: 5,
            login_window_seconds: 900,
            otp_send_attempts: 3,
            otp_send_window_seconds: 600,
            otp_verify_attempts: 5,
            otp_verify_window_seconds: 600,
            global_ip_limit: 10_000,
            global_ip_window_seconds: 60,
        },
        session: SessionConfig {
            idle_timeout_minutes: 30,
            absolute_timeout_hours: 24,
            max_concurrent_sessions: 5,
            single_session_per_device: true,
        },
        auto_block: AutoBlockConfig {
            failed_threshold: 15,
            window_seconds: 600,
        },
        two_factor: TwoFactorSettings {
            issuer: "auth-service".to_string(),
            otp_ttl_minutes: 10,
            otp_max_attempts: 5,
            recovery_code_count: 10,
            recovery_warn_threshold: 2,
        },
    }
}

/// Build a harness with default policy and a customization hook.
pub async fn harness_with(
    geo: StaticGeoProvider,
    tweak: impl FnOnce(&mut AuthConfig),
) -> TestHarness {
    let key_files = write_key_files();
    let mut config = test_config(
        key_files.0.path().to_str().unwrap().to_string(),
        key_files.1.path().to_str().unwrap().to_string(),
    );
    tweak(&mut config);

    let store: Arc<dyn AuthStore> = Arc::new(MemoryStore::new());
    let email = Arc::new(MockEmailService::new());
    let sms = Arc::new(MockSmsService::new());

    let state = build_state(
        config,
        store.clone(),
        Arc::new(MemoryCounter::new()),
        email.clone(),
        sms.clone(),
        Arc::new(geo),
    )
    .expect("Failed to build state");

    let router = build_router(state.clone())
        .await
        .expect("Failed to build router");

    TestHarness {
        router,
        state,
        store,
        email,
        sms,
        _key_files: key_files,
    }
}

pub async fn harness() -> TestHarness {
    harness_with(StaticGeoProvider::new(), |_| {}).await
}

/// Seed a user with a real Argon2 hash.
pub async fn create_user(store: &Arc<dyn AuthStore>, email: &str, password: &str) -> User {
    let hash = hash_password(&Password::new(password.to_string())).unwrap();
    let user = User::new(email.to_string(), hash.into_string(), None);
    store.insert_user(&user).await.unwrap();
    user
}

/// One-shot JSON request against the router; returns status + parsed body.
pub async fn request(
    router: &Router,
    method: &str,
    path: &str,
    ip: &str,
    bearer: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header("x-forwarded-for", ip)
        .header("content-type", "application/json");
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }

    let request = builder
        .body(match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

/// One-shot request against the admin surface, authenticated by API key.
pub async fn admin_request(
    router: &Router,
    method: &str,
    path: &str,
    api_key: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method(method)
        .uri(path)
        .header("x-forwarded-for", "192.0.2.1")
        .header("x-admin-api-key", api_key)
        .header("content-type", "application/json")
        .body(match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

/// Standard device payload used across tests.
pub fn device(id: &str) -> serde_json::Value {
    serde_json::json!({ "device_id": id, "device_name": "Test Device" })
}

/// Login and return (access_token, refresh_token) for a user without 2FA.
pub async fn login(
    harness: &TestHarness,
    email: &str,
    password: &str,
    device_id: &str,
    ip: &str,
) -> (String, String) {
    let (status, body) = request(
        &harness.router,
        "POST",
        "/auth/login",
        ip,
        None,
        Some(serde_json::json!({
            "email": email,
            "password": password,
            "device": device(device_id),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {}", body);
    (
        body["access_token"].as_str().unwrap().to_string(),
        body["refresh_token"].as_str().unwrap().to_string(),
    )
}
