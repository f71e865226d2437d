pub mod admin;
pub mod alerts;
pub mod auth;
pub mod password;
pub mod sessions;
pub mod two_factor;
pub mod user;

use axum::http::HeaderMap;

/// Caller IP for gating and audit: first x-forwarded-for hop, then
/// x-real-ip. Behind the gateway one of the two is always present.
pub(crate) fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}
