use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use subtle::ConstantTimeEq;

use crate::AppState;

pub const ADMIN_API_KEY_HEADER: &str = "x-admin-api-key";

/// Gate for the IP-block management surface: a static admin API key,
/// compared in constant time.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let presented = req
        .headers()
        .get(ADMIN_API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let expected = state.config.security.admin_api_key.as_bytes();
    let authorized: bool = presented.as_bytes().ct_eq(expected).into();

    if !authorized || expected.is_empty() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "Invalid admin credentials" })),
        )
            .into_response();
    }

    next.run(req).await
}
