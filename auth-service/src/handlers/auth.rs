use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::auth::{
        IntrospectRequest, IntrospectResponse, LoginRequest, LoginResponse, LogoutRequest,
        RefreshRequest, TwoFactorLoginRequest,
    },
    dtos::ErrorResponse,
    handlers::client_ip,
    services::{LoginOutcome, TokenResponse},
    utils::ValidatedJson,
    AppState,
};

/// Login with email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Tokens issued or 2FA challenge started", body = LoginResponse),
        (status = 401, description = "Authentication failed", body = ErrorResponse),
        (status = 403, description = "IP blocked", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ip = client_ip(&headers);
    let outcome = state
        .auth
        .login(&req.email, &req.password, &req.device, &ip)
        .await?;

    let body = match outcome {
        LoginOutcome::Success(tokens) => LoginResponse::Tokens(tokens),
        LoginOutcome::TwoFactorRequired {
            challenge_token,
            method,
        } => LoginResponse::TwoFactorRequired {
            two_factor_required: true,
            challenge_token,
            method,
        },
    };
    Ok((StatusCode::OK, Json(body)))
}

/// Complete a two-factor challenge
#[utoipa::path(
    post,
    path = "/auth/login/2fa",
    request_body = TwoFactorLoginRequest,
    responses(
        (status = 200, description = "Tokens issued", body = TokenResponse),
        (status = 401, description = "Authentication failed", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login_two_factor(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<TwoFactorLoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ip = client_ip(&headers);
    let tokens = state
        .auth
        .login_two_factor(
            &req.challenge_token,
            req.code.as_deref(),
            req.recovery_code.as_deref(),
            &req.device,
            &ip,
        )
        .await?;
    Ok((StatusCode::OK, Json(tokens)))
}

/// Rotate a refresh token
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token refreshed", body = TokenResponse),
        (status = 401, description = "Invalid, expired or replayed token", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ip = client_ip(&headers);
    let device_id = req.device.as_ref().map(|d| d.device_id.as_str());
    let tokens = state.auth.refresh(&req.refresh_token, device_id, &ip).await?;
    Ok((StatusCode::OK, Json(tokens)))
}

/// Logout this device or everywhere
#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Logged out"),
        (status = 401, description = "Invalid token", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    Json(req): Json<LogoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.auth.logout(&req.refresh_token, req.scope).await?;
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "message": "Logged out successfully" })),
    ))
}

/// Introspect an access token
#[utoipa::path(
    post,
    path = "/auth/introspect",
    request_body = IntrospectRequest,
    responses(
        (status = 200, description = "Token status returned", body = IntrospectResponse)
    ),
    tag = "Authentication"
)]
pub async fn introspect(
    State(state): State<AppState>,
    Json(req): Json<IntrospectRequest>,
) -> impl IntoResponse {
    Json(state.auth.introspect(&req.token))
}
