use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::auth::{RecoveryCodesResponse, SendOtpRequest, VerifyTwoFactorSetupRequest},
    dtos::ErrorResponse,
    handlers::client_ip,
    middleware::AuthUser,
    models::{OtpPurpose, User},
    services::{AuthError, TotpSetup},
    utils::ValidatedJson,
    AppState,
};

async fn load_user(state: &AppState, sub: &str) -> Result<User, AppError> {
    let user_id = Uuid::parse_str(sub)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid subject: {}", e)))?;
    state
        .store
        .find_user_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found")))
}

/// Begin TOTP enrollment
#[utoipa::path(
    post,
    path = "/auth/2fa/setup",
    responses(
        (status = 200, description = "Provisioning URI returned", body = TotpSetup),
        (status = 409, description = "Already enabled", body = ErrorResponse)
    ),
    tag = "Two-Factor",
    security(("bearer_auth" = []))
)]
pub async fn setup(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let user = load_user(&state, &user.0.sub).await?;
    let setup = state.two_factor.setup_authenticator(&user).await.map_err(AppError::from)?;
    Ok((StatusCode::OK, Json(setup)))
}

/// Complete TOTP enrollment; returns the one-time recovery code batch
#[utoipa::path(
    post,
    path = "/auth/2fa/verify",
    request_body = VerifyTwoFactorSetupRequest,
    responses(
        (status = 200, description = "Two-factor enabled", body = RecoveryCodesResponse),
        (status = 401, description = "Authentication failed", body = ErrorResponse)
    ),
    tag = "Two-Factor",
    security(("bearer_auth" = []))
)]
pub async fn verify_setup(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<VerifyTwoFactorSetupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = load_user(&state, &user.0.sub).await?;
    let recovery_codes = state
        .two_factor
        .verify_setup(&user, &req.code)
        .await
        .map_err(AppError::from)?;
    Ok((StatusCode::OK, Json(RecoveryCodesResponse { recovery_codes })))
}

/// Disable two-factor authentication
#[utoipa::path(
    post,
    path = "/auth/2fa/disable",
    responses(
        (status = 200, description = "Two-factor disabled"),
        (status = 409, description = "Not enabled", body = ErrorResponse)
    ),
    tag = "Two-Factor",
    security(("bearer_auth" = []))
)]
pub async fn disable(
    State(state): State<AppState>,
    headers: HeaderMap,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let ip = client_ip(&headers);
    let user = load_user(&state, &user.0.sub).await?;
    state
        .two_factor
        .disable(&user, &ip)
        .await
        .map_err(AppError::from)?;
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "message": "Two-factor authentication disabled" })),
    ))
}

/// Resend the challenge OTP mid-login
#[utoipa::path(
    post,
    path = "/auth/otp/send",
    request_body = SendOtpRequest,
    responses(
        (status = 200, description = "Code sent"),
        (status = 401, description = "Invalid challenge", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "Two-Factor"
)]
pub async fn send_otp(
    State(state): State<AppState>,
    Json(req): Json<SendOtpRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = state
        .jwt
        .validate_challenge_token(&req.challenge_token)
        .map_err(|_| AppError::from(AuthError::TokenInvalid))?;
    let Some(user) = state.store.find_user_by_id(user_id).await? else {
        return Err(AuthError::TokenInvalid.into());
    };
    state
        .two_factor
        .send_otp(&user, OtpPurpose::TwoFactorAuth)
        .await
        .map_err(AppError::from)?;
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "message": "Verification code sent" })),
    ))
}
