use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::auth::{ChangePasswordRequest, PasswordResetConfirm, PasswordResetRequest},
    dtos::ErrorResponse,
    middleware::AuthUser,
    utils::ValidatedJson,
    AppState,
};

/// Request a password-reset code by email
#[utoipa::path(
    post,
    path = "/auth/password-reset/request",
    request_body = PasswordResetRequest,
    responses(
        (status = 200, description = "Reset code sent when the account exists"),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn request_password_reset(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<PasswordResetRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.auth.request_password_reset(&req.email).await?;
    // Same answer whether or not the account exists
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "message": "If the account exists, a reset code has been sent."
        })),
    ))
}

/// Confirm a password reset with the emailed code
#[utoipa::path(
    post,
    path = "/auth/password-reset/confirm",
    request_body = PasswordResetConfirm,
    responses(
        (status = 200, description = "Password reset; all sessions revoked"),
        (status = 401, description = "Authentication failed", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn confirm_password_reset(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<PasswordResetConfirm>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth
        .confirm_password_reset(&req.email, &req.code, &req.new_password)
        .await?;
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "message": "Password reset successfully" })),
    ))
}

/// Change the password of the authenticated user
#[utoipa::path(
    post,
    path = "/users/me/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed; all sessions revoked"),
        (status = 401, description = "Authentication failed", body = ErrorResponse)
    ),
    tag = "Account",
    security(("bearer_auth" = []))
)]
pub async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = Uuid::parse_str(&user.0.sub)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid subject: {}", e)))?;
    state
        .auth
        .change_password(user_id, &req.current_password, &req.new_password)
        .await?;
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "message": "Password changed successfully" })),
    ))
}
