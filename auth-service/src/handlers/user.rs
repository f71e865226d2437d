use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{dtos::ErrorResponse, middleware::AuthUser, models::SanitizedUser, AppState};

/// Profile of the authenticated user
#[utoipa::path(
    get,
    path = "/users/me",
    responses(
        (status = 200, description = "Current user", body = SanitizedUser),
        (status = 401, description = "Invalid token", body = ErrorResponse)
    ),
    tag = "Account",
    security(("bearer_auth" = []))
)]
pub async fn get_me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let user_id = Uuid::parse_str(&user.0.sub)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid subject: {}", e)))?;
    let user = state
        .store
        .find_user_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found")))?;
    Ok(Json(SanitizedUser::from(user)))
}
