use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::auth::RefreshRequest,
    dtos::ErrorResponse,
    middleware::AuthUser,
    models::{RefreshToken, RevokeReason, SessionEndReason, SessionInfo, UserSession},
    AppState,
};

fn subject_id(user: &AuthUser) -> Result<Uuid, AppError> {
    Uuid::parse_str(&user.0.sub)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid subject: {}", e)))
}

/// List the caller's live sessions
#[utoipa::path(
    get,
    path = "/auth/sessions",
    responses(
        (status = 200, description = "Active sessions", body = [SessionInfo])
    ),
    tag = "Sessions",
    security(("bearer_auth" = []))
)]
pub async fn list_sessions(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let user_id = subject_id(&user)?;
    let sessions = state.sessions.list_active(user_id).await?;
    let views: Vec<SessionInfo> = sessions.into_iter().map(Into::into).collect();
    Ok(Json(views))
}

/// Revoke one of the caller's sessions
#[utoipa::path(
    delete,
    path = "/auth/sessions/{session_id}",
    params(("session_id" = Uuid, Path, description = "Session to revoke")),
    responses(
        (status = 200, description = "Session revoked"),
        (status = 404, description = "No such session", body = ErrorResponse)
    ),
    tag = "Sessions",
    security(("bearer_auth" = []))
)]
pub async fn revoke_session(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = subject_id(&user)?;
    let session: Option<UserSession> = state.store.find_session_by_id(session_id).await?;
    let Some(session) = session.filter(|s| s.user_id == user_id) else {
        return Err(AppError::NotFound(anyhow::anyhow!("No such session")));
    };

    // The session's refresh chain dies with it
    state
        .tokens
        .revoke_chain(session.family_id, RevokeReason::Logout)
        .await?;
    state
        .sessions
        .revoke(session.session_id, SessionEndReason::Revoked)
        .await?;

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "message": "Session revoked" })),
    ))
}

/// Revoke every session except the one backing the presented refresh token
#[utoipa::path(
    post,
    path = "/auth/sessions/revoke-others",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Other sessions revoked"),
        (status = 401, description = "Invalid token", body = ErrorResponse)
    ),
    tag = "Sessions",
    security(("bearer_auth" = []))
)]
pub async fn revoke_other_sessions(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = subject_id(&user)?;

    let hash = RefreshToken::hash_token(&req.refresh_token);
    let current = state
        .store
        .find_refresh_token_by_hash(&hash)
        .await?
        .filter(|t| t.user_id == user_id)
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Invalid token")))?;

    // Kill every other chain before ending its session
    let mut ended = 0;
    for session in state.sessions.list_active(user_id).await? {
        if session.family_id == current.family_id {
            continue;
        }
        state
            .tokens
            .revoke_chain(session.family_id, RevokeReason::Logout)
            .await?;
        if state
            .sessions
            .revoke(session.session_id, SessionEndReason::Revoked)
            .await?
        {
            ended += 1;
        }
    }

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "revoked_sessions": ended })),
    ))
}
