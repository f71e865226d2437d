use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use service_core::error::AppError;

use crate::{
    dtos::admin::{BlockIpRequest, BlockedIpView},
    dtos::ErrorResponse,
    models::BlockReason,
    utils::ValidatedJson,
    AppState,
};

/// List all IP block entries, including lapsed and unblocked ones
#[utoipa::path(
    get,
    path = "/auth/admin/ip-blocks",
    responses(
        (status = 200, description = "Block list", body = [BlockedIpView]),
        (status = 401, description = "Invalid admin credentials", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_api_key" = []))
)]
pub async fn list_blocked_ips(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let entries = state.ip_blocks.list().await?;
    let views: Vec<BlockedIpView> = entries.into_iter().map(Into::into).collect();
    Ok(Json(views))
}

#[derive(Debug, Deserialize)]
pub struct ActorParams {
    pub actor: String,
}

/// Manually block an IP
#[utoipa::path(
    post,
    path = "/auth/admin/ip-blocks",
    request_body = BlockIpRequest,
    params(("actor" = String, Query, description = "Admin actor id for the audit trail")),
    responses(
        (status = 200, description = "IP blocked", body = BlockedIpView),
        (status = 401, description = "Invalid admin credentials", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_api_key" = []))
)]
pub async fn block_ip(
    State(state): State<AppState>,
    Query(params): Query<ActorParams>,
    ValidatedJson(req): ValidatedJson<BlockIpRequest>,
) -> Result<impl IntoResponse, AppError> {
    let duration = req.duration_minutes.map(chrono::Duration::minutes);
    let entry = state
        .ip_blocks
        .block_ip(&req.ip, BlockReason::Manual, duration, Some(&params.actor))
        .await?;
    Ok((StatusCode::OK, Json(BlockedIpView::from(entry))))
}

/// Lift an IP block
#[utoipa::path(
    delete,
    path = "/auth/admin/ip-blocks/{ip}",
    params(
        ("ip" = String, Path, description = "IP to unblock"),
        ("actor" = String, Query, description = "Admin actor id for the audit trail")
    ),
    responses(
        (status = 200, description = "IP unblocked"),
        (status = 404, description = "No active block for this IP", body = ErrorResponse),
        (status = 401, description = "Invalid admin credentials", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_api_key" = []))
)]
pub async fn unblock_ip(
    State(state): State<AppState>,
    Path(ip): Path<String>,
    Query(params): Query<ActorParams>,
) -> Result<impl IntoResponse, AppError> {
    if !state.ip_blocks.unblock_ip(&ip, &params.actor).await? {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "No active block for this IP"
        )));
    }
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "message": "IP unblocked" })),
    ))
}
