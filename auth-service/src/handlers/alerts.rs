use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use service_core::error::AppError;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{dtos::ErrorResponse, middleware::AuthUser, models::SecurityAlert, AppState};

#[derive(Debug, Serialize, ToSchema)]
pub struct AlertView {
    pub alert_id: Uuid,
    pub alert_type: String,
    pub severity: String,
    pub ip: Option<String>,
    pub device: Option<String>,
    pub detail: String,
    pub read: bool,
    pub created_utc: chrono::DateTime<chrono::Utc>,
}

impl From<SecurityAlert> for AlertView {
    fn from(alert: SecurityAlert) -> Self {
        Self {
            alert_id: alert.alert_id,
            alert_type: alert.alert_type_code,
            severity: alert.severity_code,
            ip: alert.ip_text,
            device: alert.device_text,
            detail: alert.detail_text,
            read: alert.read_flag,
            created_utc: alert.created_utc,
        }
    }
}

/// List the caller's security alerts, newest first
#[utoipa::path(
    get,
    path = "/auth/alerts",
    responses(
        (status = 200, description = "Security alerts", body = [AlertView])
    ),
    tag = "Alerts",
    security(("bearer_auth" = []))
)]
pub async fn list_alerts(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let user_id = Uuid::parse_str(&user.0.sub)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid subject: {}", e)))?;
    let alerts = state.alerts.list_for_user(user_id).await?;
    let views: Vec<AlertView> = alerts.into_iter().map(Into::into).collect();
    Ok(Json(views))
}

/// Acknowledge an alert
#[utoipa::path(
    post,
    path = "/auth/alerts/{alert_id}/read",
    params(("alert_id" = Uuid, Path, description = "Alert to acknowledge")),
    responses(
        (status = 200, description = "Alert acknowledged"),
        (status = 404, description = "No such alert", body = ErrorResponse)
    ),
    tag = "Alerts",
    security(("bearer_auth" = []))
)]
pub async fn mark_alert_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(alert_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = Uuid::parse_str(&user.0.sub)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid subject: {}", e)))?;

    // Only the alert's owner may acknowledge it
    let owned = state
        .alerts
        .list_for_user(user_id)
        .await?
        .iter()
        .any(|a| a.alert_id == alert_id);
    if !owned {
        return Err(AppError::NotFound(anyhow::anyhow!("No such alert")));
    }

    state.alerts.mark_read(alert_id).await?;
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "message": "Alert acknowledged" })),
    ))
}
