//! Security alert model - notable account-security events for fan-out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Alert categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    TokenReuseDetected,
    NewDeviceLogin,
    IpAutoBlocked,
    RecoveryCodesLow,
    TwoFactorDisabled,
    PasswordChanged,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::TokenReuseDetected => "token_reuse_detected",
            AlertType::NewDeviceLogin => "new_device_login",
            AlertType::IpAutoBlocked => "ip_auto_blocked",
            AlertType::RecoveryCodesLow => "recovery_codes_low",
            AlertType::TwoFactorDisabled => "two_factor_disabled",
            AlertType::PasswordChanged => "password_changed",
        }
    }
}

/// Alert severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

/// Security alert entity. Created by any component on a notable event;
/// mutated only by the acknowledgment workflow.
#[derive(Debug, Clone, FromRow)]
pub struct SecurityAlert {
    pub alert_id: Uuid,
    pub alert_type_code: String,
    pub severity_code: String,
    pub user_id: Option<Uuid>,
    pub ip_text: Option<String>,
    pub device_text: Option<String>,
    pub detail_text: String,
    pub read_flag: bool,
    pub resolved_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl SecurityAlert {
    pub fn new(
        alert_type: AlertType,
        severity: AlertSeverity,
        user_id: Option<Uuid>,
        ip: Option<&str>,
        device: Option<&str>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            alert_type_code: alert_type.as_str().to_string(),
            severity_code: severity.as_str().to_string(),
            user_id,
            ip_text: ip.map(|s| s.to_string()),
            device_text: device.map(|s| s.to_string()),
            detail_text: detail.into(),
            read_flag: false,
            resolved_utc: None,
            created_utc: Utc::now(),
        }
    }

    /// A replayed refresh token means the chain is compromised.
    pub fn token_reuse(user_id: Uuid, ip: Option<&str>, device: &str, family_id: Uuid) -> Self {
        Self::new(
            AlertType::TokenReuseDetected,
            AlertSeverity::Critical,
            Some(user_id),
            ip,
            Some(device),
            format!(
                "Refresh token replayed after rotation; family {} fully revoked",
                family_id
            ),
        )
    }

    pub fn new_device_login(user_id: Uuid, ip: &str, device: &str) -> Self {
        Self::new(
            AlertType::NewDeviceLogin,
            AlertSeverity::Info,
            Some(user_id),
            Some(ip),
            Some(device),
            format!("First login from device {}", device),
        )
    }

    pub fn ip_auto_blocked(ip: &str, reason: &str, permanent: bool) -> Self {
        Self::new(
            AlertType::IpAutoBlocked,
            if permanent {
                AlertSeverity::Critical
            } else {
                AlertSeverity::Warning
            },
            None,
            Some(ip),
            None,
            format!("IP automatically blocked ({})", reason),
        )
    }
}
