//! Login attempt model - append-only record feeding risk scoring and audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Why a login attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    InvalidCredentials,
    AccountDisabled,
    IpBlocked,
    RateLimited,
    TwoFactorInvalid,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::InvalidCredentials => "invalid_credentials",
            FailureReason::AccountDisabled => "account_disabled",
            FailureReason::IpBlocked => "ip_blocked",
            FailureReason::RateLimited => "rate_limited",
            FailureReason::TwoFactorInvalid => "two_factor_invalid",
        }
    }
}

/// Login attempt entity. Never mutated after insert.
#[derive(Debug, Clone, FromRow)]
pub struct LoginAttempt {
    pub attempt_id: Uuid,
    /// Null when the presented email matched no user.
    pub user_id: Option<Uuid>,
    pub email_text: String,
    pub ip_text: String,
    pub success_flag: bool,
    pub failure_reason_code: Option<String>,
    pub risk_score: i32,
    pub risk_factor_codes: Vec<String>,
    pub country_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_utc: DateTime<Utc>,
}

impl LoginAttempt {
    #[allow(clippy::too_many_arguments)]
    pub fn success(
        user_id: Uuid,
        email: &str,
        ip: &str,
        risk_score: i32,
        risk_factor_codes: Vec<String>,
        country_code: Option<String>,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            user_id: Some(user_id),
            email_text: email.to_string(),
            ip_text: ip.to_string(),
            success_flag: true,
            failure_reason_code: None,
            risk_score,
            risk_factor_codes,
            country_code,
            latitude,
            longitude,
            created_utc: Utc::now(),
        }
    }

    pub fn failure(
        user_id: Option<Uuid>,
        email: &str,
        ip: &str,
        reason: FailureReason,
        risk_score: i32,
        risk_factor_codes: Vec<String>,
    ) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            user_id,
            email_text: email.to_string(),
            ip_text: ip.to_string(),
            success_flag: false,
            failure_reason_code: Some(reason.as_str().to_string()),
            risk_score,
            risk_factor_codes,
            country_code: None,
            latitude: None,
            longitude: None,
            created_utc: Utc::now(),
        }
    }
}
