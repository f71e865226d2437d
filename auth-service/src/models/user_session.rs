//! User session model - one logical session per refresh-token family.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    Logout,
    LogoutAll,
    Superseded,
    Compromised,
    Revoked,
    Evicted,
}

impl SessionEndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEndReason::Logout => "logout",
            SessionEndReason::LogoutAll => "logout_all",
            SessionEndReason::Superseded => "superseded",
            SessionEndReason::Compromised => "compromised",
            SessionEndReason::Revoked => "revoked",
            SessionEndReason::Evicted => "evicted",
        }
    }
}

/// Session entity. Lives exactly as long as its refresh-token family.
#[derive(Debug, Clone, FromRow)]
pub struct UserSession {
    pub session_id: Uuid,
    pub user_id: Uuid,
    /// Refresh-token family backing this session (1:1).
    pub family_id: Uuid,
    pub device_id_text: String,
    pub device_name_text: Option<String>,
    pub ip_text: String,
    pub country_code: Option<String>,
    pub active_flag: bool,
    pub created_utc: DateTime<Utc>,
    pub last_activity_utc: DateTime<Utc>,
    /// Absolute expiry; wins over recent activity.
    pub expiry_utc: DateTime<Utc>,
    pub ended_utc: Option<DateTime<Utc>>,
    pub end_reason_code: Option<String>,
}

impl UserSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: Uuid,
        family_id: Uuid,
        device_id: &str,
        device_name: Option<String>,
        ip: &str,
        country_code: Option<String>,
        absolute_timeout: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            family_id,
            device_id_text: device_id.to_string(),
            device_name_text: device_name,
            ip_text: ip.to_string(),
            country_code,
            active_flag: true,
            created_utc: now,
            last_activity_utc: now,
            expiry_utc: now + absolute_timeout,
            ended_utc: None,
            end_reason_code: None,
        }
    }

    /// Expired when past the absolute deadline, or idle for longer than
    /// `idle_timeout`. The absolute deadline wins even with recent activity.
    pub fn is_expired(&self, idle_timeout: Duration) -> bool {
        let now = Utc::now();
        if now >= self.expiry_utc {
            return true;
        }
        now - self.last_activity_utc >= idle_timeout
    }

    pub fn is_live(&self, idle_timeout: Duration) -> bool {
        self.active_flag && self.ended_utc.is_none() && !self.is_expired(idle_timeout)
    }
}

/// Session info for API responses.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub device_id: String,
    pub device_name: Option<String>,
    pub ip: String,
    pub country_code: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub last_activity_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
}

impl From<UserSession> for SessionInfo {
    fn from(s: UserSession) -> Self {
        Self {
            session_id: s.session_id,
            device_id: s.device_id_text,
            device_name: s.device_name_text,
            ip: s.ip_text,
            country_code: s.country_code,
            created_utc: s.created_utc,
            last_activity_utc: s.last_activity_utc,
            expiry_utc: s.expiry_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> UserSession {
        UserSession::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "device-1",
            None,
            "203.0.113.9",
            None,
            Duration::hours(24),
        )
    }

    #[test]
    fn test_fresh_session_is_live() {
        let s = session();
        assert!(s.is_live(Duration::minutes(30)));
        assert!(!s.is_expired(Duration::minutes(30)));
    }

    #[test]
    fn test_idle_timeout_expires_session() {
        let mut s = session();
        s.last_activity_utc = Utc::now() - Duration::minutes(31);

        assert!(s.is_expired(Duration::minutes(30)));
    }

    #[test]
    fn test_absolute_timeout_wins_over_recent_activity() {
        let mut s = session();
        s.expiry_utc = Utc::now() - Duration::seconds(1);
        s.last_activity_utc = Utc::now();

        assert!(s.is_expired(Duration::minutes(30)));
    }
}
