//! User model - credential material and two-factor enrollment state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Two-factor enrollment state machine: `Disabled -> PendingSetup -> Enabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorState {
    Disabled,
    PendingSetup,
    Enabled,
}

impl TwoFactorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TwoFactorState::Disabled => "disabled",
            TwoFactorState::PendingSetup => "pending_setup",
            TwoFactorState::Enabled => "enabled",
        }
    }

    pub fn parse(code: &str) -> Self {
        match code {
            "pending_setup" => TwoFactorState::PendingSetup,
            "enabled" => TwoFactorState::Enabled,
            _ => TwoFactorState::Disabled,
        }
    }
}

/// Configured second-factor delivery method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorMethod {
    Totp,
    Email,
    Sms,
}

impl TwoFactorMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TwoFactorMethod::Totp => "totp",
            TwoFactorMethod::Email => "email",
            TwoFactorMethod::Sms => "sms",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "totp" => Some(TwoFactorMethod::Totp),
            "email" => Some(TwoFactorMethod::Email),
            "sms" => Some(TwoFactorMethod::Sms),
            _ => None,
        }
    }
}

/// User entity.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub display_name: Option<String>,
    pub roles: Vec<String>,
    pub enabled_flag: bool,
    pub two_factor_state_code: String,
    pub two_factor_method_code: Option<String>,
    pub totp_secret_text: Option<String>,
    pub pending_totp_secret_text: Option<String>,
    pub phone_text: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl User {
    /// Create a new user with default role and 2FA disabled.
    pub fn new(email: String, password_hash: String, display_name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: Uuid::new_v4(),
            email,
            password_hash,
            display_name,
            roles: vec!["user".to_string()],
            enabled_flag: true,
            two_factor_state_code: TwoFactorState::Disabled.as_str().to_string(),
            two_factor_method_code: None,
            totp_secret_text: None,
            pending_totp_secret_text: None,
            phone_text: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn two_factor_state(&self) -> TwoFactorState {
        TwoFactorState::parse(&self.two_factor_state_code)
    }

    pub fn two_factor_enabled(&self) -> bool {
        self.two_factor_state() == TwoFactorState::Enabled
    }

    pub fn two_factor_method(&self) -> Option<TwoFactorMethod> {
        self.two_factor_method_code
            .as_deref()
            .and_then(TwoFactorMethod::parse)
    }
}

/// User representation safe to return to clients (no credential material).
#[derive(Debug, Serialize, ToSchema)]
pub struct SanitizedUser {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub roles: Vec<String>,
    pub two_factor_enabled: bool,
    pub created_utc: DateTime<Utc>,
}

impl From<User> for SanitizedUser {
    fn from(user: User) -> Self {
        let two_factor_enabled = user.two_factor_enabled();
        Self {
            user_id: user.user_id,
            email: user.email,
            display_name: user.display_name,
            roles: user.roles,
            two_factor_enabled,
            created_utc: user.created_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_defaults() {
        let user = User::new("a@example.com".to_string(), "hash".to_string(), None);

        assert_eq!(user.two_factor_state(), TwoFactorState::Disabled);
        assert!(!user.two_factor_enabled());
        assert!(user.enabled_flag);
        assert_eq!(user.roles, vec!["user".to_string()]);
    }

    #[test]
    fn test_two_factor_state_round_trip() {
        for state in [
            TwoFactorState::Disabled,
            TwoFactorState::PendingSetup,
            TwoFactorState::Enabled,
        ] {
            assert_eq!(TwoFactorState::parse(state.as_str()), state);
        }
        // Unknown codes fall back to disabled
        assert_eq!(TwoFactorState::parse("bogus"), TwoFactorState::Disabled);
    }
}
