//! Refresh token model - rotating one-use tokens chained into families.
//!
//! Each login creates a family root; every refresh marks the presented token
//! used and appends a successor via `replaced_by`. A family therefore has at
//! most one unused, unrevoked token at any time (the chain head). Rows are
//! never deleted: the full chain is retained for audit and reuse detection.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Why a refresh token was revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevokeReason {
    Logout,
    LogoutAll,
    PasswordChange,
    Compromised,
    Admin,
}

impl RevokeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevokeReason::Logout => "logout",
            RevokeReason::LogoutAll => "logout_all",
            RevokeReason::PasswordChange => "password_change",
            RevokeReason::Compromised => "compromised",
            RevokeReason::Admin => "admin",
        }
    }
}

/// Refresh token entity. The opaque value itself is never stored, only its
/// SHA-256 digest.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub token_id: Uuid,
    /// Root token id of the rotation chain this token belongs to.
    pub family_id: Uuid,
    pub user_id: Uuid,
    pub device_id_text: String,
    pub token_hash_text: String,
    pub issued_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub used_utc: Option<DateTime<Utc>>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub revoked_reason_code: Option<String>,
    /// Forward pointer to the successor token, set when this token is used.
    pub replaced_by: Option<Uuid>,
}

impl RefreshToken {
    /// Create the root token of a brand-new chain (no predecessor).
    pub fn new_root(user_id: Uuid, device_id: &str, token: &str, ttl_days: i64) -> Self {
        let token_id = Uuid::new_v4();
        let now = Utc::now();
        Self {
            token_id,
            family_id: token_id,
            user_id,
            device_id_text: device_id.to_string(),
            token_hash_text: Self::hash_token(token),
            issued_utc: now,
            expiry_utc: now + Duration::days(ttl_days),
            used_utc: None,
            revoked_utc: None,
            revoked_reason_code: None,
            replaced_by: None,
        }
    }

    /// Create the successor of this token within the same family.
    pub fn successor(&self, token: &str, ttl_days: i64) -> Self {
        let now = Utc::now();
        Self {
            token_id: Uuid::new_v4(),
            family_id: self.family_id,
            user_id: self.user_id,
            device_id_text: self.device_id_text.clone(),
            token_hash_text: Self::hash_token(token),
            issued_utc: now,
            expiry_utc: now + Duration::days(ttl_days),
            used_utc: None,
            revoked_utc: None,
            revoked_reason_code: None,
            replaced_by: None,
        }
    }

    /// SHA-256 digest of an opaque token value, hex-encoded.
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Constant-time comparison of a presented token against the stored
    /// digest. Security invariant: never compare token material with `==`.
    pub fn hash_matches(&self, presented: &str) -> bool {
        let presented_hash = Self::hash_token(presented);
        presented_hash
            .as_bytes()
            .ct_eq(self.token_hash_text.as_bytes())
            .into()
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expiry_utc
    }

    pub fn is_used(&self) -> bool {
        self.used_utc.is_some()
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_utc.is_some()
    }

    /// A token is the live chain head iff it is unused, unrevoked and unexpired.
    pub fn is_active(&self) -> bool {
        !self.is_used() && !self.is_revoked() && !self.is_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_token_starts_its_own_family() {
        let token = RefreshToken::new_root(Uuid::new_v4(), "device-1", "opaque", 30);

        assert_eq!(token.family_id, token.token_id);
        assert!(token.is_active());
        assert!(token.replaced_by.is_none());
    }

    #[test]
    fn test_successor_inherits_family_and_device() {
        let root = RefreshToken::new_root(Uuid::new_v4(), "device-1", "first", 30);
        let next = root.successor("second", 30);

        assert_eq!(next.family_id, root.family_id);
        assert_ne!(next.token_id, root.token_id);
        assert_eq!(next.device_id_text, root.device_id_text);
        assert!(next.is_active());
    }

    #[test]
    fn test_hash_matches_only_original_value() {
        let token = RefreshToken::new_root(Uuid::new_v4(), "device-1", "opaque-value", 30);

        assert!(token.hash_matches("opaque-value"));
        assert!(!token.hash_matches("opaque-valuf"));
        assert_ne!(token.token_hash_text, "opaque-value");
    }

    #[test]
    fn test_expiry_makes_token_inactive() {
        let mut token = RefreshToken::new_root(Uuid::new_v4(), "device-1", "opaque", 30);
        assert!(!token.is_expired());

        token.expiry_utc = Utc::now() - Duration::seconds(1);
        assert!(token.is_expired());
        assert!(!token.is_active());
    }
}
