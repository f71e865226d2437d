//! Two-factor recovery code model - batch-issued, each usable exactly once.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Recovery code entity. Generated in a batch at 2FA enrollment; the
/// plaintext is shown to the user once and only the digest is kept.
#[derive(Debug, Clone, FromRow)]
pub struct TwoFactorBackupCode {
    pub code_id: Uuid,
    pub user_id: Uuid,
    pub code_hash_text: String,
    pub used_utc: Option<DateTime<Utc>>,
    pub used_from_ip_text: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl TwoFactorBackupCode {
    pub fn new(user_id: Uuid, code: &str) -> Self {
        Self {
            code_id: Uuid::new_v4(),
            user_id,
            code_hash_text: Self::hash_code(code),
            used_utc: None,
            used_from_ip_text: None,
            created_utc: Utc::now(),
        }
    }

    pub fn hash_code(code: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(code.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Constant-time check of a presented recovery code.
    pub fn code_matches(&self, presented: &str) -> bool {
        Self::hash_code(presented)
            .as_bytes()
            .ct_eq(self.code_hash_text.as_bytes())
            .into()
    }

    pub fn is_used(&self) -> bool {
        self.used_utc.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_stored_hashed_and_matchable() {
        let code = TwoFactorBackupCode::new(Uuid::new_v4(), "AB12-CD34");

        assert_ne!(code.code_hash_text, "AB12-CD34");
        assert!(code.code_matches("AB12-CD34"));
        assert!(!code.code_matches("AB12-CD35"));
        assert!(!code.is_used());
    }
}
