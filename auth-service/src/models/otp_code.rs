//! OTP code model - one-time password verification.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// OTP purpose codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    TwoFactorAuth,
    PasswordReset,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::TwoFactorAuth => "two_factor_auth",
            OtpPurpose::PasswordReset => "password_reset",
        }
    }
}

/// Delivery channel for an OTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpChannel {
    Email,
    Sms,
}

impl OtpChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpChannel::Email => "email",
            OtpChannel::Sms => "sms",
        }
    }
}

/// OTP code entity. One-shot: consumed on first valid use, or dead once
/// `attempt_count` exceeds `attempt_max` regardless of later guesses.
#[derive(Debug, Clone, FromRow)]
pub struct OtpCode {
    pub otp_id: Uuid,
    pub user_id: Uuid,
    pub purpose_code: String,
    pub channel_code: String,
    pub destination_text: String,
    pub code_hash_text: String,
    pub expiry_utc: DateTime<Utc>,
    pub consumed_utc: Option<DateTime<Utc>>,
    pub attempt_count: i32,
    pub attempt_max: i32,
    pub created_utc: DateTime<Utc>,
}

impl OtpCode {
    pub fn new(
        user_id: Uuid,
        purpose: OtpPurpose,
        channel: OtpChannel,
        destination: &str,
        code: &str,
        ttl: Duration,
        attempt_max: i32,
    ) -> Self {
        Self {
            otp_id: Uuid::new_v4(),
            user_id,
            purpose_code: purpose.as_str().to_string(),
            channel_code: channel.as_str().to_string(),
            destination_text: destination.to_string(),
            code_hash_text: Self::hash_code(code),
            expiry_utc: Utc::now() + ttl,
            consumed_utc: None,
            attempt_count: 0,
            attempt_max,
            created_utc: Utc::now(),
        }
    }

    pub fn hash_code(code: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(code.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Constant-time check of a presented code.
    pub fn code_matches(&self, presented: &str) -> bool {
        Self::hash_code(presented)
            .as_bytes()
            .ct_eq(self.code_hash_text.as_bytes())
            .into()
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_utc.is_some()
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expiry_utc
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempt_count > self.attempt_max
    }

    pub fn is_pending(&self) -> bool {
        !self.is_consumed() && !self.is_expired() && !self.attempts_exhausted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn otp() -> OtpCode {
        OtpCode::new(
            Uuid::new_v4(),
            OtpPurpose::TwoFactorAuth,
            OtpChannel::Email,
            "user@example.com",
            "482913",
            Duration::minutes(10),
            5,
        )
    }

    #[test]
    fn test_code_is_stored_hashed() {
        let otp = otp();
        assert_ne!(otp.code_hash_text, "482913");
        assert!(otp.code_matches("482913"));
        assert!(!otp.code_matches("482914"));
    }

    #[test]
    fn test_fresh_otp_is_pending() {
        let otp = otp();
        assert!(otp.is_pending());
    }

    #[test]
    fn test_exhausted_attempts_invalidate_code() {
        let mut otp = otp();
        otp.attempt_count = otp.attempt_max + 1;

        // Dead even though the code itself would still match
        assert!(otp.attempts_exhausted());
        assert!(!otp.is_pending());
        assert!(otp.code_matches("482913"));
    }

    #[test]
    fn test_expired_otp_is_not_pending() {
        let mut otp = otp();
        otp.expiry_utc = Utc::now() - Duration::seconds(1);
        assert!(!otp.is_pending());
    }
}
