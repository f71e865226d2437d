//! Two-factor authentication: TOTP enrollment and validation, email/SMS
//! one-time codes, and single-use recovery codes.

use rand::Rng;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use totp_rs::{Algorithm, Secret, TOTP};
use utoipa::ToSchema;

use crate::models::{
    AlertSeverity, AlertType, OtpChannel, OtpCode, OtpPurpose, SecurityAlert, TwoFactorBackupCode,
    TwoFactorMethod, TwoFactorState, User,
};
use crate::services::alerts::SecurityAlertPublisher;
use crate::services::email::EmailProvider;
use crate::services::error::AuthError;
use crate::services::rate_limit::{RateAction, RateLimitService};
use crate::services::sms::SmsProvider;
use crate::services::store::AuthStore;

/// Two-factor policy knobs.
#[derive(Debug, Clone)]
pub struct TwoFactorConfig {
    /// Issuer shown in authenticator apps.
    pub issuer: String,
    pub otp_ttl_minutes: i64,
    pub otp_max_attempts: i32,
    pub recovery_code_count: usize,
    /// Re-warn the user when this few unused recovery codes remain.
    pub recovery_warn_threshold: i64,
}

impl Default for TwoFactorConfig {
    fn default() -> Self {
        Self {
            issuer: "auth-service".to_string(),
            otp_ttl_minutes: 10,
            otp_max_attempts: 5,
            recovery_code_count: 10,
            recovery_warn_threshold: 2,
        }
    }
}

/// Payload handed back from `setup_authenticator` for the QR code screen.
#[derive(Debug, serde::Serialize, ToSchema)]
pub struct TotpSetup {
    pub secret: String,
    pub provisioning_uri: String,
}

/// Standard TOTP parameters: SHA-1, 6 digits, 30-second step, +-1 step
/// tolerance to absorb clock drift.
pub(crate) fn build_totp(secret_b32: &str, issuer: &str, account: &str) -> Result<TOTP, AppError> {
    let secret = Secret::Encoded(secret_b32.to_string())
        .to_bytes()
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Invalid TOTP secret: {:?}", e)))?;
    TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        secret,
        Some(issuer.to_string()),
        account.to_string(),
    )
    .map_err(|e| AppError::InternalError(anyhow::anyhow!("TOTP init error: {:?}", e)))
}

#[derive(Clone)]
pub struct TwoFactorAuthenticator {
    store: Arc<dyn AuthStore>,
    email: Arc<dyn EmailProvider>,
    sms: Arc<dyn SmsProvider>,
    limiter: RateLimitService,
    alerts: SecurityAlertPublisher,
    config: TwoFactorConfig,
}

impl TwoFactorAuthenticator {
    pub fn new(
        store: Arc<dyn AuthStore>,
        email: Arc<dyn EmailProvider>,
        sms: Arc<dyn SmsProvider>,
        limiter: RateLimitService,
        alerts: SecurityAlertPublisher,
        config: TwoFactorConfig,
    ) -> Self {
        Self {
            store,
            email,
            sms,
            limiter,
            alerts,
            config,
        }
    }

    /// Begin TOTP enrollment: stage a fresh shared secret and hand back the
    /// provisioning URI. State moves to `pending_setup`.
    pub async fn setup_authenticator(&self, user: &User) -> Result<TotpSetup, AuthError> {
        if user.two_factor_enabled() {
            return Err(AuthError::TwoFactorStateInvalid);
        }

        let Secret::Encoded(secret_b32) = Secret::generate_secret().to_encoded() else {
            return Err(AuthError::Internal(AppError::InternalError(
                anyhow::anyhow!("TOTP secret encoding failed"),
            )));
        };

        let totp = build_totp(&secret_b32, &self.config.issuer, &user.email)?;
        self.store
            .set_pending_totp_secret(user.user_id, &secret_b32)
            .await?;

        tracing::info!(user_id = %user.user_id, "TOTP enrollment started");

        Ok(TotpSetup {
            provisioning_uri: totp.get_url(),
            secret: secret_b32,
        })
    }

    /// Complete enrollment by proving possession of the secret. On success
    /// the user is `enabled` and receives a fresh recovery-code batch, in
    /// plaintext exactly once.
    pub async fn verify_setup(&self, user: &User, code: &str) -> Result<Vec<String>, AuthError> {
        if user.two_factor_state() != TwoFactorState::PendingSetup {
            return Err(AuthError::TwoFactorStateInvalid);
        }
        let Some(secret) = user.pending_totp_secret_text.as_deref() else {
            return Err(AuthError::TwoFactorStateInvalid);
        };

        let totp = build_totp(secret, &self.config.issuer, &user.email)?;
        if !self.totp_matches_now(&totp, code) {
            return Err(AuthError::TwoFactorInvalid);
        }

        self.store
            .enable_two_factor(user.user_id, TwoFactorMethod::Totp.as_str(), Some(secret))
            .await?;

        let plaintext = self.issue_recovery_codes(user).await?;
        tracing::info!(user_id = %user.user_id, "Two-factor authentication enabled");
        Ok(plaintext)
    }

    /// Replace the user's recovery codes with a fresh batch and return the
    /// plaintext values.
    async fn issue_recovery_codes(&self, user: &User) -> Result<Vec<String>, AuthError> {
        let mut plaintext = Vec::with_capacity(self.config.recovery_code_count);
        let mut rows = Vec::with_capacity(self.config.recovery_code_count);
        for _ in 0..self.config.recovery_code_count {
            let code = generate_recovery_code();
            rows.push(TwoFactorBackupCode::new(user.user_id, &code));
            plaintext.push(code);
        }
        self.store.replace_backup_codes(user.user_id, &rows).await?;
        Ok(plaintext)
    }

    /// Validate a second factor according to the user's configured method.
    pub async fn validate_code(&self, user: &User, code: &str) -> Result<(), AuthError> {
        let user_key = user.user_id.to_string();
        if self
            .limiter
            .is_rate_limited(&user_key, RateAction::OtpVerify)
            .await?
        {
            return Err(AuthError::RateLimited {
                retry_after: self.limiter.retry_after_secs(RateAction::OtpVerify),
            });
        }
        self.limiter
            .record_attempt(&user_key, RateAction::OtpVerify)
            .await?;

        match user.two_factor_method() {
            Some(TwoFactorMethod::Totp) => self.validate_totp(user, code),
            Some(TwoFactorMethod::Email) | Some(TwoFactorMethod::Sms) => {
                self.validate_otp(user, code, OtpPurpose::TwoFactorAuth).await
            }
            None => Err(AuthError::TwoFactorStateInvalid),
        }
    }

    fn validate_totp(&self, user: &User, code: &str) -> Result<(), AuthError> {
        let Some(secret) = user.totp_secret_text.as_deref() else {
            return Err(AuthError::TwoFactorStateInvalid);
        };
        let totp = build_totp(secret, &self.config.issuer, &user.email)?;
        if self.totp_matches_now(&totp, code) {
            Ok(())
        } else {
            Err(AuthError::TwoFactorInvalid)
        }
    }

    fn totp_matches_now(&self, totp: &TOTP, code: &str) -> bool {
        totp.check(code, chrono::Utc::now().timestamp() as u64)
    }

    /// Validate a delivered one-time code. Every attempt, right or wrong,
    /// counts toward the cap; past the cap the code is dead even if later
    /// guessed correctly.
    pub async fn validate_otp(
        &self,
        user: &User,
        code: &str,
        purpose: OtpPurpose,
    ) -> Result<(), AuthError> {
        let Some(otp) = self
            .store
            .find_latest_unconsumed_otp(user.user_id, purpose.as_str())
            .await?
        else {
            return Err(AuthError::TwoFactorInvalid);
        };

        let attempts = self.store.increment_otp_attempts(otp.otp_id).await?;
        if attempts > otp.attempt_max {
            self.store
                .invalidate_unconsumed_otps(user.user_id, purpose.as_str())
                .await?;
            tracing::warn!(user_id = %user.user_id, "OTP attempt cap exhausted");
            return Err(AuthError::TwoFactorInvalid);
        }

        if otp.is_expired() || !otp.code_matches(code) {
            return Err(AuthError::TwoFactorInvalid);
        }

        // One-shot consume: only one concurrent validation can win
        if !self.store.consume_otp(otp.otp_id).await? {
            return Err(AuthError::TwoFactorInvalid);
        }
        Ok(())
    }

    /// Generate and dispatch a one-time code over the user's channel.
    /// Delivery is fire-and-forget: a transport failure is logged, not
    /// surfaced.
    pub async fn send_otp(&self, user: &User, purpose: OtpPurpose) -> Result<(), AuthError> {
        let (channel, destination) = match (purpose, user.two_factor_method()) {
            (OtpPurpose::TwoFactorAuth, Some(TwoFactorMethod::Sms)) => match &user.phone_text {
                Some(phone) => (OtpChannel::Sms, phone.clone()),
                None => (OtpChannel::Email, user.email.clone()),
            },
            _ => (OtpChannel::Email, user.email.clone()),
        };

        if self
            .limiter
            .is_rate_limited(&destination, RateAction::OtpSend)
            .await?
        {
            return Err(AuthError::RateLimited {
                retry_after: self.limiter.retry_after_secs(RateAction::OtpSend),
            });
        }
        self.limiter
            .record_attempt(&destination, RateAction::OtpSend)
            .await?;

        // Only one live code per purpose at a time
        self.store
            .invalidate_unconsumed_otps(user.user_id, purpose.as_str())
            .await?;

        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32));
        let otp = OtpCode::new(
            user.user_id,
            purpose,
            channel,
            &destination,
            &code,
            chrono::Duration::minutes(self.config.otp_ttl_minutes),
            self.config.otp_max_attempts,
        );
        self.store.insert_otp(&otp).await?;

        let dispatch = match channel {
            OtpChannel::Email => {
                self.email
                    .send_otp_email(&destination, &code, purpose.as_str())
                    .await
            }
            OtpChannel::Sms => self.sms.send_otp_sms(&destination, &code).await,
        };
        if let Err(e) = dispatch {
            tracing::error!(user_id = %user.user_id, error = %e, "OTP dispatch failed");
        }

        tracing::info!(user_id = %user.user_id, channel = channel.as_str(), "OTP issued");
        Ok(())
    }

    /// Exactly one unused recovery code may match; it burns on use. Warns
    /// the user when the remaining stock runs low.
    pub async fn validate_recovery_code(
        &self,
        user: &User,
        code: &str,
        ip: &str,
    ) -> Result<(), AuthError> {
        let codes = self.store.list_unused_backup_codes(user.user_id).await?;
        let Some(matched) = codes.iter().find(|c| c.code_matches(code)) else {
            return Err(AuthError::TwoFactorInvalid);
        };

        if !self.store.use_backup_code(matched.code_id, ip).await? {
            return Err(AuthError::TwoFactorInvalid);
        }

        let remaining = self.store.count_unused_backup_codes(user.user_id).await?;
        tracing::info!(user_id = %user.user_id, remaining = remaining, "Recovery code used");
        if remaining < self.config.recovery_warn_threshold {
            self.alerts
                .publish(SecurityAlert::new(
                    AlertType::RecoveryCodesLow,
                    AlertSeverity::Warning,
                    Some(user.user_id),
                    Some(ip),
                    None,
                    format!("Only {} recovery codes remain", remaining),
                ))
                .await?;
        }
        Ok(())
    }

    /// Disabling 2FA revokes all outstanding recovery codes and pending OTPs.
    pub async fn disable(&self, user: &User, ip: &str) -> Result<(), AuthError> {
        if user.two_factor_state() == TwoFactorState::Disabled {
            return Err(AuthError::TwoFactorStateInvalid);
        }

        self.store.delete_backup_codes(user.user_id).await?;
        self.store
            .invalidate_unconsumed_otps(user.user_id, OtpPurpose::TwoFactorAuth.as_str())
            .await?;
        self.store.disable_two_factor(user.user_id).await?;

        self.alerts
            .publish_and_notify(
                SecurityAlert::new(
                    AlertType::TwoFactorDisabled,
                    AlertSeverity::Warning,
                    Some(user.user_id),
                    Some(ip),
                    None,
                    "Two-factor authentication was disabled",
                ),
                &user.email,
            )
            .await?;

        tracing::info!(user_id = %user.user_id, "Two-factor authentication disabled");
        Ok(())
    }
}

/// Recovery code format: XXXX-XXXX over uppercase hex.
fn generate_recovery_code() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 4] = rng.gen();
    let hex = hex::encode_upper(bytes);
    format!("{}-{}", &hex[..4], &hex[4..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::email::MockEmailService;
    use crate::services::rate_limit::{MemoryCounter, RateLimitRules};
    use crate::services::sms::MockSmsService;
    use crate::services::store::MemoryStore;

    struct Fixture {
        authenticator: TwoFactorAuthenticator,
        store: Arc<dyn AuthStore>,
        email: Arc<MockEmailService>,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn AuthStore> = Arc::new(MemoryStore::new());
        let email = Arc::new(MockEmailService::new());
        let limiter =
            RateLimitService::new(Arc::new(MemoryCounter::new()), RateLimitRules::default());
        let alerts = SecurityAlertPublisher::new(store.clone(), None);
        let authenticator = TwoFactorAuthenticator::new(
            store.clone(),
            email.clone(),
            Arc::new(MockSmsService::new()),
            limiter,
            alerts,
            TwoFactorConfig::default(),
        );
        Fixture {
            authenticator,
            store,
            email,
        }
    }

    async fn enrolled_user(fx: &Fixture) -> (User, Vec<String>) {
        let user = User::new("user@example.com".to_string(), "hash".to_string(), None);
        fx.store.insert_user(&user).await.unwrap();

        let setup = fx.authenticator.setup_authenticator(&user).await.unwrap();
        let user = fx.store.find_user_by_id(user.user_id).await.unwrap().unwrap();

        let totp = build_totp(&setup.secret, "auth-service", &user.email).unwrap();
        let code = totp.generate(chrono::Utc::now().timestamp() as u64);
        let recovery = fx.authenticator.verify_setup(&user, &code).await.unwrap();

        let user = fx.store.find_user_by_id(user.user_id).await.unwrap().unwrap();
        (user, recovery)
    }

    #[test]
    fn test_totp_tolerance_window() {
        // Step-aligned reference time
        let t: u64 = 1_699_999_980;
        let Secret::Encoded(secret) = Secret::generate_secret().to_encoded() else {
            panic!("secret encoding failed");
        };
        let totp = build_totp(&secret, "auth-service", "user@example.com").unwrap();
        let code = totp.generate(t);

        // Accepted at T and one step either side
        assert!(totp.check(&code, t));
        assert!(totp.check(&code, t - 30));
        assert!(totp.check(&code, t + 30));
        // Rejected two steps away
        assert!(!totp.check(&code, t - 60));
        assert!(!totp.check(&code, t + 60));
    }

    #[test]
    fn test_recovery_code_format() {
        let code = generate_recovery_code();
        assert_eq!(code.len(), 9);
        assert_eq!(&code[4..5], "-");
        assert!(code
            .chars()
            .all(|c| c == '-' || c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_enrollment_state_machine() {
        let fx = fixture();
        let user = User::new("user@example.com".to_string(), "hash".to_string(), None);
        fx.store.insert_user(&user).await.unwrap();
        assert_eq!(user.two_factor_state(), TwoFactorState::Disabled);

        fx.authenticator.setup_authenticator(&user).await.unwrap();
        let pending = fx.store.find_user_by_id(user.user_id).await.unwrap().unwrap();
        assert_eq!(pending.two_factor_state(), TwoFactorState::PendingSetup);

        // A wrong code must not enable 2FA
        assert!(matches!(
            fx.authenticator.verify_setup(&pending, "000000").await,
            Err(AuthError::TwoFactorInvalid)
        ));

        let totp = build_totp(
            pending.pending_totp_secret_text.as_deref().unwrap(),
            "auth-service",
            &pending.email,
        )
        .unwrap();
        let code = totp.generate(chrono::Utc::now().timestamp() as u64);
        let recovery = fx.authenticator.verify_setup(&pending, &code).await.unwrap();
        assert_eq!(recovery.len(), 10);

        let enabled = fx.store.find_user_by_id(user.user_id).await.unwrap().unwrap();
        assert_eq!(enabled.two_factor_state(), TwoFactorState::Enabled);
        assert!(enabled.totp_secret_text.is_some());
        assert!(enabled.pending_totp_secret_text.is_none());
    }

    #[tokio::test]
    async fn test_recovery_code_is_single_use() {
        let fx = fixture();
        let (user, recovery) = enrolled_user(&fx).await;
        let code = &recovery[0];

        fx.authenticator
            .validate_recovery_code(&user, code, "203.0.113.9")
            .await
            .unwrap();

        // Same code again must be refused
        assert!(matches!(
            fx.authenticator
                .validate_recovery_code(&user, code, "203.0.113.9")
                .await,
            Err(AuthError::TwoFactorInvalid)
        ));
    }

    #[tokio::test]
    async fn test_low_recovery_stock_raises_alert() {
        let fx = fixture();
        let (user, recovery) = enrolled_user(&fx).await;

        // Burn down to below the warn threshold of 2
        for code in recovery.iter().take(9) {
            fx.authenticator
                .validate_recovery_code(&user, code, "203.0.113.9")
                .await
                .unwrap();
        }

        let alerts = fx.store.list_alerts_for_user(user.user_id).await.unwrap();
        assert!(alerts
            .iter()
            .any(|a| a.alert_type_code == "recovery_codes_low"));
    }

    #[tokio::test]
    async fn test_email_otp_round_trip_and_attempt_cap() {
        let fx = fixture();
        let user = User::new("otp@example.com".to_string(), "hash".to_string(), None);
        fx.store.insert_user(&user).await.unwrap();
        fx.store
            .enable_two_factor(user.user_id, "email", None)
            .await
            .unwrap();
        let user = fx.store.find_user_by_id(user.user_id).await.unwrap().unwrap();

        fx.authenticator
            .send_otp(&user, OtpPurpose::TwoFactorAuth)
            .await
            .unwrap();
        let code = fx.email.last_body_for("otp@example.com").unwrap();

        // Wrong guesses burn attempts
        for _ in 0..5 {
            assert!(matches!(
                fx.authenticator.validate_code(&user, "000000").await,
                Err(AuthError::TwoFactorInvalid | AuthError::RateLimited { .. })
            ));
        }

        // Cap exhausted: even the right code is dead now
        assert!(fx
            .authenticator
            .validate_otp(&user, &code, OtpPurpose::TwoFactorAuth)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_otp_send_rate_limited_per_destination() {
        let fx = fixture();
        let user = User::new("busy@example.com".to_string(), "hash".to_string(), None);
        fx.store.insert_user(&user).await.unwrap();

        for _ in 0..3 {
            fx.authenticator
                .send_otp(&user, OtpPurpose::TwoFactorAuth)
                .await
                .unwrap();
        }
        assert!(matches!(
            fx.authenticator.send_otp(&user, OtpPurpose::TwoFactorAuth).await,
            Err(AuthError::RateLimited { .. })
        ));
    }

    #[tokio::test]
    async fn test_disable_revokes_recovery_codes_and_otps() {
        let fx = fixture();
        let (user, recovery) = enrolled_user(&fx).await;

        fx.authenticator.disable(&user, "203.0.113.9").await.unwrap();

        let user = fx.store.find_user_by_id(user.user_id).await.unwrap().unwrap();
        assert_eq!(user.two_factor_state(), TwoFactorState::Disabled);
        assert!(matches!(
            fx.authenticator
                .validate_recovery_code(&user, &recovery[0], "203.0.113.9")
                .await,
            Err(AuthError::TwoFactorInvalid)
        ));
    }
}
