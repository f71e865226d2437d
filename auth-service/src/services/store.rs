//! Persistence boundary for the auth core.
//!
//! All components talk to storage through [`AuthStore`]; the Postgres
//! implementation lives in `services::database` and [`MemoryStore`] backs
//! tests and single-node development. Both must preserve the same
//! conditional-update semantics for `mark_token_used`, `consume_otp` and
//! `use_backup_code`: exactly one concurrent caller may win.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::models::{
    BlockedIp, LoginAttempt, OtpCode, RefreshToken, SecurityAlert, TwoFactorBackupCode, User,
    UserSession,
};

#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    // ==================== User Operations ====================

    async fn insert_user(&self, user: &User) -> Result<(), AppError>;
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;
    async fn update_user_password(&self, user_id: Uuid, password_hash: &str)
        -> Result<(), AppError>;
    /// Stage a TOTP secret and move the user to `pending_setup`.
    async fn set_pending_totp_secret(&self, user_id: Uuid, secret: &str) -> Result<(), AppError>;
    /// Flip the user to `enabled`; for TOTP the staged secret becomes active.
    async fn enable_two_factor(
        &self,
        user_id: Uuid,
        method: &str,
        totp_secret: Option<&str>,
    ) -> Result<(), AppError>;
    async fn disable_two_factor(&self, user_id: Uuid) -> Result<(), AppError>;

    // ==================== Refresh Token Operations ====================

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), AppError>;
    async fn find_refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, AppError>;
    async fn find_refresh_token_by_id(
        &self,
        token_id: Uuid,
    ) -> Result<Option<RefreshToken>, AppError>;
    async fn find_tokens_in_family(&self, family_id: Uuid) -> Result<Vec<RefreshToken>, AppError>;
    /// Conditional update: set `used_utc` and the forward pointer iff the
    /// token is still unused and unrevoked. Returns whether this caller won.
    async fn mark_token_used(&self, token_id: Uuid, replaced_by: Uuid) -> Result<bool, AppError>;
    /// Revoke a single token; false when it was already revoked.
    async fn revoke_token(&self, token_id: Uuid, reason: &str) -> Result<bool, AppError>;
    /// Revoke every not-yet-revoked token across all of a user's chains.
    async fn revoke_tokens_for_user(&self, user_id: Uuid, reason: &str) -> Result<u64, AppError>;

    // ==================== Session Operations ====================

    async fn insert_session(&self, session: &UserSession) -> Result<(), AppError>;
    async fn find_session_by_id(&self, session_id: Uuid)
        -> Result<Option<UserSession>, AppError>;
    async fn find_active_session_for_device(
        &self,
        user_id: Uuid,
        device_id: &str,
    ) -> Result<Option<UserSession>, AppError>;
    async fn list_active_sessions(&self, user_id: Uuid) -> Result<Vec<UserSession>, AppError>;
    /// Whether any session (live or ended) ever existed for this device.
    async fn device_seen_before(&self, user_id: Uuid, device_id: &str) -> Result<bool, AppError>;
    /// Best-effort activity bump; lost updates are acceptable.
    async fn touch_session_by_family(
        &self,
        family_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AppError>;
    async fn end_session(&self, session_id: Uuid, reason: &str) -> Result<bool, AppError>;
    async fn end_sessions_by_family(&self, family_id: Uuid, reason: &str)
        -> Result<u64, AppError>;
    async fn end_all_sessions_for_user(
        &self,
        user_id: Uuid,
        reason: &str,
        except: Option<Uuid>,
    ) -> Result<u64, AppError>;

    // ==================== Login Attempt Operations ====================

    async fn insert_login_attempt(&self, attempt: &LoginAttempt) -> Result<(), AppError>;
    async fn last_successful_login(&self, user_id: Uuid)
        -> Result<Option<LoginAttempt>, AppError>;

    // ==================== Blocked IP Operations ====================

    async fn find_blocked_ip(&self, ip: &str) -> Result<Option<BlockedIp>, AppError>;
    /// Upsert keyed by IP.
    async fn save_blocked_ip(&self, entry: &BlockedIp) -> Result<(), AppError>;
    async fn list_blocked_ips(&self) -> Result<Vec<BlockedIp>, AppError>;

    // ==================== OTP Operations ====================

    async fn insert_otp(&self, otp: &OtpCode) -> Result<(), AppError>;
    async fn find_latest_unconsumed_otp(
        &self,
        user_id: Uuid,
        purpose: &str,
    ) -> Result<Option<OtpCode>, AppError>;
    /// Atomic increment; returns the new attempt count.
    async fn increment_otp_attempts(&self, otp_id: Uuid) -> Result<i32, AppError>;
    /// Conditional consume; false when already consumed.
    async fn consume_otp(&self, otp_id: Uuid) -> Result<bool, AppError>;
    async fn invalidate_unconsumed_otps(
        &self,
        user_id: Uuid,
        purpose: &str,
    ) -> Result<u64, AppError>;

    // ==================== Recovery Code Operations ====================

    /// Drop any previous batch and store a fresh one.
    async fn replace_backup_codes(
        &self,
        user_id: Uuid,
        codes: &[TwoFactorBackupCode],
    ) -> Result<(), AppError>;
    async fn list_unused_backup_codes(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<TwoFactorBackupCode>, AppError>;
    /// Conditional single-use burn; false when already used.
    async fn use_backup_code(&self, code_id: Uuid, ip: &str) -> Result<bool, AppError>;
    async fn count_unused_backup_codes(&self, user_id: Uuid) -> Result<i64, AppError>;
    async fn delete_backup_codes(&self, user_id: Uuid) -> Result<u64, AppError>;

    // ==================== Security Alert Operations ====================

    async fn insert_alert(&self, alert: &SecurityAlert) -> Result<(), AppError>;
    async fn list_alerts_for_user(&self, user_id: Uuid) -> Result<Vec<SecurityAlert>, AppError>;
    async fn mark_alert_read(&self, alert_id: Uuid) -> Result<bool, AppError>;

    // ==================== Maintenance ====================

    /// Idempotent sweep: drop expired unconsumed OTP rows. Safe to run
    /// concurrently or skip entirely.
    async fn purge_expired(&self) -> Result<u64, AppError>;
}

// ==================== In-memory implementation ====================

#[derive(Default)]
struct MemoryInner {
    users: HashMap<Uuid, User>,
    tokens: HashMap<Uuid, RefreshToken>,
    sessions: HashMap<Uuid, UserSession>,
    attempts: Vec<LoginAttempt>,
    blocked_ips: HashMap<String, BlockedIp>,
    otps: HashMap<Uuid, OtpCode>,
    backup_codes: HashMap<Uuid, TwoFactorBackupCode>,
    alerts: HashMap<Uuid, SecurityAlert>,
}

/// Mutex-guarded in-memory store. The single lock makes every operation
/// trivially atomic, which preserves the conditional-update contract the
/// Postgres implementation gets from `UPDATE ... WHERE` row filters.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> Result<MutexGuard<'_, MemoryInner>, AppError> {
        self.inner
            .lock()
            .map_err(|_| AppError::InternalError(anyhow::anyhow!("memory store mutex poisoned")))
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn insert_user(&self, user: &User) -> Result<(), AppError> {
        self.inner()?.users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.inner()?.users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self
            .inner()?
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn update_user_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<(), AppError> {
        if let Some(user) = self.inner()?.users.get_mut(&user_id) {
            user.password_hash = password_hash.to_string();
            user.updated_utc = Utc::now();
        }
        Ok(())
    }

    async fn set_pending_totp_secret(&self, user_id: Uuid, secret: &str) -> Result<(), AppError> {
        if let Some(user) = self.inner()?.users.get_mut(&user_id) {
            user.pending_totp_secret_text = Some(secret.to_string());
            user.two_factor_state_code = "pending_setup".to_string();
            user.updated_utc = Utc::now();
        }
        Ok(())
    }

    async fn enable_two_factor(
        &self,
        user_id: Uuid,
        method: &str,
        totp_secret: Option<&str>,
    ) -> Result<(), AppError> {
        if let Some(user) = self.inner()?.users.get_mut(&user_id) {
            user.two_factor_state_code = "enabled".to_string();
            user.two_factor_method_code = Some(method.to_string());
            user.totp_secret_text = totp_secret.map(|s| s.to_string());
            user.pending_totp_secret_text = None;
            user.updated_utc = Utc::now();
        }
        Ok(())
    }

    async fn disable_two_factor(&self, user_id: Uuid) -> Result<(), AppError> {
        if let Some(user) = self.inner()?.users.get_mut(&user_id) {
            user.two_factor_state_code = "disabled".to_string();
            user.two_factor_method_code = None;
            user.totp_secret_text = None;
            user.pending_totp_secret_text = None;
            user.updated_utc = Utc::now();
        }
        Ok(())
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), AppError> {
        self.inner()?.tokens.insert(token.token_id, token.clone());
        Ok(())
    }

    async fn find_refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, AppError> {
        Ok(self
            .inner()?
            .tokens
            .values()
            .find(|t| t.token_hash_text == token_hash)
            .cloned())
    }

    async fn find_refresh_token_by_id(
        &self,
        token_id: Uuid,
    ) -> Result<Option<RefreshToken>, AppError> {
        Ok(self.inner()?.tokens.get(&token_id).cloned())
    }

    async fn find_tokens_in_family(&self, family_id: Uuid) -> Result<Vec<RefreshToken>, AppError> {
        let mut tokens: Vec<RefreshToken> = self
            .inner()?
            .tokens
            .values()
            .filter(|t| t.family_id == family_id)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| t.issued_utc);
        Ok(tokens)
    }

    async fn mark_token_used(&self, token_id: Uuid, replaced_by: Uuid) -> Result<bool, AppError> {
        let mut inner = self.inner()?;
        match inner.tokens.get_mut(&token_id) {
            Some(token) if token.used_utc.is_none() && token.revoked_utc.is_none() => {
                token.used_utc = Some(Utc::now());
                token.replaced_by = Some(replaced_by);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_token(&self, token_id: Uuid, reason: &str) -> Result<bool, AppError> {
        let mut inner = self.inner()?;
        match inner.tokens.get_mut(&token_id) {
            Some(token) if token.revoked_utc.is_none() => {
                token.revoked_utc = Some(Utc::now());
                token.revoked_reason_code = Some(reason.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_tokens_for_user(&self, user_id: Uuid, reason: &str) -> Result<u64, AppError> {
        let mut inner = self.inner()?;
        let mut revoked = 0;
        for token in inner.tokens.values_mut() {
            if token.user_id == user_id && token.revoked_utc.is_none() {
                token.revoked_utc = Some(Utc::now());
                token.revoked_reason_code = Some(reason.to_string());
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn insert_session(&self, session: &UserSession) -> Result<(), AppError> {
        self.inner()?
            .sessions
            .insert(session.session_id, session.clone());
        Ok(())
    }

    async fn find_session_by_id(
        &self,
        session_id: Uuid,
    ) -> Result<Option<UserSession>, AppError> {
        Ok(self.inner()?.sessions.get(&session_id).cloned())
    }

    async fn find_active_session_for_device(
        &self,
        user_id: Uuid,
        device_id: &str,
    ) -> Result<Option<UserSession>, AppError> {
        Ok(self
            .inner()?
            .sessions
            .values()
            .find(|s| s.user_id == user_id && s.device_id_text == device_id && s.active_flag)
            .cloned())
    }

    async fn list_active_sessions(&self, user_id: Uuid) -> Result<Vec<UserSession>, AppError> {
        let mut sessions: Vec<UserSession> = self
            .inner()?
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.active_flag)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_utc);
        Ok(sessions)
    }

    async fn device_seen_before(&self, user_id: Uuid, device_id: &str) -> Result<bool, AppError> {
        Ok(self
            .inner()?
            .sessions
            .values()
            .any(|s| s.user_id == user_id && s.device_id_text == device_id))
    }

    async fn touch_session_by_family(
        &self,
        family_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut inner = self.inner()?;
        if let Some(session) = inner
            .sessions
            .values_mut()
            .find(|s| s.family_id == family_id && s.active_flag)
        {
            session.last_activity_utc = at;
        }
        Ok(())
    }

    async fn end_session(&self, session_id: Uuid, reason: &str) -> Result<bool, AppError> {
        let mut inner = self.inner()?;
        match inner.sessions.get_mut(&session_id) {
            Some(session) if session.active_flag => {
                session.active_flag = false;
                session.ended_utc = Some(Utc::now());
                session.end_reason_code = Some(reason.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn end_sessions_by_family(
        &self,
        family_id: Uuid,
        reason: &str,
    ) -> Result<u64, AppError> {
        let mut inner = self.inner()?;
        let mut ended = 0;
        for session in inner.sessions.values_mut() {
            if session.family_id == family_id && session.active_flag {
                session.active_flag = false;
                session.ended_utc = Some(Utc::now());
                session.end_reason_code = Some(reason.to_string());
                ended += 1;
            }
        }
        Ok(ended)
    }

    async fn end_all_sessions_for_user(
        &self,
        user_id: Uuid,
        reason: &str,
        except: Option<Uuid>,
    ) -> Result<u64, AppError> {
        let mut inner = self.inner()?;
        let mut ended = 0;
        for session in inner.sessions.values_mut() {
            if session.user_id == user_id
                && session.active_flag
                && Some(session.session_id) != except
            {
                session.active_flag = false;
                session.ended_utc = Some(Utc::now());
                session.end_reason_code = Some(reason.to_string());
                ended += 1;
            }
        }
        Ok(ended)
    }

    async fn insert_login_attempt(&self, attempt: &LoginAttempt) -> Result<(), AppError> {
        self.inner()?.attempts.push(attempt.clone());
        Ok(())
    }

    async fn last_successful_login(
        &self,
        user_id: Uuid,
    ) -> Result<Option<LoginAttempt>, AppError> {
        Ok(self
            .inner()?
            .attempts
            .iter()
            .rev()
            .find(|a| a.user_id == Some(user_id) && a.success_flag)
            .cloned())
    }

    async fn find_blocked_ip(&self, ip: &str) -> Result<Option<BlockedIp>, AppError> {
        Ok(self.inner()?.blocked_ips.get(ip).cloned())
    }

    async fn save_blocked_ip(&self, entry: &BlockedIp) -> Result<(), AppError> {
        self.inner()?
            .blocked_ips
            .insert(entry.ip_text.clone(), entry.clone());
        Ok(())
    }

    async fn list_blocked_ips(&self) -> Result<Vec<BlockedIp>, AppError> {
        let mut entries: Vec<BlockedIp> = self.inner()?.blocked_ips.values().cloned().collect();
        entries.sort_by_key(|e| e.created_utc);
        Ok(entries)
    }

    async fn insert_otp(&self, otp: &OtpCode) -> Result<(), AppError> {
        self.inner()?.otps.insert(otp.otp_id, otp.clone());
        Ok(())
    }

    async fn find_latest_unconsumed_otp(
        &self,
        user_id: Uuid,
        purpose: &str,
    ) -> Result<Option<OtpCode>, AppError> {
        Ok(self
            .inner()?
            .otps
            .values()
            .filter(|o| {
                o.user_id == user_id && o.purpose_code == purpose && o.consumed_utc.is_none()
            })
            .max_by_key(|o| o.created_utc)
            .cloned())
    }

    async fn increment_otp_attempts(&self, otp_id: Uuid) -> Result<i32, AppError> {
        let mut inner = self.inner()?;
        match inner.otps.get_mut(&otp_id) {
            Some(otp) => {
                otp.attempt_count += 1;
                Ok(otp.attempt_count)
            }
            None => Ok(0),
        }
    }

    async fn consume_otp(&self, otp_id: Uuid) -> Result<bool, AppError> {
        let mut inner = self.inner()?;
        match inner.otps.get_mut(&otp_id) {
            Some(otp) if otp.consumed_utc.is_none() => {
                otp.consumed_utc = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn invalidate_unconsumed_otps(
        &self,
        user_id: Uuid,
        purpose: &str,
    ) -> Result<u64, AppError> {
        let mut inner = self.inner()?;
        let mut invalidated = 0;
        for otp in inner.otps.values_mut() {
            if otp.user_id == user_id && otp.purpose_code == purpose && otp.consumed_utc.is_none()
            {
                otp.consumed_utc = Some(Utc::now());
                invalidated += 1;
            }
        }
        Ok(invalidated)
    }

    async fn replace_backup_codes(
        &self,
        user_id: Uuid,
        codes: &[TwoFactorBackupCode],
    ) -> Result<(), AppError> {
        let mut inner = self.inner()?;
        inner.backup_codes.retain(|_, c| c.user_id != user_id);
        for code in codes {
            inner.backup_codes.insert(code.code_id, code.clone());
        }
        Ok(())
    }

    async fn list_unused_backup_codes(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<TwoFactorBackupCode>, AppError> {
        Ok(self
            .inner()?
            .backup_codes
            .values()
            .filter(|c| c.user_id == user_id && c.used_utc.is_none())
            .cloned()
            .collect())
    }

    async fn use_backup_code(&self, code_id: Uuid, ip: &str) -> Result<bool, AppError> {
        let mut inner = self.inner()?;
        match inner.backup_codes.get_mut(&code_id) {
            Some(code) if code.used_utc.is_none() => {
                code.used_utc = Some(Utc::now());
                code.used_from_ip_text = Some(ip.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_unused_backup_codes(&self, user_id: Uuid) -> Result<i64, AppError> {
        Ok(self
            .inner()?
            .backup_codes
            .values()
            .filter(|c| c.user_id == user_id && c.used_utc.is_none())
            .count() as i64)
    }

    async fn delete_backup_codes(&self, user_id: Uuid) -> Result<u64, AppError> {
        let mut inner = self.inner()?;
        let before = inner.backup_codes.len();
        inner.backup_codes.retain(|_, c| c.user_id != user_id);
        Ok((before - inner.backup_codes.len()) as u64)
    }

    async fn insert_alert(&self, alert: &SecurityAlert) -> Result<(), AppError> {
        self.inner()?.alerts.insert(alert.alert_id, alert.clone());
        Ok(())
    }

    async fn list_alerts_for_user(&self, user_id: Uuid) -> Result<Vec<SecurityAlert>, AppError> {
        let mut alerts: Vec<SecurityAlert> = self
            .inner()?
            .alerts
            .values()
            .filter(|a| a.user_id == Some(user_id))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(alerts)
    }

    async fn mark_alert_read(&self, alert_id: Uuid) -> Result<bool, AppError> {
        let mut inner = self.inner()?;
        match inner.alerts.get_mut(&alert_id) {
            Some(alert) if !alert.read_flag => {
                alert.read_flag = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_expired(&self) -> Result<u64, AppError> {
        let mut inner = self.inner()?;
        let now = Utc::now();
        let before = inner.otps.len();
        inner
            .otps
            .retain(|_, o| o.consumed_utc.is_some() || o.expiry_utc > now);
        Ok((before - inner.otps.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_mark_token_used_wins_exactly_once() {
        let store = MemoryStore::new();
        let token = RefreshToken::new_root(Uuid::new_v4(), "device-1", "value", 30);
        store.insert_refresh_token(&token).await.unwrap();

        let successor = Uuid::new_v4();
        assert!(store.mark_token_used(token.token_id, successor).await.unwrap());
        // Second attempt observes the token already used
        assert!(!store.mark_token_used(token.token_id, successor).await.unwrap());

        let stored = store
            .find_refresh_token_by_id(token.token_id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.is_used());
        assert_eq!(stored.replaced_by, Some(successor));
    }

    #[tokio::test]
    async fn test_use_backup_code_is_single_use() {
        let store = MemoryStore::new();
        let code = TwoFactorBackupCode::new(Uuid::new_v4(), "AB12-CD34");
        store
            .replace_backup_codes(code.user_id, std::slice::from_ref(&code))
            .await
            .unwrap();

        assert!(store.use_backup_code(code.code_id, "203.0.113.9").await.unwrap());
        assert!(!store.use_backup_code(code.code_id, "203.0.113.9").await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired_drops_only_dead_otps() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let live = OtpCode::new(
            user_id,
            crate::models::OtpPurpose::TwoFactorAuth,
            crate::models::OtpChannel::Email,
            "a@example.com",
            "111111",
            Duration::minutes(10),
            5,
        );
        let mut dead = OtpCode::new(
            user_id,
            crate::models::OtpPurpose::TwoFactorAuth,
            crate::models::OtpChannel::Email,
            "a@example.com",
            "222222",
            Duration::minutes(10),
            5,
        );
        dead.expiry_utc = Utc::now() - Duration::minutes(1);

        store.insert_otp(&live).await.unwrap();
        store.insert_otp(&dead).await.unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store
            .find_latest_unconsumed_otp(user_id, "two_factor_auth")
            .await
            .unwrap()
            .is_some());
    }
}
