//! PostgreSQL store for the auth core.
//!
//! Uses sqlx with runtime-bound queries. The conditional updates
//! (`mark_token_used`, `consume_otp`, `use_backup_code`) rely on row filters
//! so that exactly one concurrent caller observes `rows_affected = 1`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::models::{
    BlockedIp, LoginAttempt, OtpCode, RefreshToken, SecurityAlert, TwoFactorBackupCode, User,
    UserSession,
};
use crate::services::store::AuthStore;

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database wrapper from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the schema on startup. Idempotent.
    pub async fn initialize_schema(&self) -> Result<(), AppError> {
        const SCHEMA: &[&str] = &[
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id UUID PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                display_name TEXT,
                roles TEXT[] NOT NULL DEFAULT '{user}',
                enabled_flag BOOLEAN NOT NULL DEFAULT TRUE,
                two_factor_state_code TEXT NOT NULL DEFAULT 'disabled',
                two_factor_method_code TEXT,
                totp_secret_text TEXT,
                pending_totp_secret_text TEXT,
                phone_text TEXT,
                created_utc TIMESTAMPTZ NOT NULL,
                updated_utc TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS refresh_tokens (
                token_id UUID PRIMARY KEY,
                family_id UUID NOT NULL,
                user_id UUID NOT NULL,
                device_id_text TEXT NOT NULL,
                token_hash_text TEXT NOT NULL UNIQUE,
                issued_utc TIMESTAMPTZ NOT NULL,
                expiry_utc TIMESTAMPTZ NOT NULL,
                used_utc TIMESTAMPTZ,
                revoked_utc TIMESTAMPTZ,
                revoked_reason_code TEXT,
                replaced_by UUID
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_family ON refresh_tokens (family_id)",
            "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_user ON refresh_tokens (user_id)",
            r#"
            CREATE TABLE IF NOT EXISTS user_sessions (
                session_id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                family_id UUID NOT NULL,
                device_id_text TEXT NOT NULL,
                device_name_text TEXT,
                ip_text TEXT NOT NULL,
                country_code TEXT,
                active_flag BOOLEAN NOT NULL DEFAULT TRUE,
                created_utc TIMESTAMPTZ NOT NULL,
                last_activity_utc TIMESTAMPTZ NOT NULL,
                expiry_utc TIMESTAMPTZ NOT NULL,
                ended_utc TIMESTAMPTZ,
                end_reason_code TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_user_sessions_user ON user_sessions (user_id)",
            "CREATE INDEX IF NOT EXISTS idx_user_sessions_family ON user_sessions (family_id)",
            r#"
            CREATE TABLE IF NOT EXISTS login_attempts (
                attempt_id UUID PRIMARY KEY,
                user_id UUID,
                email_text TEXT NOT NULL,
                ip_text TEXT NOT NULL,
                success_flag BOOLEAN NOT NULL,
                failure_reason_code TEXT,
                risk_score INTEGER NOT NULL DEFAULT 0,
                risk_factor_codes TEXT[] NOT NULL DEFAULT '{}',
                country_code TEXT,
                latitude DOUBLE PRECISION,
                longitude DOUBLE PRECISION,
                created_utc TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_login_attempts_user ON login_attempts (user_id, created_utc)",
            r#"
            CREATE TABLE IF NOT EXISTS blocked_ips (
                block_id UUID PRIMARY KEY,
                ip_text TEXT NOT NULL UNIQUE,
                reason_code TEXT,
                permanent_flag BOOLEAN NOT NULL DEFAULT FALSE,
                blocked_utc TIMESTAMPTZ,
                expiry_utc TIMESTAMPTZ,
                failed_count INTEGER NOT NULL DEFAULT 0,
                auto_block_count INTEGER NOT NULL DEFAULT 0,
                blocked_by_text TEXT,
                unblocked_by_text TEXT,
                unblocked_utc TIMESTAMPTZ,
                created_utc TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS otp_codes (
                otp_id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                purpose_code TEXT NOT NULL,
                channel_code TEXT NOT NULL,
                destination_text TEXT NOT NULL,
                code_hash_text TEXT NOT NULL,
                expiry_utc TIMESTAMPTZ NOT NULL,
                consumed_utc TIMESTAMPTZ,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                attempt_max INTEGER NOT NULL,
                created_utc TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_otp_codes_user ON otp_codes (user_id, purpose_code, created_utc)",
            r#"
            CREATE TABLE IF NOT EXISTS backup_codes (
                code_id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                code_hash_text TEXT NOT NULL,
                used_utc TIMESTAMPTZ,
                used_from_ip_text TEXT,
                created_utc TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_backup_codes_user ON backup_codes (user_id)",
            r#"
            CREATE TABLE IF NOT EXISTS security_alerts (
                alert_id UUID PRIMARY KEY,
                alert_type_code TEXT NOT NULL,
                severity_code TEXT NOT NULL,
                user_id UUID,
                ip_text TEXT,
                device_text TEXT,
                detail_text TEXT NOT NULL,
                read_flag BOOLEAN NOT NULL DEFAULT FALSE,
                resolved_utc TIMESTAMPTZ,
                created_utc TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_security_alerts_user ON security_alerts (user_id, created_utc)",
        ];

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        }

        tracing::info!("Database schema initialized");
        Ok(())
    }
}

#[async_trait]
impl AuthStore for Database {
    /// Health check - ping the database.
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!("Database health check failed: {}", e))
            })?;
        Ok(())
    }

    // ==================== User Operations ====================

    async fn insert_user(&self, user: &User) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, email, password_hash, display_name, roles, enabled_flag,
                two_factor_state_code, two_factor_method_code, totp_secret_text,
                pending_totp_secret_text, phone_text, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(user.user_id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.display_name)
        .bind(&user.roles)
        .bind(user.enabled_flag)
        .bind(&user.two_factor_state_code)
        .bind(&user.two_factor_method_code)
        .bind(&user.totp_secret_text)
        .bind(&user.pending_totp_secret_text)
        .bind(&user.phone_text)
        .bind(user.created_utc)
        .bind(user.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn update_user_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET password_hash = $1, updated_utc = NOW() WHERE user_id = $2")
            .bind(password_hash)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn set_pending_totp_secret(&self, user_id: Uuid, secret: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE users
            SET pending_totp_secret_text = $1, two_factor_state_code = 'pending_setup',
                updated_utc = NOW()
            WHERE user_id = $2
            "#,
        )
        .bind(secret)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn enable_two_factor(
        &self,
        user_id: Uuid,
        method: &str,
        totp_secret: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE users
            SET two_factor_state_code = 'enabled', two_factor_method_code = $1,
                totp_secret_text = $2, pending_totp_secret_text = NULL, updated_utc = NOW()
            WHERE user_id = $3
            "#,
        )
        .bind(method)
        .bind(totp_secret)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn disable_two_factor(&self, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE users
            SET two_factor_state_code = 'disabled', two_factor_method_code = NULL,
                totp_secret_text = NULL, pending_totp_secret_text = NULL, updated_utc = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    // ==================== Refresh Token Operations ====================

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (token_id, family_id, user_id, device_id_text,
                token_hash_text, issued_utc, expiry_utc, used_utc, revoked_utc,
                revoked_reason_code, replaced_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(token.token_id)
        .bind(token.family_id)
        .bind(token.user_id)
        .bind(&token.device_id_text)
        .bind(&token.token_hash_text)
        .bind(token.issued_utc)
        .bind(token.expiry_utc)
        .bind(token.used_utc)
        .bind(token.revoked_utc)
        .bind(&token.revoked_reason_code)
        .bind(token.replaced_by)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn find_refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, AppError> {
        sqlx::query_as::<_, RefreshToken>(
            "SELECT * FROM refresh_tokens WHERE token_hash_text = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn find_refresh_token_by_id(
        &self,
        token_id: Uuid,
    ) -> Result<Option<RefreshToken>, AppError> {
        sqlx::query_as::<_, RefreshToken>("SELECT * FROM refresh_tokens WHERE token_id = $1")
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn find_tokens_in_family(&self, family_id: Uuid) -> Result<Vec<RefreshToken>, AppError> {
        sqlx::query_as::<_, RefreshToken>(
            "SELECT * FROM refresh_tokens WHERE family_id = $1 ORDER BY issued_utc",
        )
        .bind(family_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn mark_token_used(&self, token_id: Uuid, replaced_by: Uuid) -> Result<bool, AppError> {
        // Exactly one concurrent caller can win this row filter.
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET used_utc = NOW(), replaced_by = $1
            WHERE token_id = $2 AND used_utc IS NULL AND revoked_utc IS NULL
            "#,
        )
        .bind(replaced_by)
        .bind(token_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_token(&self, token_id: Uuid, reason: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_utc = NOW(), revoked_reason_code = $1
            WHERE token_id = $2 AND revoked_utc IS NULL
            "#,
        )
        .bind(reason)
        .bind(token_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_tokens_for_user(&self, user_id: Uuid, reason: &str) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_utc = NOW(), revoked_reason_code = $1
            WHERE user_id = $2 AND revoked_utc IS NULL
            "#,
        )
        .bind(reason)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected())
    }

    // ==================== Session Operations ====================

    async fn insert_session(&self, session: &UserSession) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO user_sessions (session_id, user_id, family_id, device_id_text,
                device_name_text, ip_text, country_code, active_flag, created_utc,
                last_activity_utc, expiry_utc, ended_utc, end_reason_code)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(session.session_id)
        .bind(session.user_id)
        .bind(session.family_id)
        .bind(&session.device_id_text)
        .bind(&session.device_name_text)
        .bind(&session.ip_text)
        .bind(&session.country_code)
        .bind(session.active_flag)
        .bind(session.created_utc)
        .bind(session.last_activity_utc)
        .bind(session.expiry_utc)
        .bind(session.ended_utc)
        .bind(&session.end_reason_code)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn find_session_by_id(
        &self,
        session_id: Uuid,
    ) -> Result<Option<UserSession>, AppError> {
        sqlx::query_as::<_, UserSession>("SELECT * FROM user_sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn find_active_session_for_device(
        &self,
        user_id: Uuid,
        device_id: &str,
    ) -> Result<Option<UserSession>, AppError> {
        sqlx::query_as::<_, UserSession>(
            r#"
            SELECT * FROM user_sessions
            WHERE user_id = $1 AND device_id_text = $2 AND active_flag = TRUE
            ORDER BY created_utc DESC LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn list_active_sessions(&self, user_id: Uuid) -> Result<Vec<UserSession>, AppError> {
        sqlx::query_as::<_, UserSession>(
            r#"
            SELECT * FROM user_sessions
            WHERE user_id = $1 AND active_flag = TRUE
            ORDER BY created_utc
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn device_seen_before(&self, user_id: Uuid, device_id: &str) -> Result<bool, AppError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM user_sessions WHERE user_id = $1 AND device_id_text = $2",
        )
        .bind(user_id)
        .bind(device_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(count > 0)
    }

    async fn touch_session_by_family(
        &self,
        family_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE user_sessions SET last_activity_utc = $1
            WHERE family_id = $2 AND active_flag = TRUE
            "#,
        )
        .bind(at)
        .bind(family_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn end_session(&self, session_id: Uuid, reason: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE user_sessions
            SET active_flag = FALSE, ended_utc = NOW(), end_reason_code = $1
            WHERE session_id = $2 AND active_flag = TRUE
            "#,
        )
        .bind(reason)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected() == 1)
    }

    async fn end_sessions_by_family(
        &self,
        family_id: Uuid,
        reason: &str,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE user_sessions
            SET active_flag = FALSE, ended_utc = NOW(), end_reason_code = $1
            WHERE family_id = $2 AND active_flag = TRUE
            "#,
        )
        .bind(reason)
        .bind(family_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected())
    }

    async fn end_all_sessions_for_user(
        &self,
        user_id: Uuid,
        reason: &str,
        except: Option<Uuid>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE user_sessions
            SET active_flag = FALSE, ended_utc = NOW(), end_reason_code = $1
            WHERE user_id = $2 AND active_flag = TRUE AND ($3::uuid IS NULL OR session_id <> $3)
            "#,
        )
        .bind(reason)
        .bind(user_id)
        .bind(except)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected())
    }

    // ==================== Login Attempt Operations ====================

    async fn insert_login_attempt(&self, attempt: &LoginAttempt) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO login_attempts (attempt_id, user_id, email_text, ip_text, success_flag,
                failure_reason_code, risk_score, risk_factor_codes, country_code, latitude,
                longitude, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(attempt.attempt_id)
        .bind(attempt.user_id)
        .bind(&attempt.email_text)
        .bind(&attempt.ip_text)
        .bind(attempt.success_flag)
        .bind(&attempt.failure_reason_code)
        .bind(attempt.risk_score)
        .bind(&attempt.risk_factor_codes)
        .bind(&attempt.country_code)
        .bind(attempt.latitude)
        .bind(attempt.longitude)
        .bind(attempt.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn last_successful_login(
        &self,
        user_id: Uuid,
    ) -> Result<Option<LoginAttempt>, AppError> {
        sqlx::query_as::<_, LoginAttempt>(
            r#"
            SELECT * FROM login_attempts
            WHERE user_id = $1 AND success_flag = TRUE
            ORDER BY created_utc DESC LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    // ==================== Blocked IP Operations ====================

    async fn find_blocked_ip(&self, ip: &str) -> Result<Option<BlockedIp>, AppError> {
        sqlx::query_as::<_, BlockedIp>("SELECT * FROM blocked_ips WHERE ip_text = $1")
            .bind(ip)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn save_blocked_ip(&self, entry: &BlockedIp) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO blocked_ips (block_id, ip_text, reason_code, permanent_flag, blocked_utc,
                expiry_utc, failed_count, auto_block_count, blocked_by_text, unblocked_by_text,
                unblocked_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (ip_text) DO UPDATE SET
                reason_code = EXCLUDED.reason_code,
                permanent_flag = EXCLUDED.permanent_flag,
                blocked_utc = EXCLUDED.blocked_utc,
                expiry_utc = EXCLUDED.expiry_utc,
                failed_count = EXCLUDED.failed_count,
                auto_block_count = EXCLUDED.auto_block_count,
                blocked_by_text = EXCLUDED.blocked_by_text,
                unblocked_by_text = EXCLUDED.unblocked_by_text,
                unblocked_utc = EXCLUDED.unblocked_utc
            "#,
        )
        .bind(entry.block_id)
        .bind(&entry.ip_text)
        .bind(&entry.reason_code)
        .bind(entry.permanent_flag)
        .bind(entry.blocked_utc)
        .bind(entry.expiry_utc)
        .bind(entry.failed_count)
        .bind(entry.auto_block_count)
        .bind(&entry.blocked_by_text)
        .bind(&entry.unblocked_by_text)
        .bind(entry.unblocked_utc)
        .bind(entry.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn list_blocked_ips(&self) -> Result<Vec<BlockedIp>, AppError> {
        sqlx::query_as::<_, BlockedIp>("SELECT * FROM blocked_ips ORDER BY created_utc")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    // ==================== OTP Operations ====================

    async fn insert_otp(&self, otp: &OtpCode) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO otp_codes (otp_id, user_id, purpose_code, channel_code, destination_text,
                code_hash_text, expiry_utc, consumed_utc, attempt_count, attempt_max, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(otp.otp_id)
        .bind(otp.user_id)
        .bind(&otp.purpose_code)
        .bind(&otp.channel_code)
        .bind(&otp.destination_text)
        .bind(&otp.code_hash_text)
        .bind(otp.expiry_utc)
        .bind(otp.consumed_utc)
        .bind(otp.attempt_count)
        .bind(otp.attempt_max)
        .bind(otp.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn find_latest_unconsumed_otp(
        &self,
        user_id: Uuid,
        purpose: &str,
    ) -> Result<Option<OtpCode>, AppError> {
        sqlx::query_as::<_, OtpCode>(
            r#"
            SELECT * FROM otp_codes
            WHERE user_id = $1 AND purpose_code = $2 AND consumed_utc IS NULL
            ORDER BY created_utc DESC LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(purpose)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn increment_otp_attempts(&self, otp_id: Uuid) -> Result<i32, AppError> {
        let count: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE otp_codes SET attempt_count = attempt_count + 1
            WHERE otp_id = $1
            RETURNING attempt_count
            "#,
        )
        .bind(otp_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(count.unwrap_or(0))
    }

    async fn consume_otp(&self, otp_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE otp_codes SET consumed_utc = NOW() WHERE otp_id = $1 AND consumed_utc IS NULL",
        )
        .bind(otp_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected() == 1)
    }

    async fn invalidate_unconsumed_otps(
        &self,
        user_id: Uuid,
        purpose: &str,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE otp_codes SET consumed_utc = NOW()
            WHERE user_id = $1 AND purpose_code = $2 AND consumed_utc IS NULL
            "#,
        )
        .bind(user_id)
        .bind(purpose)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected())
    }

    // ==================== Recovery Code Operations ====================

    async fn replace_backup_codes(
        &self,
        user_id: Uuid,
        codes: &[TwoFactorBackupCode],
    ) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        sqlx::query("DELETE FROM backup_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        for code in codes {
            sqlx::query(
                r#"
                INSERT INTO backup_codes (code_id, user_id, code_hash_text, used_utc,
                    used_from_ip_text, created_utc)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(code.code_id)
            .bind(code.user_id)
            .bind(&code.code_hash_text)
            .bind(code.used_utc)
            .bind(&code.used_from_ip_text)
            .bind(code.created_utc)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn list_unused_backup_codes(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<TwoFactorBackupCode>, AppError> {
        sqlx::query_as::<_, TwoFactorBackupCode>(
            "SELECT * FROM backup_codes WHERE user_id = $1 AND used_utc IS NULL",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn use_backup_code(&self, code_id: Uuid, ip: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE backup_codes SET used_utc = NOW(), used_from_ip_text = $1
            WHERE code_id = $2 AND used_utc IS NULL
            "#,
        )
        .bind(ip)
        .bind(code_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected() == 1)
    }

    async fn count_unused_backup_codes(&self, user_id: Uuid) -> Result<i64, AppError> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM backup_codes WHERE user_id = $1 AND used_utc IS NULL",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn delete_backup_codes(&self, user_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM backup_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected())
    }

    // ==================== Security Alert Operations ====================

    async fn insert_alert(&self, alert: &SecurityAlert) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO security_alerts (alert_id, alert_type_code, severity_code, user_id,
                ip_text, device_text, detail_text, read_flag, resolved_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(alert.alert_id)
        .bind(&alert.alert_type_code)
        .bind(&alert.severity_code)
        .bind(alert.user_id)
        .bind(&alert.ip_text)
        .bind(&alert.device_text)
        .bind(&alert.detail_text)
        .bind(alert.read_flag)
        .bind(alert.resolved_utc)
        .bind(alert.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn list_alerts_for_user(&self, user_id: Uuid) -> Result<Vec<SecurityAlert>, AppError> {
        sqlx::query_as::<_, SecurityAlert>(
            "SELECT * FROM security_alerts WHERE user_id = $1 ORDER BY created_utc DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn mark_alert_read(&self, alert_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE security_alerts SET read_flag = TRUE WHERE alert_id = $1 AND read_flag = FALSE",
        )
        .bind(alert_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected() == 1)
    }

    // ==================== Maintenance ====================

    async fn purge_expired(&self) -> Result<u64, AppError> {
        let result = sqlx::query(
            "DELETE FROM otp_codes WHERE consumed_utc IS NULL AND expiry_utc < NOW()",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected())
    }
}
