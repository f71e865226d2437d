//! Auth orchestrator: composes the gates, credential check, step-up
//! challenge, token issue and logout flows. The only service other
//! subsystems call directly.

use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

use crate::dtos::auth::{DeviceInfo, IntrospectResponse, LogoutScope};
use crate::models::{
    AlertSeverity, AlertType, FailureReason, LoginAttempt, OtpPurpose, RevokeReason,
    SecurityAlert, User,
};
use crate::services::alerts::SecurityAlertPublisher;
use crate::services::error::AuthError;
use crate::services::ip_block::IpBlockRegistry;
use crate::services::jwt::{JwtService, TokenResponse};
use crate::services::rate_limit::{RateAction, RateLimitService};
use crate::services::risk::{RiskAssessment, RiskAssessor, RiskLevel};
use crate::services::store::AuthStore;
use crate::services::token::{RefreshError, TokenService};
use crate::services::two_factor::TwoFactorAuthenticator;
use crate::utils::{verify_password, Password, PasswordHashString};

/// Outcome of the first login phase.
pub enum LoginOutcome {
    Success(TokenResponse),
    /// Password was right but a second factor is required: either the user
    /// has 2FA enabled, or risk forced a step-up challenge.
    TwoFactorRequired {
        challenge_token: String,
        method: String,
    },
}

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn AuthStore>,
    jwt: JwtService,
    tokens: TokenService,
    limiter: RateLimitService,
    ip_blocks: IpBlockRegistry,
    risk: RiskAssessor,
    two_factor: TwoFactorAuthenticator,
    alerts: SecurityAlertPublisher,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn AuthStore>,
        jwt: JwtService,
        tokens: TokenService,
        limiter: RateLimitService,
        ip_blocks: IpBlockRegistry,
        risk: RiskAssessor,
        two_factor: TwoFactorAuthenticator,
        alerts: SecurityAlertPublisher,
    ) -> Self {
        Self {
            store,
            jwt,
            tokens,
            limiter,
            ip_blocks,
            risk,
            two_factor,
            alerts,
        }
    }

    /// Login flow: IP gate, rate gate, credential check, then either a
    /// step-up challenge or a fresh token chain.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        device: &DeviceInfo,
        ip: &str,
    ) -> Result<LoginOutcome, AuthError> {
        // IpGate
        if self.ip_blocks.is_blocked(ip).await? {
            return Err(AuthError::IpBlocked {
                retry_after: self.ip_blocks.retry_after_secs(ip).await?,
            });
        }

        // RateGate: the attempt is recorded whatever the outcome
        let limited = self.limiter.is_rate_limited(ip, RateAction::Login).await?;
        self.limiter.record_attempt(ip, RateAction::Login).await?;
        if limited {
            return Err(AuthError::RateLimited {
                retry_after: self.limiter.retry_after_secs(RateAction::Login),
            });
        }

        // CredentialCheck
        let Some(user) = self.store.find_user_by_email(email).await? else {
            self.record_failure(None, email, ip, FailureReason::InvalidCredentials, None)
                .await?;
            return Err(AuthError::InvalidCredentials);
        };

        let risk = self.risk.assess(ip, Some(user.user_id)).await?;

        if !user.enabled_flag {
            self.record_failure(
                Some(&user),
                email,
                ip,
                FailureReason::AccountDisabled,
                Some(&risk),
            )
            .await?;
            return Err(AuthError::AccountDisabled);
        }

        if verify_password(
            &Password::new(password.to_string()),
            &PasswordHashString::new(user.password_hash.clone()),
        )
        .is_err()
        {
            self.record_failure(
                Some(&user),
                email,
                ip,
                FailureReason::InvalidCredentials,
                Some(&risk),
            )
            .await?;
            return Err(AuthError::InvalidCredentials);
        }

        // Step-up: enrolled users always, everyone when risk is elevated
        if user.two_factor_enabled() || risk.level >= RiskLevel::High {
            return self.start_challenge(&user, &risk).await;
        }

        let tokens = self.complete_login(&user, device, ip, &risk).await?;
        Ok(LoginOutcome::Success(tokens))
    }

    async fn start_challenge(
        &self,
        user: &User,
        risk: &RiskAssessment,
    ) -> Result<LoginOutcome, AuthError> {
        let method = user
            .two_factor_method()
            .map(|m| m.as_str())
            // Risk-forced step-up for users without 2FA goes over email
            .unwrap_or("email");

        if method != "totp" {
            self.two_factor
                .send_otp(user, OtpPurpose::TwoFactorAuth)
                .await?;
        }

        let challenge_token = self
            .jwt
            .generate_challenge_token(user.user_id)
            .map_err(|e| AuthError::Internal(AppError::InternalError(e)))?;

        tracing::info!(
            user_id = %user.user_id,
            method = method,
            risk_level = risk.level.as_str(),
            "Two-factor challenge issued"
        );

        Ok(LoginOutcome::TwoFactorRequired {
            challenge_token,
            method: method.to_string(),
        })
    }

    /// Second login phase: answer the challenge with a TOTP/OTP code or a
    /// recovery code.
    pub async fn login_two_factor(
        &self,
        challenge_token: &str,
        code: Option<&str>,
        recovery_code: Option<&str>,
        device: &DeviceInfo,
        ip: &str,
    ) -> Result<TokenResponse, AuthError> {
        let user_id = self
            .jwt
            .validate_challenge_token(challenge_token)
            .map_err(|_| AuthError::TokenInvalid)?;
        let Some(user) = self.store.find_user_by_id(user_id).await? else {
            return Err(AuthError::InvalidCredentials);
        };

        let verdict = match (code, recovery_code) {
            (_, Some(recovery)) => {
                self.two_factor
                    .validate_recovery_code(&user, recovery, ip)
                    .await
            }
            (Some(code), None) if user.two_factor_enabled() => {
                self.two_factor.validate_code(&user, code).await
            }
            // Risk-forced step-up for users without enrolled 2FA
            (Some(code), None) => {
                self.two_factor
                    .validate_otp(&user, code, OtpPurpose::TwoFactorAuth)
                    .await
            }
            (None, None) => Err(AuthError::TwoFactorInvalid),
        };

        let risk = self.risk.assess(ip, Some(user.user_id)).await?;
        if let Err(e) = verdict {
            self.record_failure(
                Some(&user),
                &user.email,
                ip,
                FailureReason::TwoFactorInvalid,
                Some(&risk),
            )
            .await?;
            return Err(e);
        }

        self.complete_login(&user, device, ip, &risk).await
    }

    /// TokenIssue: new chain + session, success audit row, counter reset.
    async fn complete_login(
        &self,
        user: &User,
        device: &DeviceInfo,
        ip: &str,
        risk: &RiskAssessment,
    ) -> Result<TokenResponse, AuthError> {
        let seen_device = self
            .store
            .device_seen_before(user.user_id, &device.device_id)
            .await?;
        let has_prior_login = self
            .store
            .last_successful_login(user.user_id)
            .await?
            .is_some();

        let issued = self
            .tokens
            .issue(
                user,
                &device.device_id,
                device.device_name.clone(),
                ip,
                risk.geo.country_code.clone(),
            )
            .await?;

        self.store
            .insert_login_attempt(&LoginAttempt::success(
                user.user_id,
                &user.email,
                ip,
                risk.score as i32,
                risk.factor_codes(),
                risk.geo.country_code.clone(),
                risk.geo.latitude,
                risk.geo.longitude,
            ))
            .await?;
        self.limiter.clear_attempts(ip, RateAction::Login).await?;

        if !seen_device && has_prior_login {
            self.alerts
                .publish_and_notify(
                    SecurityAlert::new_device_login(user.user_id, ip, &device.device_id),
                    &user.email,
                )
                .await?;
        }

        tracing::info!(user_id = %user.user_id, device = %device.device_id, "Login completed");
        Ok(issued.tokens)
    }

    /// Refresh flow. On theft detection the chain is already fully revoked;
    /// when risk is elevated the response widens to every session the user
    /// has.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        device_id: Option<&str>,
        ip: &str,
    ) -> Result<TokenResponse, AuthError> {
        match self.tokens.refresh(refresh_token, device_id).await {
            Ok(pair) => Ok(pair),
            Err(RefreshError::Invalid) => Err(AuthError::TokenInvalid),
            Err(RefreshError::Expired) => Err(AuthError::TokenExpired),
            Err(RefreshError::Store(e)) => Err(AuthError::Internal(e)),
            Err(RefreshError::Reused { user_id }) => {
                let risk = self.risk.assess(ip, Some(user_id)).await?;
                if risk.level >= RiskLevel::High {
                    tracing::warn!(
                        user_id = %user_id,
                        risk_level = risk.level.as_str(),
                        "Token reuse under elevated risk; revoking all sessions"
                    );
                    self.tokens
                        .revoke_all_for_user(user_id, RevokeReason::Compromised)
                        .await?;
                }
                Err(AuthError::TokenReused)
            }
        }
    }

    /// Logout: this device revokes the chain head and ends its session;
    /// everywhere revokes all chains and sessions.
    pub async fn logout(&self, refresh_token: &str, scope: LogoutScope) -> Result<(), AuthError> {
        match scope {
            LogoutScope::ThisDevice => {
                let Some(token) = self
                    .tokens
                    .revoke_presented(refresh_token, RevokeReason::Logout)
                    .await?
                else {
                    return Err(AuthError::TokenInvalid);
                };
                self.tokens
                    .revoke_chain(token.family_id, RevokeReason::Logout)
                    .await?;
                self.store
                    .end_sessions_by_family(token.family_id, "logout")
                    .await?;
                tracing::info!(user_id = %token.user_id, "Logged out device");
            }
            LogoutScope::AllDevices => {
                let Some(token) = self
                    .tokens
                    .revoke_presented(refresh_token, RevokeReason::LogoutAll)
                    .await?
                else {
                    return Err(AuthError::TokenInvalid);
                };
                self.tokens
                    .revoke_all_for_user(token.user_id, RevokeReason::LogoutAll)
                    .await?;
                tracing::info!(user_id = %token.user_id, "Logged out everywhere");
            }
        }
        Ok(())
    }

    /// Password change revokes every chain and session.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let Some(user) = self.store.find_user_by_id(user_id).await? else {
            return Err(AuthError::InvalidCredentials);
        };
        verify_password(
            &Password::new(current_password.to_string()),
            &PasswordHashString::new(user.password_hash.clone()),
        )
        .map_err(|_| AuthError::InvalidCredentials)?;

        let new_hash = crate::utils::hash_password(&Password::new(new_password.to_string()))
            .map_err(|e| AuthError::Internal(AppError::InternalError(e)))?;
        self.store
            .update_user_password(user_id, new_hash.as_str())
            .await?;
        self.tokens
            .revoke_all_for_user(user_id, RevokeReason::PasswordChange)
            .await?;

        self.alerts
            .publish_and_notify(
                SecurityAlert::new(
                    AlertType::PasswordChanged,
                    AlertSeverity::Info,
                    Some(user_id),
                    None,
                    None,
                    "Account password was changed",
                ),
                &user.email,
            )
            .await?;
        Ok(())
    }

    /// Request a password-reset code. Always succeeds from the caller's
    /// point of view so the endpoint cannot be used to enumerate accounts.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        if let Some(user) = self.store.find_user_by_email(email).await? {
            match self.two_factor.send_otp(&user, OtpPurpose::PasswordReset).await {
                Ok(()) => {}
                Err(AuthError::RateLimited { .. }) => {
                    tracing::warn!(user_id = %user.user_id, "Password reset send rate limited");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Confirm a password reset with the emailed code; revokes everything.
    pub async fn confirm_password_reset(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let Some(user) = self.store.find_user_by_email(email).await? else {
            return Err(AuthError::InvalidCredentials);
        };
        self.two_factor
            .validate_otp(&user, code, OtpPurpose::PasswordReset)
            .await?;

        let new_hash = crate::utils::hash_password(&Password::new(new_password.to_string()))
            .map_err(|e| AuthError::Internal(AppError::InternalError(e)))?;
        self.store
            .update_user_password(user.user_id, new_hash.as_str())
            .await?;
        self.tokens
            .revoke_all_for_user(user.user_id, RevokeReason::PasswordChange)
            .await?;

        self.alerts
            .publish_and_notify(
                SecurityAlert::new(
                    AlertType::PasswordChanged,
                    AlertSeverity::Warning,
                    Some(user.user_id),
                    None,
                    None,
                    "Password was reset via emailed code",
                ),
                &user.email,
            )
            .await?;
        Ok(())
    }

    /// Stateless token introspection for the content services.
    pub fn introspect(&self, token: &str) -> IntrospectResponse {
        match self.tokens.validate_access_token(token) {
            Ok(claims) => IntrospectResponse {
                active: true,
                sub: Some(claims.sub),
                email: Some(claims.email),
                roles: Some(claims.roles),
                exp: Some(claims.exp),
                iat: Some(claims.iat),
                jti: Some(claims.jti),
            },
            Err(_) => IntrospectResponse {
                active: false,
                sub: None,
                email: None,
                roles: None,
                exp: None,
                iat: None,
                jti: None,
            },
        }
    }

    async fn record_failure(
        &self,
        user: Option<&User>,
        email: &str,
        ip: &str,
        reason: FailureReason,
        risk: Option<&RiskAssessment>,
    ) -> Result<(), AuthError> {
        self.ip_blocks
            .process_failed_attempt(ip, risk.map(|r| r.level))
            .await?;
        self.store
            .insert_login_attempt(&LoginAttempt::failure(
                user.map(|u| u.user_id),
                email,
                ip,
                reason,
                risk.map(|r| r.score as i32).unwrap_or(0),
                risk.map(|r| r.factor_codes()).unwrap_or_default(),
            ))
            .await?;
        Ok(())
    }
}
