use service_core::error::AppError;
use thiserror::Error;

/// Typed outcomes of the auth flows. Every variant is returned to the
/// orchestrator's caller as a value, never thrown through as a generic
/// failure; the `From<AuthError> for AppError` impl decides what the HTTP
/// caller actually learns.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account disabled")]
    AccountDisabled,

    #[error("IP address is blocked")]
    IpBlocked { retry_after: Option<u64> },

    #[error("Too many attempts")]
    RateLimited { retry_after: u64 },

    #[error("Two-factor code invalid")]
    TwoFactorInvalid,

    #[error("Two-factor setup state invalid")]
    TwoFactorStateInvalid,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Token reuse detected")]
    TokenReused,

    #[error("Session revoked")]
    SessionRevoked,

    #[error(transparent)]
    Internal(#[from] AppError),
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            // Deliberately indistinguishable to the caller: do not reveal
            // whether a password was wrong, a 2FA code was wrong, or a
            // refresh token was replayed. Internal logs keep full detail.
            AuthError::InvalidCredentials
            | AuthError::AccountDisabled
            | AuthError::TwoFactorInvalid
            | AuthError::TokenReused => {
                AppError::AuthError(anyhow::anyhow!("Authentication failed"))
            }
            AuthError::IpBlocked { retry_after } => AppError::Forbidden(
                "Access from this address is temporarily blocked".to_string(),
                retry_after,
            ),
            AuthError::RateLimited { retry_after } => AppError::TooManyRequests(
                "Too many attempts. Please try again later.".to_string(),
                Some(retry_after),
            ),
            AuthError::TwoFactorStateInvalid => {
                AppError::Conflict(anyhow::anyhow!("Two-factor state does not allow this action"))
            }
            AuthError::TokenExpired => {
                AppError::Unauthorized(anyhow::anyhow!("Token expired"))
            }
            AuthError::TokenInvalid => AppError::Unauthorized(anyhow::anyhow!("Invalid token")),
            AuthError::SessionRevoked => {
                AppError::Unauthorized(anyhow::anyhow!("Session has been revoked"))
            }
            AuthError::Internal(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_and_reuse_errors_collapse_to_same_message() {
        let a = AppError::from(AuthError::InvalidCredentials);
        let b = AppError::from(AuthError::TwoFactorInvalid);
        let c = AppError::from(AuthError::TokenReused);

        // All three must render identically to avoid leaking which one it was
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(b.to_string(), c.to_string());
    }
}
