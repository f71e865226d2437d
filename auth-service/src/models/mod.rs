//! Domain models for the auth core.

mod backup_code;
mod blocked_ip;
mod login_attempt;
mod otp_code;
mod refresh_token;
mod security_alert;
mod user;
mod user_session;

pub use backup_code::TwoFactorBackupCode;
pub use blocked_ip::{BlockReason, BlockedIp};
pub use login_attempt::{FailureReason, LoginAttempt};
pub use otp_code::{OtpChannel, OtpCode, OtpPurpose};
pub use refresh_token::{RefreshToken, RevokeReason};
pub use security_alert::{AlertSeverity, AlertType, SecurityAlert};
pub use user::{SanitizedUser, TwoFactorMethod, TwoFactorState, User};
pub use user_session::{SessionEndReason, SessionInfo, UserSession};
