use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Device descriptor supplied by the client at login and refresh.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct DeviceInfo {
    #[validate(length(min = 1, max = 128, message = "Device id is required"))]
    #[schema(example = "f3c9a2e0-browser")]
    pub device_id: String,

    #[schema(example = "Firefox on Linux")]
    pub device_name: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "password123")]
    pub password: String,

    #[validate(nested)]
    pub device: DeviceInfo,
}

/// Either a fresh token pair or a step-up challenge.
#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum LoginResponse {
    Tokens(crate::services::TokenResponse),
    TwoFactorRequired {
        two_factor_required: bool,
        challenge_token: String,
        method: String,
    },
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct TwoFactorLoginRequest {
    #[validate(length(min = 1, message = "Challenge token is required"))]
    pub challenge_token: String,

    /// TOTP or delivered OTP code.
    #[schema(example = "492031")]
    pub code: Option<String>,

    /// Recovery code, accepted instead of `code`.
    #[schema(example = "AB12-CD34")]
    pub recovery_code: Option<String>,

    #[validate(nested)]
    pub device: DeviceInfo,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,

    /// When supplied, must match the device the chain was issued to.
    #[serde(default)]
    #[validate(nested)]
    pub device: Option<DeviceInfo>,
}

/// Logout scope: this device only, or every device.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LogoutScope {
    #[default]
    ThisDevice,
    AllDevices,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LogoutRequest {
    pub refresh_token: String,
    #[serde(default)]
    pub scope: LogoutScope,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct IntrospectRequest {
    pub token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IntrospectResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PasswordResetRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PasswordResetConfirm {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Code is required"))]
    pub code: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyTwoFactorSetupRequest {
    #[validate(length(min = 6, max = 8, message = "Code is required"))]
    #[schema(example = "492031")]
    pub code: String,
}

/// Recovery codes are shown exactly once, at enrollment.
#[derive(Debug, Serialize, ToSchema)]
pub struct RecoveryCodesResponse {
    pub recovery_codes: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SendOtpRequest {
    /// Challenge token from the first login phase.
    pub challenge_token: String,
}
