//! Services layer for the auth core.
//!
//! Composition order follows the dependency chain: counters and the block
//! registry sit under risk assessment, which feeds the orchestrator; the
//! token service owns rotation and theft detection; the alert publisher is
//! a pure sink.

mod alerts;
mod auth;
mod database;
mod email;
pub mod error;
mod ip_block;
mod jwt;
mod rate_limit;
mod risk;
mod session;
mod sms;
pub mod store;
mod token;
mod two_factor;

pub use alerts::SecurityAlertPublisher;
pub use auth::{AuthService, LoginOutcome};
pub use database::Database;
pub use email::{EmailProvider, EmailService, MockEmailService};
pub use error::AuthError;
pub use ip_block::{AutoBlockPolicy, IpBlockRegistry};
pub use jwt::{AccessTokenClaims, ChallengeTokenClaims, JwtService, TokenResponse};
pub use rate_limit::{
    AttemptCounter, MemoryCounter, RateAction, RateLimitRules, RateLimitService, RateRule,
    RedisCounter,
};
pub use risk::{
    GeoInfo, GeoIpProvider, HttpGeoProvider, RiskAssessment, RiskAssessor, RiskFactor, RiskLevel,
    StaticGeoProvider,
};
pub use session::{SessionManager, SessionPolicy};
pub use sms::{MockSmsService, SmsProvider, WebhookSmsService};
pub use store::{AuthStore, MemoryStore};
pub use token::{IssuedTokens, RefreshError, TokenService};
pub use two_factor::{TotpSetup, TwoFactorAuthenticator, TwoFactorConfig};
