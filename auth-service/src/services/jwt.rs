use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fs;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::User;

const CHALLENGE_PURPOSE: &str = "two_factor_challenge";

/// JWT service for token generation and validation
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expiry_minutes: i64,
    challenge_token_expiry_minutes: i64,
}

/// Claims for access tokens (short-lived). Validation is stateless: signature
/// plus expiry, no store lookup. The short TTL bounds exposure after a
/// refresh chain is revoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Email
    pub email: String,
    /// Granted roles
    pub roles: Vec<String>,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// JWT ID
    pub jti: String,
}

/// Claims for the short-lived 2FA step-up challenge. Not a session: it only
/// proves the password check already passed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeTokenClaims {
    pub sub: String,
    pub purpose: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

/// Token pair returned to the client.
#[derive(Debug, Serialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl JwtService {
    /// Create a new JWT service by loading RSA keys from files
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let private_key_pem = fs::read_to_string(&config.private_key_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read private key from {}: {}",
                config.private_key_path,
                e
            )
        })?;

        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("Failed to parse private key: {}", e))?;

        let public_key_pem = fs::read_to_string(&config.public_key_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read public key from {}: {}",
                config.public_key_path,
                e
            )
        })?;

        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("Failed to parse public key: {}", e))?;

        tracing::info!("JWT service initialized with RS256 keys");

        Ok(Self {
            encoding_key,
            decoding_key,
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            challenge_token_expiry_minutes: config.challenge_token_expiry_minutes,
        })
    }

    /// Generate an access token for a user
    pub fn generate_access_token(&self, user: &User) -> Result<String, anyhow::Error> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.access_token_expiry_minutes);

        let claims = AccessTokenClaims {
            sub: user.user_id.to_string(),
            email: user.email.clone(),
            roles: user.roles.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let header = Header::new(Algorithm::RS256);
        let token = encode(&header, &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))?;

        Ok(token)
    }

    /// Validate and decode an access token
    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, anyhow::Error> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;

        let token_data = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| anyhow::anyhow!("Invalid access token: {}", e))?;

        Ok(token_data.claims)
    }

    /// Generate a 2FA challenge token for a user mid-login
    pub fn generate_challenge_token(&self, user_id: Uuid) -> Result<String, anyhow::Error> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.challenge_token_expiry_minutes);

        let claims = ChallengeTokenClaims {
            sub: user_id.to_string(),
            purpose: CHALLENGE_PURPOSE.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let header = Header::new(Algorithm::RS256);
        let token = encode(&header, &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode challenge token: {}", e))?;

        Ok(token)
    }

    /// Validate a 2FA challenge token, returning the user id it vouches for
    pub fn validate_challenge_token(&self, token: &str) -> Result<Uuid, anyhow::Error> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;

        let token_data = decode::<ChallengeTokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| anyhow::anyhow!("Invalid challenge token: {}", e))?;

        if token_data.claims.purpose != CHALLENGE_PURPOSE {
            return Err(anyhow::anyhow!("Wrong token purpose"));
        }

        Uuid::parse_str(&token_data.claims.sub)
            .map_err(|e| anyhow::anyhow!("Invalid subject in challenge token: {}", e))
    }

    /// Get access token expiry in seconds (for client info)
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TEST_PRIVATE_KEY: &str = include_str!("../../tests/fixtures/jwt_test_key.pem");
    const TEST_PUBLIC_KEY: &str = include_str!("../../tests/fixtures/jwt_test_key_pub.pem");

    fn test_service() -> (JwtService, NamedTempFile, NamedTempFile) {
        let mut private_file = NamedTempFile::new().unwrap();
        private_file.write_all(TEST_PRIVATE_KEY.as_bytes()).unwrap();
        let mut public_file = NamedTempFile::new().unwrap();
        public_file.write_all(TEST_PUBLIC_KEY.as_bytes()).unwrap();

        let config = JwtConfig {
            private_key_path: private_file.path().to_str().unwrap().to_string(),
            public_key_path: public_file.path().to_str().unwrap().to_string(),
            access_token_expiry_minutes: 15,
            challenge_token_expiry_minutes: 5,
        };

        let service = JwtService::new(&config).expect("Failed to create JWT service");
        (service, private_file, public_file)
    }

    #[test]
    fn test_access_token_round_trip() {
        let (service, _priv, _pub) = test_service();
        let user = User::new("test@example.com".to_string(), "hash".to_string(), None);

        let token = service.generate_access_token(&user).unwrap();
        let claims = service.validate_access_token(&token).unwrap();

        assert_eq!(claims.sub, user.user_id.to_string());
        assert_eq!(claims.email, "test@example.com");
        assert_eq!(claims.roles, vec!["user".to_string()]);
    }

    #[test]
    fn test_garbage_access_token_is_rejected() {
        let (service, _priv, _pub) = test_service();
        assert!(service.validate_access_token("not-a-jwt").is_err());
    }

    #[test]
    fn test_challenge_token_round_trip() {
        let (service, _priv, _pub) = test_service();
        let user_id = Uuid::new_v4();

        let token = service.generate_challenge_token(user_id).unwrap();
        assert_eq!(service.validate_challenge_token(&token).unwrap(), user_id);
    }

    #[test]
    fn test_access_token_is_not_a_valid_challenge() {
        let (service, _priv, _pub) = test_service();
        let user = User::new("test@example.com".to_string(), "hash".to_string(), None);

        let access = service.generate_access_token(&user).unwrap();
        // Purpose claim is missing, so the challenge check must fail
        assert!(service.validate_challenge_token(&access).is_err());
    }
}
