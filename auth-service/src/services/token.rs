//! Token issuance, rotation and theft detection.
//!
//! Refresh tokens are opaque one-use values: the client must always present
//! the most recently issued token of its chain. Presenting any earlier token
//! is by definition evidence of reuse, and the whole chain is revoked. Two
//! racing refreshes with the same valid token are split by a conditional
//! mark-used update; the loser lands on the reuse path as well - a deliberate
//! false-positive tradeoff that favors security over availability, so clients
//! must not fire concurrent refreshes.

use rand::Rng;
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{RefreshToken, RevokeReason, SecurityAlert, SessionEndReason, User, UserSession};
use crate::services::alerts::SecurityAlertPublisher;
use crate::services::jwt::{JwtService, TokenResponse};
use crate::services::session::SessionManager;
use crate::services::store::AuthStore;

/// Guard on chain traversal; a longer chain means corrupted pointers.
const MAX_CHAIN_WALK: usize = 1024;

/// Typed refresh outcomes, mirroring the external contract:
/// new pair, theft detected, expired, or invalid.
#[derive(Debug)]
pub enum RefreshError {
    Invalid,
    Expired,
    Reused { user_id: Uuid },
    Store(AppError),
}

impl From<AppError> for RefreshError {
    fn from(err: AppError) -> Self {
        RefreshError::Store(err)
    }
}

/// Everything a completed login hands back.
pub struct IssuedTokens {
    pub tokens: TokenResponse,
    pub session: UserSession,
    pub family_id: Uuid,
}

#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn AuthStore>,
    jwt: JwtService,
    sessions: SessionManager,
    alerts: SecurityAlertPublisher,
    refresh_ttl_days: i64,
}

impl TokenService {
    pub fn new(
        store: Arc<dyn AuthStore>,
        jwt: JwtService,
        sessions: SessionManager,
        alerts: SecurityAlertPublisher,
        refresh_ttl_days: i64,
    ) -> Self {
        Self {
            store,
            jwt,
            sessions,
            alerts,
            refresh_ttl_days,
        }
    }

    /// Opaque refresh token value: 256 bits of randomness, hex-encoded.
    fn generate_opaque_token() -> String {
        let mut rng = rand::thread_rng();
        let token_bytes: [u8; 32] = rng.gen();
        hex::encode(token_bytes)
    }

    /// Start a brand-new chain plus its session and access token.
    pub async fn issue(
        &self,
        user: &User,
        device_id: &str,
        device_name: Option<String>,
        ip: &str,
        country_code: Option<String>,
    ) -> Result<IssuedTokens, AppError> {
        let refresh_value = Self::generate_opaque_token();
        let root = RefreshToken::new_root(user.user_id, device_id, &refresh_value, self.refresh_ttl_days);
        self.store.insert_refresh_token(&root).await?;

        let session = self
            .sessions
            .create(
                user.user_id,
                root.family_id,
                device_id,
                device_name,
                ip,
                country_code,
            )
            .await?;

        let access_token = self.jwt.generate_access_token(user)?;

        tracing::info!(user_id = %user.user_id, family_id = %root.family_id, "Issued new token chain");

        Ok(IssuedTokens {
            tokens: TokenResponse {
                access_token,
                refresh_token: refresh_value,
                token_type: "Bearer".to_string(),
                expires_in: self.jwt.access_token_expiry_seconds(),
            },
            session,
            family_id: root.family_id,
        })
    }

    /// Rotate the presented token: exactly one concurrent caller receives a
    /// new pair; a replayed, revoked or race-losing token triggers the theft
    /// response before the error is returned.
    pub async fn refresh(
        &self,
        presented: &str,
        device_id: Option<&str>,
    ) -> Result<TokenResponse, RefreshError> {
        let hash = RefreshToken::hash_token(presented);
        let Some(token) = self.store.find_refresh_token_by_hash(&hash).await? else {
            return Err(RefreshError::Invalid);
        };

        // Constant-time re-check of the stored digest
        if !token.hash_matches(presented) {
            return Err(RefreshError::Invalid);
        }

        // The chain is bound to the device it was issued to
        if device_id.is_some_and(|d| d != token.device_id_text) {
            return Err(RefreshError::Invalid);
        }

        // Benign: expiry leaves the chain as-is
        if token.is_expired() {
            return Err(RefreshError::Expired);
        }

        if token.is_used() || token.is_revoked() {
            self.respond_to_reuse(&token).await?;
            return Err(RefreshError::Reused {
                user_id: token.user_id,
            });
        }

        let new_value = Self::generate_opaque_token();
        let successor = token.successor(&new_value, self.refresh_ttl_days);

        // The losing side of a concurrent refresh observes used_utc already
        // set and is treated as reuse.
        if !self
            .store
            .mark_token_used(token.token_id, successor.token_id)
            .await?
        {
            self.respond_to_reuse(&token).await?;
            return Err(RefreshError::Reused {
                user_id: token.user_id,
            });
        }

        self.store.insert_refresh_token(&successor).await?;
        self.sessions.touch_by_family(token.family_id).await;

        let Some(user) = self.store.find_user_by_id(token.user_id).await? else {
            return Err(RefreshError::Invalid);
        };
        let access_token = self
            .jwt
            .generate_access_token(&user)
            .map_err(|e| RefreshError::Store(AppError::InternalError(e)))?;

        tracing::debug!(user_id = %user.user_id, family_id = %token.family_id, "Refresh token rotated");

        Ok(TokenResponse {
            access_token,
            refresh_token: new_value,
            token_type: "Bearer".to_string(),
            expires_in: self.jwt.access_token_expiry_seconds(),
        })
    }

    /// Theft response: revoke the whole chain, end the session, raise a
    /// critical alert. Runs to completion before the caller sees the error.
    async fn respond_to_reuse(&self, token: &RefreshToken) -> Result<(), AppError> {
        tracing::warn!(
            user_id = %token.user_id,
            family_id = %token.family_id,
            token_id = %token.token_id,
            "Refresh token reuse detected; revoking chain"
        );

        self.revoke_chain(token.family_id, RevokeReason::Compromised)
            .await?;
        self.sessions
            .end_by_family(token.family_id, SessionEndReason::Compromised)
            .await?;

        let alert = SecurityAlert::token_reuse(
            token.user_id,
            None,
            &token.device_id_text,
            token.family_id,
        );
        match self.store.find_user_by_id(token.user_id).await? {
            Some(user) => self.alerts.publish_and_notify(alert, &user.email).await,
            None => self.alerts.publish(alert).await,
        }
    }

    /// Walk the chain from the family root along `replaced_by` pointers,
    /// revoking every token. Iterative and bounded: corrupted pointers must
    /// not turn this into an unbounded traversal.
    pub async fn revoke_chain(
        &self,
        family_id: Uuid,
        reason: RevokeReason,
    ) -> Result<(), AppError> {
        let mut next = Some(family_id);
        let mut steps = 0;

        while let Some(token_id) = next {
            if steps >= MAX_CHAIN_WALK {
                tracing::error!(
                    family_id = %family_id,
                    "Chain walk exceeded {} links; aborting traversal",
                    MAX_CHAIN_WALK
                );
                break;
            }
            let Some(token) = self.store.find_refresh_token_by_id(token_id).await? else {
                break;
            };
            if !token.is_revoked() {
                self.store
                    .revoke_token(token.token_id, reason.as_str())
                    .await?;
            }
            next = token.replaced_by;
            steps += 1;
        }
        Ok(())
    }

    /// Targeted revocation of a presented token ("log out this device"):
    /// only the chain head is revoked, the rest of the chain is history.
    pub async fn revoke_presented(
        &self,
        presented: &str,
        reason: RevokeReason,
    ) -> Result<Option<RefreshToken>, AppError> {
        let hash = RefreshToken::hash_token(presented);
        let Some(token) = self.store.find_refresh_token_by_hash(&hash).await? else {
            return Ok(None);
        };
        if !token.hash_matches(presented) {
            return Ok(None);
        }
        self.store
            .revoke_token(token.token_id, reason.as_str())
            .await?;
        Ok(Some(token))
    }

    /// Revoke every active token across all of a user's chains and end all
    /// sessions. Used on password change and "log out everywhere".
    pub async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        reason: RevokeReason,
    ) -> Result<u64, AppError> {
        let revoked = self
            .store
            .revoke_tokens_for_user(user_id, reason.as_str())
            .await?;
        let session_reason = match reason {
            RevokeReason::Compromised => SessionEndReason::Compromised,
            RevokeReason::LogoutAll => SessionEndReason::LogoutAll,
            _ => SessionEndReason::Revoked,
        };
        self.sessions.end_all_for_user(user_id, session_reason).await?;

        tracing::info!(user_id = %user_id, revoked = revoked, reason = reason.as_str(), "Revoked all tokens for user");
        Ok(revoked)
    }

    /// Stateless signature + expiry check; deliberately no store lookup.
    pub fn validate_access_token(
        &self,
        token: &str,
    ) -> Result<crate::services::jwt::AccessTokenClaims, anyhow::Error> {
        self.jwt.validate_access_token(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::session::SessionPolicy;
    use crate::services::store::MemoryStore;
    use crate::config::JwtConfig;
    use std::io::Write;

    fn jwt_service() -> (JwtService, tempfile::NamedTempFile, tempfile::NamedTempFile) {
        let mut private_file = tempfile::NamedTempFile::new().unwrap();
        private_file
            .write_all(include_bytes!("../../tests/fixtures/jwt_test_key.pem"))
            .unwrap();
        let mut public_file = tempfile::NamedTempFile::new().unwrap();
        public_file
            .write_all(include_bytes!("../../tests/fixtures/jwt_test_key_pub.pem"))
            .unwrap();

        let config = JwtConfig {
            private_key_path: private_file.path().to_str().unwrap().to_string(),
            public_key_path: public_file.path().to_str().unwrap().to_string(),
            access_token_expiry_minutes: 15,
            challenge_token_expiry_minutes: 5,
        };
        (JwtService::new(&config).unwrap(), private_file, public_file)
    }

    struct Fixture {
        service: TokenService,
        store: Arc<dyn AuthStore>,
        user: User,
        _keys: (tempfile::NamedTempFile, tempfile::NamedTempFile),
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn AuthStore> = Arc::new(MemoryStore::new());
        let (jwt, private_file, public_file) = jwt_service();
        let sessions = SessionManager::new(store.clone(), SessionPolicy::default());
        let alerts = SecurityAlertPublisher::new(store.clone(), None);
        let service = TokenService::new(store.clone(), jwt, sessions, alerts, 30);

        let user = User::new("user@example.com".to_string(), "hash".to_string(), None);
        store.insert_user(&user).await.unwrap();

        Fixture {
            service,
            store,
            user,
            _keys: (private_file, public_file),
        }
    }

    #[tokio::test]
    async fn test_issue_creates_chain_and_session() {
        let fx = fixture().await;
        let issued = fx
            .service
            .issue(&fx.user, "device-1", None, "203.0.113.9", None)
            .await
            .unwrap();

        assert!(!issued.tokens.access_token.is_empty());
        assert_eq!(issued.tokens.token_type, "Bearer");
        assert_eq!(issued.session.family_id, issued.family_id);

        let chain = fx.store.find_tokens_in_family(issued.family_id).await.unwrap();
        assert_eq!(chain.len(), 1);
        assert!(chain[0].is_active());
    }

    #[tokio::test]
    async fn test_sequential_refreshes_keep_chain_integrity() {
        let fx = fixture().await;
        let issued = fx
            .service
            .issue(&fx.user, "device-1", None, "203.0.113.9", None)
            .await
            .unwrap();

        let mut current = issued.tokens.refresh_token.clone();
        const ROTATIONS: usize = 4;
        for _ in 0..ROTATIONS {
            let next = fx.service.refresh(&current, Some("device-1")).await.unwrap();
            assert_ne!(next.refresh_token, current);
            current = next.refresh_token;
        }

        // N rotations leave exactly N+1 tokens, all but the last used,
        // and only the last unused + unrevoked.
        let chain = fx.store.find_tokens_in_family(issued.family_id).await.unwrap();
        assert_eq!(chain.len(), ROTATIONS + 1);
        for token in &chain[..ROTATIONS] {
            assert!(token.is_used());
            assert!(token.replaced_by.is_some());
        }
        let head = &chain[ROTATIONS];
        assert!(!head.is_used());
        assert!(!head.is_revoked());
        assert!(head.hash_matches(&current));
    }

    #[tokio::test]
    async fn test_replayed_token_revokes_whole_chain() {
        let fx = fixture().await;
        let issued = fx
            .service
            .issue(&fx.user, "device-1", None, "203.0.113.9", None)
            .await
            .unwrap();

        let first = issued.tokens.refresh_token.clone();
        let second = fx.service.refresh(&first, None).await.unwrap();

        // Replay of the already-rotated token
        match fx.service.refresh(&first, None).await {
            Err(RefreshError::Reused { user_id }) => assert_eq!(user_id, fx.user.user_id),
            other => panic!("expected reuse, got {:?}", other.map(|_| "pair")),
        }

        // The fresh successor is now dead too
        let chain = fx.store.find_tokens_in_family(issued.family_id).await.unwrap();
        assert_eq!(chain.len(), 2);
        assert!(chain.iter().all(|t| t.is_revoked()));
        assert!(matches!(
            fx.service.refresh(&second.refresh_token, None).await,
            Err(RefreshError::Reused { .. })
        ));

        // Session ended with the compromised reason
        let session = fx
            .store
            .find_session_by_id(issued.session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!session.active_flag);
        assert_eq!(session.end_reason_code.as_deref(), Some("compromised"));

        // And a critical alert exists
        let alerts = fx.store.list_alerts_for_user(fx.user.user_id).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity_code, "critical");
    }

    #[tokio::test]
    async fn test_expired_token_leaves_chain_untouched() {
        let fx = fixture().await;
        let issued = fx
            .service
            .issue(&fx.user, "device-1", None, "203.0.113.9", None)
            .await
            .unwrap();

        // Expire the head in place
        let chain = fx.store.find_tokens_in_family(issued.family_id).await.unwrap();
        let mut head = chain[0].clone();
        head.expiry_utc = chrono::Utc::now() - chrono::Duration::seconds(1);
        fx.store.insert_refresh_token(&head).await.unwrap();

        assert!(matches!(
            fx.service.refresh(&issued.tokens.refresh_token, None).await,
            Err(RefreshError::Expired)
        ));

        let chain = fx.store.find_tokens_in_family(issued.family_id).await.unwrap();
        assert!(!chain[0].is_revoked());
        assert!(fx.store.list_alerts_for_user(fx.user.user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_token_is_invalid() {
        let fx = fixture().await;
        assert!(matches!(
            fx.service.refresh("never-issued", None).await,
            Err(RefreshError::Invalid)
        ));
    }

    #[tokio::test]
    async fn test_wrong_device_is_invalid_and_does_not_burn_the_token() {
        let fx = fixture().await;
        let issued = fx
            .service
            .issue(&fx.user, "device-1", None, "203.0.113.9", None)
            .await
            .unwrap();

        assert!(matches!(
            fx.service
                .refresh(&issued.tokens.refresh_token, Some("device-2"))
                .await,
            Err(RefreshError::Invalid)
        ));

        // The chain head is still live for the right device
        let next = fx
            .service
            .refresh(&issued.tokens.refresh_token, Some("device-1"))
            .await
            .unwrap();
        assert!(!next.refresh_token.is_empty());
    }

    #[tokio::test]
    async fn test_revoke_all_for_user_kills_every_chain() {
        let fx = fixture().await;
        let a = fx
            .service
            .issue(&fx.user, "device-1", None, "203.0.113.9", None)
            .await
            .unwrap();
        let b = fx
            .service
            .issue(&fx.user, "device-2", None, "203.0.113.9", None)
            .await
            .unwrap();

        let revoked = fx
            .service
            .revoke_all_for_user(fx.user.user_id, RevokeReason::PasswordChange)
            .await
            .unwrap();
        assert_eq!(revoked, 2);

        for presented in [a.tokens.refresh_token, b.tokens.refresh_token] {
            assert!(matches!(
                fx.service.refresh(&presented, None).await,
                Err(RefreshError::Reused { .. })
            ));
        }
    }
}
