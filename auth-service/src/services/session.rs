//! Session lifecycle: one logical session per refresh-token family, with
//! idle/absolute timeouts and a concurrency cap.

use chrono::{Duration, Utc};
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{SessionEndReason, UserSession};
use crate::services::store::AuthStore;

/// Session policy knobs.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub idle_timeout_minutes: i64,
    pub absolute_timeout_hours: i64,
    pub max_concurrent_sessions: usize,
    /// One active session per device: a new login supersedes the old one.
    pub single_session_per_device: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: 30,
            absolute_timeout_hours: 24,
            max_concurrent_sessions: 5,
            single_session_per_device: true,
        }
    }
}

impl SessionPolicy {
    pub fn idle_timeout(&self) -> Duration {
        Duration::minutes(self.idle_timeout_minutes)
    }

    pub fn absolute_timeout(&self) -> Duration {
        Duration::hours(self.absolute_timeout_hours)
    }
}

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn AuthStore>,
    policy: SessionPolicy,
}

impl SessionManager {
    pub fn new(store: Arc<dyn AuthStore>, policy: SessionPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Create a session for a fresh refresh-token family. Supersedes any
    /// active session on the same device and evicts the stalest session
    /// once the concurrency cap is hit.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        user_id: Uuid,
        family_id: Uuid,
        device_id: &str,
        device_name: Option<String>,
        ip: &str,
        country_code: Option<String>,
    ) -> Result<UserSession, AppError> {
        if self.policy.single_session_per_device {
            if let Some(existing) = self
                .store
                .find_active_session_for_device(user_id, device_id)
                .await?
            {
                self.store
                    .end_session(existing.session_id, SessionEndReason::Superseded.as_str())
                    .await?;
            }
        }

        let mut live = self.list_active(user_id).await?;
        while live.len() >= self.policy.max_concurrent_sessions {
            // Oldest activity goes first
            live.sort_by_key(|s| s.last_activity_utc);
            let evicted = live.remove(0);
            self.store
                .end_session(evicted.session_id, SessionEndReason::Evicted.as_str())
                .await?;
            tracing::info!(
                user_id = %user_id,
                session_id = %evicted.session_id,
                "Evicted oldest session over concurrency cap"
            );
        }

        let session = UserSession::new(
            user_id,
            family_id,
            device_id,
            device_name,
            ip,
            country_code,
            self.policy.absolute_timeout(),
        );
        self.store.insert_session(&session).await?;
        Ok(session)
    }

    /// Best-effort activity bump; losing a concurrent update is fine.
    pub async fn touch_by_family(&self, family_id: Uuid) {
        if let Err(e) = self
            .store
            .touch_session_by_family(family_id, Utc::now())
            .await
        {
            tracing::warn!(family_id = %family_id, error = %e, "Session touch failed");
        }
    }

    pub fn is_expired(&self, session: &UserSession) -> bool {
        session.is_expired(self.policy.idle_timeout())
    }

    /// Active sessions that have not idled out or hit their absolute deadline.
    pub async fn list_active(&self, user_id: Uuid) -> Result<Vec<UserSession>, AppError> {
        let sessions = self.store.list_active_sessions(user_id).await?;
        Ok(sessions
            .into_iter()
            .filter(|s| !self.is_expired(s))
            .collect())
    }

    pub async fn revoke(&self, session_id: Uuid, reason: SessionEndReason) -> Result<bool, AppError> {
        self.store.end_session(session_id, reason.as_str()).await
    }

    pub async fn revoke_all_except(
        &self,
        user_id: Uuid,
        current_session_id: Uuid,
    ) -> Result<u64, AppError> {
        self.store
            .end_all_sessions_for_user(
                user_id,
                SessionEndReason::Revoked.as_str(),
                Some(current_session_id),
            )
            .await
    }

    pub async fn end_by_family(
        &self,
        family_id: Uuid,
        reason: SessionEndReason,
    ) -> Result<u64, AppError> {
        self.store
            .end_sessions_by_family(family_id, reason.as_str())
            .await
    }

    pub async fn end_all_for_user(
        &self,
        user_id: Uuid,
        reason: SessionEndReason,
    ) -> Result<u64, AppError> {
        self.store
            .end_all_sessions_for_user(user_id, reason.as_str(), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::MemoryStore;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(MemoryStore::new()), SessionPolicy::default())
    }

    #[tokio::test]
    async fn test_same_device_login_supersedes() {
        let manager = manager();
        let user_id = Uuid::new_v4();

        let first = manager
            .create(user_id, Uuid::new_v4(), "device-1", None, "203.0.113.9", None)
            .await
            .unwrap();
        let second = manager
            .create(user_id, Uuid::new_v4(), "device-1", None, "203.0.113.9", None)
            .await
            .unwrap();

        let active = manager.list_active(user_id).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, second.session_id);
        assert_ne!(first.session_id, second.session_id);
    }

    #[tokio::test]
    async fn test_concurrency_cap_evicts_stalest() {
        let manager = manager();
        let user_id = Uuid::new_v4();

        for i in 0..5 {
            manager
                .create(
                    user_id,
                    Uuid::new_v4(),
                    &format!("device-{}", i),
                    None,
                    "203.0.113.9",
                    None,
                )
                .await
                .unwrap();
        }
        assert_eq!(manager.list_active(user_id).await.unwrap().len(), 5);

        manager
            .create(user_id, Uuid::new_v4(), "device-5", None, "203.0.113.9", None)
            .await
            .unwrap();

        let active = manager.list_active(user_id).await.unwrap();
        assert_eq!(active.len(), 5);
        // The first session (stalest activity) was evicted
        assert!(!active.iter().any(|s| s.device_id_text == "device-0"));
        assert!(active.iter().any(|s| s.device_id_text == "device-5"));
    }

    #[tokio::test]
    async fn test_revoke_all_except_keeps_current() {
        let manager = manager();
        let user_id = Uuid::new_v4();

        let keep = manager
            .create(user_id, Uuid::new_v4(), "device-a", None, "203.0.113.9", None)
            .await
            .unwrap();
        manager
            .create(user_id, Uuid::new_v4(), "device-b", None, "203.0.113.9", None)
            .await
            .unwrap();
        manager
            .create(user_id, Uuid::new_v4(), "device-c", None, "203.0.113.9", None)
            .await
            .unwrap();

        let ended = manager
            .revoke_all_except(user_id, keep.session_id)
            .await
            .unwrap();
        assert_eq!(ended, 2);

        let active = manager.list_active(user_id).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, keep.session_id);
    }
}
