//! IP block registry - persisted manual + automatic blocks.
//!
//! Consulted before any credential check. Automatic blocks trigger on
//! failed-login density or a critical risk verdict, with durations that
//! escalate per repeat offense until the block becomes permanent.

use chrono::Duration;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use crate::models::{BlockReason, BlockedIp, SecurityAlert};
use crate::services::rate_limit::{RateAction, RateLimitService};
use crate::services::risk::RiskLevel;
use crate::services::store::AuthStore;
use crate::services::SecurityAlertPublisher;

/// Auto-block policy knobs.
#[derive(Debug, Clone)]
pub struct AutoBlockPolicy {
    /// Failed logins within the window that trip an automatic block.
    pub failed_threshold: u64,
    pub window_seconds: u64,
}

impl Default for AutoBlockPolicy {
    fn default() -> Self {
        Self {
            failed_threshold: 15,
            window_seconds: 600,
        }
    }
}

#[derive(Clone)]
pub struct IpBlockRegistry {
    store: Arc<dyn AuthStore>,
    limiter: RateLimitService,
    alerts: SecurityAlertPublisher,
    policy: AutoBlockPolicy,
}

impl IpBlockRegistry {
    pub fn new(
        store: Arc<dyn AuthStore>,
        limiter: RateLimitService,
        alerts: SecurityAlertPublisher,
        policy: AutoBlockPolicy,
    ) -> Self {
        Self {
            store,
            limiter,
            alerts,
            policy,
        }
    }

    /// Gate check: is this IP currently blocked?
    pub async fn is_blocked(&self, ip: &str) -> Result<bool, AppError> {
        Ok(self
            .store
            .find_blocked_ip(ip)
            .await?
            .map(|e| e.is_active())
            .unwrap_or(false))
    }

    /// Retry-after hint for a blocked IP, when the block is not permanent.
    pub async fn retry_after_secs(&self, ip: &str) -> Result<Option<u64>, AppError> {
        Ok(self
            .store
            .find_blocked_ip(ip)
            .await?
            .filter(|e| e.is_active())
            .and_then(|e| e.retry_after_secs()))
    }

    /// Whether the IP has earned an automatic block: failed-login density
    /// over the rolling window, or a critical risk verdict.
    pub async fn should_auto_block(
        &self,
        ip: &str,
        risk_level: Option<RiskLevel>,
    ) -> Result<bool, AppError> {
        if risk_level == Some(RiskLevel::Critical) {
            return Ok(true);
        }
        let failed = self
            .limiter
            .attempt_count(
                ip,
                RateAction::LoginFailed,
                StdDuration::from_secs(self.policy.window_seconds),
            )
            .await?;
        Ok(failed >= self.policy.failed_threshold)
    }

    /// Record one failed attempt for the IP and auto-block when warranted.
    pub async fn process_failed_attempt(
        &self,
        ip: &str,
        risk_level: Option<RiskLevel>,
    ) -> Result<(), AppError> {
        self.limiter
            .record_attempt(ip, RateAction::LoginFailed)
            .await?;

        let mut entry = self
            .store
            .find_blocked_ip(ip)
            .await?
            .unwrap_or_else(|| BlockedIp::tracker(ip));
        entry.failed_count += 1;

        if !entry.is_active() && self.should_auto_block(ip, risk_level).await? {
            let duration = entry.next_auto_block_duration();
            let permanent = duration.is_none();
            let reason = if risk_level == Some(RiskLevel::Critical) {
                BlockReason::CriticalRisk
            } else {
                BlockReason::BruteForce
            };
            entry.block(reason, duration, None);
            entry.auto_block_count += 1;

            tracing::warn!(
                ip = %ip,
                reason = reason.as_str(),
                permanent = permanent,
                offense = entry.auto_block_count,
                "IP automatically blocked"
            );
            self.alerts
                .publish(SecurityAlert::ip_auto_blocked(ip, reason.as_str(), permanent))
                .await?;
        }

        self.store.save_blocked_ip(&entry).await
    }

    /// Manual block. `duration = None` means permanent.
    pub async fn block_ip(
        &self,
        ip: &str,
        reason: BlockReason,
        duration: Option<Duration>,
        actor: Option<&str>,
    ) -> Result<BlockedIp, AppError> {
        let mut entry = self
            .store
            .find_blocked_ip(ip)
            .await?
            .unwrap_or_else(|| BlockedIp::tracker(ip));
        entry.block(reason, duration, actor);

        tracing::info!(ip = %ip, reason = reason.as_str(), actor = ?actor, "IP blocked");
        self.store.save_blocked_ip(&entry).await?;
        Ok(entry)
    }

    /// Lift a block. The actor id is mandatory for the audit trail.
    pub async fn unblock_ip(&self, ip: &str, actor: &str) -> Result<bool, AppError> {
        let Some(mut entry) = self.store.find_blocked_ip(ip).await? else {
            return Ok(false);
        };
        if !entry.is_active() {
            return Ok(false);
        }
        entry.unblock(actor);
        self.store.save_blocked_ip(&entry).await?;

        tracing::info!(ip = %ip, actor = %actor, "IP unblocked");
        Ok(true)
    }

    pub async fn list(&self) -> Result<Vec<BlockedIp>, AppError> {
        self.store.list_blocked_ips().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::rate_limit::{MemoryCounter, RateLimitRules};
    use crate::services::store::MemoryStore;
    use crate::services::SecurityAlertPublisher;

    fn registry() -> IpBlockRegistry {
        let store: Arc<dyn AuthStore> = Arc::new(MemoryStore::new());
        let limiter = RateLimitService::new(Arc::new(MemoryCounter::new()), RateLimitRules::default());
        let alerts = SecurityAlertPublisher::new(store.clone(), None);
        IpBlockRegistry::new(store, limiter, alerts, AutoBlockPolicy::default())
    }

    #[tokio::test]
    async fn test_fifteen_failures_trip_auto_block() {
        let registry = registry();
        let ip = "203.0.113.10";

        for _ in 0..14 {
            registry.process_failed_attempt(ip, None).await.unwrap();
        }
        assert!(!registry.is_blocked(ip).await.unwrap());

        registry.process_failed_attempt(ip, None).await.unwrap();
        assert!(registry.is_blocked(ip).await.unwrap());
    }

    #[tokio::test]
    async fn test_critical_risk_blocks_immediately() {
        let registry = registry();
        let ip = "203.0.113.11";

        registry
            .process_failed_attempt(ip, Some(RiskLevel::Critical))
            .await
            .unwrap();
        assert!(registry.is_blocked(ip).await.unwrap());
    }

    #[tokio::test]
    async fn test_unblock_restores_access_and_is_audited() {
        let registry = registry();
        let ip = "203.0.113.12";

        registry
            .block_ip(ip, BlockReason::Manual, None, Some("admin@example.com"))
            .await
            .unwrap();
        assert!(registry.is_blocked(ip).await.unwrap());

        assert!(registry.unblock_ip(ip, "admin@example.com").await.unwrap());
        assert!(!registry.is_blocked(ip).await.unwrap());

        let entries = registry.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].unblocked_by_text.as_deref(),
            Some("admin@example.com")
        );
    }

    #[tokio::test]
    async fn test_unblocking_unknown_ip_is_a_no_op() {
        let registry = registry();
        assert!(!registry.unblock_ip("198.51.100.1", "admin").await.unwrap());
    }

    #[tokio::test]
    async fn test_timed_block_reports_retry_after() {
        let registry = registry();
        let ip = "203.0.113.13";

        registry
            .block_ip(ip, BlockReason::Manual, Some(Duration::minutes(15)), Some("admin"))
            .await
            .unwrap();

        let hint = registry.retry_after_secs(ip).await.unwrap();
        assert!(hint.is_some());
        assert!(hint.unwrap() <= 15 * 60);
    }
}
