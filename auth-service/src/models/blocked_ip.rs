//! Blocked IP model - manual and automatic blocks with escalating duration.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Why an IP was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    BruteForce,
    CriticalRisk,
    Manual,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::BruteForce => "brute_force",
            BlockReason::CriticalRisk => "critical_risk",
            BlockReason::Manual => "manual",
        }
    }
}

/// Auto-block escalation curve: each repeat offense from the same IP earns a
/// longer block, ending in a permanent one. Index = prior auto-block count.
const ESCALATION_MINUTES: [i64; 3] = [15, 60, 24 * 60];

/// Blocked IP entity. Doubles as the per-IP failure tracker: a row with
/// `blocked_utc = None` has accumulated failures but is not (yet) blocked.
/// Rows are never hard-deleted; unblocking sets the audit fields.
#[derive(Debug, Clone, FromRow)]
pub struct BlockedIp {
    pub block_id: Uuid,
    pub ip_text: String,
    pub reason_code: Option<String>,
    pub permanent_flag: bool,
    pub blocked_utc: Option<DateTime<Utc>>,
    pub expiry_utc: Option<DateTime<Utc>>,
    pub failed_count: i32,
    /// How many times this IP has been auto-blocked; drives escalation.
    pub auto_block_count: i32,
    pub blocked_by_text: Option<String>,
    pub unblocked_by_text: Option<String>,
    pub unblocked_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl BlockedIp {
    /// Create a failure tracker row for an IP that is not blocked yet.
    pub fn tracker(ip: &str) -> Self {
        Self {
            block_id: Uuid::new_v4(),
            ip_text: ip.to_string(),
            reason_code: None,
            permanent_flag: false,
            blocked_utc: None,
            expiry_utc: None,
            failed_count: 0,
            auto_block_count: 0,
            blocked_by_text: None,
            unblocked_by_text: None,
            unblocked_utc: None,
            created_utc: Utc::now(),
        }
    }

    /// Derived: blocked, not unblocked, and either permanent or unexpired.
    pub fn is_active(&self) -> bool {
        if self.blocked_utc.is_none() || self.unblocked_utc.is_some() {
            return false;
        }
        self.permanent_flag || self.expiry_utc.map_or(false, |e| e > Utc::now())
    }

    /// Seconds until the block lapses, when it does.
    pub fn retry_after_secs(&self) -> Option<u64> {
        if self.permanent_flag {
            return None;
        }
        self.expiry_utc
            .map(|e| (e - Utc::now()).num_seconds().max(0) as u64)
    }

    /// Apply a block in place. `duration = None` means permanent.
    pub fn block(&mut self, reason: BlockReason, duration: Option<Duration>, actor: Option<&str>) {
        let now = Utc::now();
        self.reason_code = Some(reason.as_str().to_string());
        self.blocked_utc = Some(now);
        self.permanent_flag = duration.is_none();
        self.expiry_utc = duration.map(|d| now + d);
        self.blocked_by_text = actor.map(|a| a.to_string());
        self.unblocked_by_text = None;
        self.unblocked_utc = None;
    }

    /// Lift the block. Requires an explicit actor for the audit trail.
    pub fn unblock(&mut self, actor: &str) {
        self.unblocked_by_text = Some(actor.to_string());
        self.unblocked_utc = Some(Utc::now());
    }

    /// Next auto-block duration for this IP; `None` means permanent.
    pub fn next_auto_block_duration(&self) -> Option<Duration> {
        ESCALATION_MINUTES
            .get(self.auto_block_count as usize)
            .map(|m| Duration::minutes(*m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_row_is_not_active() {
        let tracker = BlockedIp::tracker("203.0.113.7");
        assert!(!tracker.is_active());
    }

    #[test]
    fn test_block_then_unblock_restores_access() {
        let mut entry = BlockedIp::tracker("203.0.113.7");
        entry.block(BlockReason::BruteForce, Some(Duration::minutes(15)), None);
        assert!(entry.is_active());

        entry.unblock("admin@example.com");
        assert!(!entry.is_active());
        assert!(entry.unblocked_utc.is_some());
    }

    #[test]
    fn test_expired_block_is_inactive() {
        let mut entry = BlockedIp::tracker("203.0.113.7");
        entry.block(BlockReason::BruteForce, Some(Duration::minutes(15)), None);
        entry.expiry_utc = Some(Utc::now() - Duration::seconds(1));

        assert!(!entry.is_active());
    }

    #[test]
    fn test_permanent_block_never_expires() {
        let mut entry = BlockedIp::tracker("203.0.113.7");
        entry.block(BlockReason::Manual, None, Some("admin@example.com"));

        assert!(entry.is_active());
        assert_eq!(entry.retry_after_secs(), None);
    }

    #[test]
    fn test_escalation_curve_ends_permanent() {
        let mut entry = BlockedIp::tracker("203.0.113.7");

        let expected = [Some(15), Some(60), Some(24 * 60), None];
        for minutes in expected {
            let duration = entry.next_auto_block_duration();
            assert_eq!(duration.map(|d| d.num_minutes()), minutes);
            entry.auto_block_count += 1;
        }
    }
}
