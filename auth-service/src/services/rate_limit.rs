//! Sliding-window attempt counters per (identifier, action).
//!
//! Counter state lives behind [`AttemptCounter`] so correctness survives
//! restarts and multiple instances: the Redis implementation keeps a sorted
//! set of timestamps per key with atomic inserts, the in-memory one backs
//! tests and single-node development.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use redis::aio::ConnectionManager;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;

/// Actions with independently tracked attempt counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateAction {
    Login,
    LoginFailed,
    OtpSend,
    OtpVerify,
}

impl RateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateAction::Login => "login",
            RateAction::LoginFailed => "login_failed",
            RateAction::OtpSend => "otp_send",
            RateAction::OtpVerify => "otp_verify",
        }
    }
}

/// Threshold for one action: at most `threshold` attempts per window.
#[derive(Debug, Clone, Copy)]
pub struct RateRule {
    pub threshold: u32,
    pub window_seconds: u64,
}

/// Per-action thresholds.
#[derive(Debug, Clone)]
pub struct RateLimitRules {
    pub login: RateRule,
    pub otp_send: RateRule,
    pub otp_verify: RateRule,
}

impl Default for RateLimitRules {
    fn default() -> Self {
        Self {
            login: RateRule {
                threshold: 5,
                window_seconds: 900,
            },
            otp_send: RateRule {
                threshold: 3,
                window_seconds: 600,
            },
            otp_verify: RateRule {
                threshold: 5,
                window_seconds: 600,
            },
        }
    }
}

/// Longest window any caller may ask about; bounds Redis key lifetime.
const MAX_WINDOW_SECS: i64 = 3600;

#[async_trait]
pub trait AttemptCounter: Send + Sync {
    /// Record one attempt now. Must be atomic under concurrent callers.
    async fn record(&self, key: &str) -> Result<(), AppError>;
    /// Count attempts within `[now - window, now]`.
    async fn count(&self, key: &str, window: Duration) -> Result<u64, AppError>;
    async fn clear(&self, key: &str) -> Result<(), AppError>;
    async fn health_check(&self) -> Result<(), AppError>;
}

// ==================== Redis implementation ====================

/// Sorted-set-backed counter: score = epoch millis, members unique per
/// attempt, pruned to the queried window on read.
#[derive(Clone)]
pub struct RedisCounter {
    manager: ConnectionManager,
}

impl RedisCounter {
    pub async fn new(url: &str) -> Result<Self, AppError> {
        tracing::info!(url = %url, "Connecting to Redis");
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            AppError::InternalError(anyhow::anyhow!("Failed to connect to Redis: {}", e))
        })?;
        tracing::info!("Successfully connected to Redis");
        Ok(Self { manager })
    }
}

#[async_trait]
impl AttemptCounter for RedisCounter {
    async fn record(&self, key: &str) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let now_ms = Utc::now().timestamp_millis();
        let member = format!("{}:{}", now_ms, rand::thread_rng().gen::<u64>());

        redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(key)
            .arg(now_ms)
            .arg(member)
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(MAX_WINDOW_SECS)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(AppError::CacheError)?;
        Ok(())
    }

    async fn count(&self, key: &str, window: Duration) -> Result<u64, AppError> {
        let mut conn = self.manager.clone();
        let cutoff_ms = Utc::now().timestamp_millis() - window.as_millis() as i64;

        let (_, count): ((), u64) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(cutoff_ms)
            .cmd("ZCARD")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(AppError::CacheError)?;
        Ok(count)
    }

    async fn clear(&self, key: &str) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(AppError::CacheError)?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(AppError::CacheError)?;
        Ok(())
    }
}

// ==================== In-memory implementation ====================

/// DashMap-backed counter for tests and single-node deployments.
#[derive(Default)]
pub struct MemoryCounter {
    entries: DashMap<String, Vec<chrono::DateTime<Utc>>>,
}

impl MemoryCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptCounter for MemoryCounter {
    async fn record(&self, key: &str) -> Result<(), AppError> {
        self.entries
            .entry(key.to_string())
            .or_default()
            .push(Utc::now());
        Ok(())
    }

    async fn count(&self, key: &str, window: Duration) -> Result<u64, AppError> {
        let cutoff = Utc::now()
            - chrono::Duration::milliseconds(window.as_millis() as i64);
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.retain(|t| *t > cutoff);
                Ok(entry.len() as u64)
            }
            None => Ok(0),
        }
    }

    async fn clear(&self, key: &str) -> Result<(), AppError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

// ==================== Rate limit service ====================

/// Per-(identifier, action) gate over an [`AttemptCounter`].
#[derive(Clone)]
pub struct RateLimitService {
    counter: Arc<dyn AttemptCounter>,
    rules: RateLimitRules,
}

impl RateLimitService {
    pub fn new(counter: Arc<dyn AttemptCounter>, rules: RateLimitRules) -> Self {
        Self { counter, rules }
    }

    fn key(identifier: &str, action: RateAction) -> String {
        format!("attempts:{}:{}", action.as_str(), identifier)
    }

    fn rule(&self, action: RateAction) -> Option<RateRule> {
        match action {
            RateAction::Login => Some(self.rules.login),
            RateAction::OtpSend => Some(self.rules.otp_send),
            RateAction::OtpVerify => Some(self.rules.otp_verify),
            // Tracked for risk scoring and auto-block, not gated directly
            RateAction::LoginFailed => None,
        }
    }

    pub async fn record_attempt(
        &self,
        identifier: &str,
        action: RateAction,
    ) -> Result<(), AppError> {
        self.counter.record(&Self::key(identifier, action)).await
    }

    pub async fn attempt_count(
        &self,
        identifier: &str,
        action: RateAction,
        window: Duration,
    ) -> Result<u64, AppError> {
        self.counter
            .count(&Self::key(identifier, action), window)
            .await
    }

    /// True when the identifier already spent its budget for `action`.
    pub async fn is_rate_limited(
        &self,
        identifier: &str,
        action: RateAction,
    ) -> Result<bool, AppError> {
        let Some(rule) = self.rule(action) else {
            return Ok(false);
        };
        let count = self
            .attempt_count(identifier, action, Duration::from_secs(rule.window_seconds))
            .await?;
        Ok(count >= rule.threshold as u64)
    }

    pub fn retry_after_secs(&self, action: RateAction) -> u64 {
        self.rule(action).map(|r| r.window_seconds).unwrap_or(0)
    }

    pub async fn clear_attempts(
        &self,
        identifier: &str,
        action: RateAction,
    ) -> Result<(), AppError> {
        self.counter.clear(&Self::key(identifier, action)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> RateLimitService {
        RateLimitService::new(Arc::new(MemoryCounter::new()), RateLimitRules::default())
    }

    #[tokio::test]
    async fn test_threshold_blocks_next_attempt() {
        let svc = service();
        let ip = "203.0.113.5";

        for _ in 0..5 {
            assert!(!svc.is_rate_limited(ip, RateAction::Login).await.unwrap());
            svc.record_attempt(ip, RateAction::Login).await.unwrap();
        }

        // Budget of 5 spent; the sixth attempt is refused
        assert!(svc.is_rate_limited(ip, RateAction::Login).await.unwrap());
    }

    #[tokio::test]
    async fn test_counters_are_per_identifier() {
        let svc = service();
        for _ in 0..5 {
            svc.record_attempt("203.0.113.5", RateAction::Login)
                .await
                .unwrap();
        }

        assert!(svc
            .is_rate_limited("203.0.113.5", RateAction::Login)
            .await
            .unwrap());
        assert!(!svc
            .is_rate_limited("203.0.113.6", RateAction::Login)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_window_elapse_frees_budget() {
        let counter = MemoryCounter::new();
        counter.record("k").await.unwrap();
        counter.record("k").await.unwrap();

        assert_eq!(counter.count("k", Duration::from_secs(60)).await.unwrap(), 2);

        tokio::time::sleep(Duration::from_millis(150)).await;
        // Entries fall outside a 100ms window once it has elapsed
        assert_eq!(
            counter.count("k", Duration::from_millis(100)).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_clear_resets_counter() {
        let svc = service();
        let ip = "203.0.113.5";
        for _ in 0..5 {
            svc.record_attempt(ip, RateAction::Login).await.unwrap();
        }
        assert!(svc.is_rate_limited(ip, RateAction::Login).await.unwrap());

        svc.clear_attempts(ip, RateAction::Login).await.unwrap();
        assert!(!svc.is_rate_limited(ip, RateAction::Login).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_login_tracking_is_not_gated() {
        let svc = service();
        for _ in 0..100 {
            svc.record_attempt("ip", RateAction::LoginFailed).await.unwrap();
        }
        assert!(!svc
            .is_rate_limited("ip", RateAction::LoginFailed)
            .await
            .unwrap());
    }
}
