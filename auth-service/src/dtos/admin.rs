use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::models::BlockedIp;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct BlockIpRequest {
    #[validate(length(min = 1, message = "IP is required"))]
    #[schema(example = "203.0.113.9")]
    pub ip: String,

    /// Block duration in minutes; omit for a permanent block.
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BlockedIpView {
    pub ip: String,
    pub reason: Option<String>,
    pub is_active: bool,
    pub permanent: bool,
    pub failed_count: i32,
    pub auto_block_count: i32,
    pub blocked_utc: Option<DateTime<Utc>>,
    pub expiry_utc: Option<DateTime<Utc>>,
    pub blocked_by: Option<String>,
    pub unblocked_by: Option<String>,
}

impl From<BlockedIp> for BlockedIpView {
    fn from(entry: BlockedIp) -> Self {
        let is_active = entry.is_active();
        Self {
            ip: entry.ip_text,
            reason: entry.reason_code,
            is_active,
            permanent: entry.permanent_flag,
            failed_count: entry.failed_count,
            auto_block_count: entry.auto_block_count,
            blocked_utc: entry.blocked_utc,
            expiry_utc: entry.expiry_utc,
            blocked_by: entry.blocked_by_text,
            unblocked_by: entry.unblocked_by_text,
        }
    }
}
