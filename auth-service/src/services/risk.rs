//! Adaptive IP/device risk scoring.
//!
//! Produces a 0-100 composite from failed-attempt density, anonymizing
//! infrastructure flags, impossible travel and known-bad listings. The
//! factor set is a closed enum with fixed weights so scores stay auditable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::services::rate_limit::{RateAction, RateLimitService};
use crate::services::store::AuthStore;

/// Risk bands over the 0-100 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: u32) -> Self {
        match score {
            0..=24 => RiskLevel::Low,
            25..=49 => RiskLevel::Medium,
            50..=74 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// Known risk signals and their score contributions.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskFactor {
    /// Recent failed logins from this IP; contribution scales with density.
    FailedAttemptDensity(u64),
    VpnDetected,
    TorExitNode,
    ProxyDetected,
    DatacenterIp,
    /// Geo distance / elapsed time between logins exceeds plausible speed.
    ImpossibleTravel { km: f64, hours: f64 },
    KnownBadList,
}

impl RiskFactor {
    pub fn weight(&self) -> u32 {
        match self {
            // 3 points per recent failure, saturating at 30
            RiskFactor::FailedAttemptDensity(count) => (*count as u32 * 3).min(30),
            RiskFactor::VpnDetected => 15,
            RiskFactor::TorExitNode => 30,
            RiskFactor::ProxyDetected => 15,
            RiskFactor::DatacenterIp => 10,
            RiskFactor::ImpossibleTravel { .. } => 25,
            RiskFactor::KnownBadList => 35,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            RiskFactor::FailedAttemptDensity(_) => "failed_attempt_density",
            RiskFactor::VpnDetected => "vpn_detected",
            RiskFactor::TorExitNode => "tor_exit_node",
            RiskFactor::ProxyDetected => "proxy_detected",
            RiskFactor::DatacenterIp => "datacenter_ip",
            RiskFactor::ImpossibleTravel { .. } => "impossible_travel",
            RiskFactor::KnownBadList => "known_bad_list",
        }
    }
}

/// Verdict for one assessment.
#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub score: u32,
    pub level: RiskLevel,
    pub factors: Vec<RiskFactor>,
    pub geo: GeoInfo,
}

impl RiskAssessment {
    pub fn factor_codes(&self) -> Vec<String> {
        self.factors.iter().map(|f| f.code().to_string()).collect()
    }
}

/// Result of an external IP lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeoInfo {
    pub country_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub is_vpn: bool,
    #[serde(default)]
    pub is_tor: bool,
    #[serde(default)]
    pub is_proxy: bool,
    #[serde(default)]
    pub is_datacenter: bool,
    #[serde(default)]
    pub known_bad: bool,
}

/// External geo/VPN intelligence boundary: pure `ip -> GeoInfo`.
#[async_trait]
pub trait GeoIpProvider: Send + Sync {
    async fn lookup(&self, ip: &str) -> Result<GeoInfo, AppError>;
}

/// HTTP-backed provider.
pub struct HttpGeoProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGeoProvider {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl GeoIpProvider for HttpGeoProvider {
    async fn lookup(&self, ip: &str) -> Result<GeoInfo, AppError> {
        let url = format!("{}/v1/ip/{}", self.base_url, ip);
        let info = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Geo lookup failed: {}", e)))?
            .error_for_status()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Geo lookup failed: {}", e)))?
            .json::<GeoInfo>()
            .await
            .map_err(|e| {
                AppError::InternalError(anyhow::anyhow!("Geo lookup returned bad payload: {}", e))
            })?;
        Ok(info)
    }
}

/// Static provider for tests and development.
#[derive(Default)]
pub struct StaticGeoProvider {
    entries: HashMap<String, GeoInfo>,
}

impl StaticGeoProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, ip: &str, info: GeoInfo) -> Self {
        self.entries.insert(ip.to_string(), info);
        self
    }
}

#[async_trait]
impl GeoIpProvider for StaticGeoProvider {
    async fn lookup(&self, ip: &str) -> Result<GeoInfo, AppError> {
        Ok(self.entries.get(ip).cloned().unwrap_or_default())
    }
}

/// Implausible ground speed between consecutive logins, km/h.
const IMPOSSIBLE_TRAVEL_KMH: f64 = 900.0;
/// Window over which failed-attempt density is measured.
const DENSITY_WINDOW_SECS: u64 = 600;
/// Failures below this are noise, not a factor.
const DENSITY_FLOOR: u64 = 3;

#[derive(Clone)]
pub struct RiskAssessor {
    store: Arc<dyn AuthStore>,
    geo: Arc<dyn GeoIpProvider>,
    limiter: RateLimitService,
}

impl RiskAssessor {
    pub fn new(
        store: Arc<dyn AuthStore>,
        geo: Arc<dyn GeoIpProvider>,
        limiter: RateLimitService,
    ) -> Self {
        Self { store, geo, limiter }
    }

    pub async fn assess(&self, ip: &str, user_id: Option<Uuid>) -> Result<RiskAssessment, AppError> {
        let mut factors = Vec::new();

        let failed = self
            .limiter
            .attempt_count(
                ip,
                RateAction::LoginFailed,
                StdDuration::from_secs(DENSITY_WINDOW_SECS),
            )
            .await?;
        if failed >= DENSITY_FLOOR {
            factors.push(RiskFactor::FailedAttemptDensity(failed));
        }

        // Missing external intelligence is a degraded signal, not a failure.
        let geo = match self.geo.lookup(ip).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(ip = %ip, error = %e, "Geo lookup failed, scoring without it");
                GeoInfo::default()
            }
        };

        if geo.is_tor {
            factors.push(RiskFactor::TorExitNode);
        } else if geo.is_vpn {
            factors.push(RiskFactor::VpnDetected);
        } else if geo.is_proxy {
            factors.push(RiskFactor::ProxyDetected);
        }
        if geo.is_datacenter {
            factors.push(RiskFactor::DatacenterIp);
        }
        if geo.known_bad {
            factors.push(RiskFactor::KnownBadList);
        }

        if let Some(user_id) = user_id {
            if let Some(factor) = self.impossible_travel(user_id, &geo).await? {
                factors.push(factor);
            }
        }

        let score = factors.iter().map(|f| f.weight()).sum::<u32>().min(100);
        let level = RiskLevel::from_score(score);

        tracing::debug!(
            ip = %ip,
            score = score,
            level = level.as_str(),
            factors = ?factors,
            "Risk assessed"
        );

        Ok(RiskAssessment {
            score,
            level,
            factors,
            geo,
        })
    }

    async fn impossible_travel(
        &self,
        user_id: Uuid,
        geo: &GeoInfo,
    ) -> Result<Option<RiskFactor>, AppError> {
        let (Some(lat), Some(lon)) = (geo.latitude, geo.longitude) else {
            return Ok(None);
        };
        let Some(last) = self.store.last_successful_login(user_id).await? else {
            return Ok(None);
        };
        let (Some(prev_lat), Some(prev_lon)) = (last.latitude, last.longitude) else {
            return Ok(None);
        };

        let km = haversine_km(prev_lat, prev_lon, lat, lon);
        let hours = (chrono::Utc::now() - last.created_utc)
            .num_seconds()
            .max(1) as f64
            / 3600.0;

        if km / hours > IMPOSSIBLE_TRAVEL_KMH {
            Ok(Some(RiskFactor::ImpossibleTravel { km, hours }))
        } else {
            Ok(None)
        }
    }
}

/// Great-circle distance between two coordinates, in kilometers.
fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}
