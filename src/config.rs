//! Client configuration
//!
//! Loaded from a JSON file. Every field is optional; durations are in
//! milliseconds.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::availability::AvailabilityStrategy;
use crate::consistency::BarrierOptions;
use crate::error::{CosmosError, CosmosResult};
use crate::observability::{log_event, Event};
use crate::retry::{BackoffPolicy, RetryOptions};
use crate::routing::{Region, DEFAULT_UNAVAILABILITY_TTL};
use crate::transport::ConnectionMode;

/// Hedging section of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HedgingSettings {
    pub threshold_ms: u64,
    pub threshold_step_ms: u64,
    #[serde(default)]
    pub exclude_regions_with_failures: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Regions in order of preference
    #[serde(default)]
    pub preferred_regions: Vec<String>,

    #[serde(default)]
    pub connection_mode: ConnectionMode,

    /// Retries after a 429 (default 9)
    #[serde(default = "default_max_throttle_retries")]
    pub max_retry_attempts_on_throttled_requests: u32,

    /// Cap on summed throttling waits (default 30s)
    #[serde(default = "default_max_throttle_wait_ms")]
    pub max_retry_wait_on_throttled_requests_ms: u64,

    /// Backoff when a 429 has no retry-after header (default 5ms)
    #[serde(default = "default_throttle_backoff_initial_ms")]
    pub throttle_backoff_initial_ms: u64,

    #[serde(default = "default_max_gone_retries")]
    pub max_gone_retries: u32,

    #[serde(default = "default_gone_backoff_initial_ms")]
    pub gone_backoff_initial_ms: u64,

    #[serde(default = "default_gone_backoff_max_ms")]
    pub gone_backoff_max_ms: u64,

    #[serde(default = "default_max_session_retries")]
    pub max_session_retries_in_region: u32,

    #[serde(default = "default_max_region_failovers")]
    pub max_region_failovers: u32,

    /// Cross-region hedging for document reads (default: off)
    #[serde(default)]
    pub hedging: Option<HedgingSettings>,

    #[serde(default = "default_barrier_max_attempts")]
    pub barrier_max_attempts: u32,

    #[serde(default = "default_barrier_short_interval_ms")]
    pub barrier_short_interval_ms: u64,

    #[serde(default = "default_barrier_long_interval_ms")]
    pub barrier_long_interval_ms: u64,

    /// Default end-to-end budget per operation (default: none)
    #[serde(default)]
    pub end_to_end_timeout_ms: Option<u64>,

    /// How long a failed region stays demoted (default 5min)
    #[serde(default = "default_region_unavailability_ms")]
    pub region_unavailability_ms: u64,
}

fn default_max_throttle_retries() -> u32 {
    9
}
fn default_max_throttle_wait_ms() -> u64 {
    30_000
}
fn default_throttle_backoff_initial_ms() -> u64 {
    5
}
fn default_max_gone_retries() -> u32 {
    3
}
fn default_gone_backoff_initial_ms() -> u64 {
    1_000
}
fn default_gone_backoff_max_ms() -> u64 {
    15_000
}
fn default_max_session_retries() -> u32 {
    4
}
fn default_max_region_failovers() -> u32 {
    3
}
fn default_barrier_max_attempts() -> u32 {
    30
}
fn default_barrier_short_interval_ms() -> u64 {
    10
}
fn default_barrier_long_interval_ms() -> u64 {
    30
}
fn default_region_unavailability_ms() -> u64 {
    DEFAULT_UNAVAILABILITY_TTL.as_millis() as u64
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            preferred_regions: Vec::new(),
            connection_mode: ConnectionMode::default(),
            max_retry_attempts_on_throttled_requests: default_max_throttle_retries(),
            max_retry_wait_on_throttled_requests_ms: default_max_throttle_wait_ms(),
            throttle_backoff_initial_ms: default_throttle_backoff_initial_ms(),
            max_gone_retries: default_max_gone_retries(),
            gone_backoff_initial_ms: default_gone_backoff_initial_ms(),
            gone_backoff_max_ms: default_gone_backoff_max_ms(),
            max_session_retries_in_region: default_max_session_retries(),
            max_region_failovers: default_max_region_failovers(),
            hedging: None,
            barrier_max_attempts: default_barrier_max_attempts(),
            barrier_short_interval_ms: default_barrier_short_interval_ms(),
            barrier_long_interval_ms: default_barrier_long_interval_ms(),
            end_to_end_timeout_ms: None,
            region_unavailability_ms: default_region_unavailability_ms(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> CosmosResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CosmosError::configuration(format!("Failed to read config: {}", e)))?;
        let config = Self::from_json(&content)?;
        log_event(Event::ConfigLoaded, &path.display().to_string(), "client configuration loaded");
        Ok(config)
    }

    pub fn from_json(content: &str) -> CosmosResult<Self> {
        let config: ClientConfig = serde_json::from_str(content)
            .map_err(|e| CosmosError::configuration(format!("Invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CosmosResult<()> {
        if self.gone_backoff_initial_ms > self.gone_backoff_max_ms {
            return Err(CosmosError::configuration(
                "gone_backoff_initial_ms must not exceed gone_backoff_max_ms",
            ));
        }

        if self.barrier_max_attempts == 0 {
            return Err(CosmosError::configuration("barrier_max_attempts must be > 0"));
        }

        if let Some(ref hedging) = self.hedging {
            if hedging.threshold_ms == 0 || hedging.threshold_step_ms == 0 {
                return Err(CosmosError::configuration(
                    "hedging threshold_ms and threshold_step_ms must be > 0",
                ));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for region in &self.preferred_regions {
            if !seen.insert(region) {
                return Err(CosmosError::configuration(format!(
                    "preferred region '{}' listed twice",
                    region
                )));
            }
        }

        Ok(())
    }

    pub fn preferred_regions(&self) -> Vec<Region> {
        self.preferred_regions.iter().map(|r| Region::from(r.as_str())).collect()
    }

    pub fn retry_options(&self) -> RetryOptions {
        let defaults = RetryOptions::default();
        RetryOptions {
            max_retry_attempts_on_throttled_requests: self.max_retry_attempts_on_throttled_requests,
            max_retry_wait_on_throttled_requests: Duration::from_millis(
                self.max_retry_wait_on_throttled_requests_ms,
            ),
            throttle_backoff: BackoffPolicy::new(
                Duration::from_millis(self.throttle_backoff_initial_ms),
                2,
                defaults.throttle_backoff.max,
            ),
            max_gone_retries: self.max_gone_retries,
            gone_backoff: BackoffPolicy::new(
                Duration::from_millis(self.gone_backoff_initial_ms),
                2,
                Duration::from_millis(self.gone_backoff_max_ms),
            ),
            max_session_retries_in_region: self.max_session_retries_in_region,
            max_region_failovers: self.max_region_failovers,
            ..defaults
        }
    }

    pub fn barrier_options(&self) -> BarrierOptions {
        BarrierOptions {
            max_attempts: self.barrier_max_attempts,
            short_interval: Duration::from_millis(self.barrier_short_interval_ms),
            long_interval: Duration::from_millis(self.barrier_long_interval_ms),
            ..BarrierOptions::default()
        }
    }

    pub fn availability_strategy(&self) -> CosmosResult<AvailabilityStrategy> {
        match self.hedging {
            Some(ref h) => AvailabilityStrategy::cross_region_hedging(
                Duration::from_millis(h.threshold_ms),
                Duration::from_millis(h.threshold_step_ms),
                h.exclude_regions_with_failures,
            ),
            None => Ok(AvailabilityStrategy::Disabled),
        }
    }

    pub fn end_to_end_timeout(&self) -> Option<Duration> {
        self.end_to_end_timeout_ms.map(Duration::from_millis)
    }

    pub fn region_unavailability(&self) -> Duration {
        Duration::from_millis(self.region_unavailability_ms)
    }
}
