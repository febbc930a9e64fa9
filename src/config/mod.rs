//! Sync configuration module
//!
//! This module provides type-safe configuration loading from environment
//! variables using the `config` and `dotenvy` crates. Configuration is
//! loaded with the `CAMPUS_SYNC_` prefix and nested values use double
//! underscores as separators.
//!
//! All numeric policies here (fallback thresholds, backoff, intervals) are
//! tunable constants, not invariants; the defaults match the behavior the
//! portals shipped with.
//!
//! # Example
//!
//! ```no_run
//! use campus_sync::config::SyncConfig;
//!
//! let config = SyncConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod error;

pub use error::{ConfigError, ValidationError};

use std::time::Duration;

use serde::Deserialize;

/// Root configuration for the realtime sync core.
///
/// Load using [`SyncConfig::load()`] which reads from environment
/// variables, or construct directly in tests.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Master switch; when false, `init()` is a no-op and no channels or
    /// timers are ever created.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Fallback and recovery thresholds for the health monitor.
    #[serde(default)]
    pub health: HealthPolicy,

    /// Per-table channel retry policy.
    #[serde(default)]
    pub subscription: SubscriptionPolicy,

    /// Fallback polling intervals.
    #[serde(default)]
    pub polling: PollingPolicy,
}

fn default_enabled() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            health: HealthPolicy::default(),
            subscription: SubscriptionPolicy::default(),
            polling: PollingPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with the `CAMPUS_SYNC` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `CAMPUS_SYNC__ENABLED=false` -> `enabled = false`
    /// - `CAMPUS_SYNC__HEALTH__RECOVERY_BACKOFF_SECS=30`
    ///   -> `health.recovery_backoff_secs = 30`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if values cannot be parsed into the expected
    /// types.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("CAMPUS_SYNC")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.health.validate()?;
        self.subscription.validate()?;
        self.polling.validate()?;
        Ok(())
    }
}

/// Fallback thresholds and recovery timing for the health monitor.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthPolicy {
    /// Consecutive failed attempts before fallback engages.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Global failure ratio indicating systemic push unavailability.
    #[serde(default = "default_failure_ratio")]
    pub failure_ratio: f64,

    /// Minimum attempts before the ratio check applies, so a single early
    /// failure cannot trip it.
    #[serde(default = "default_min_attempts_for_ratio")]
    pub min_attempts_for_ratio: u64,

    /// Seconds to wait in fallback before each recovery probe.
    #[serde(default = "default_recovery_backoff_secs")]
    pub recovery_backoff_secs: u64,
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_failure_ratio() -> f64 {
    0.5
}

fn default_min_attempts_for_ratio() -> u64 {
    5
}

fn default_recovery_backoff_secs() -> u64 {
    60
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: default_max_consecutive_failures(),
            failure_ratio: default_failure_ratio(),
            min_attempts_for_ratio: default_min_attempts_for_ratio(),
            recovery_backoff_secs: default_recovery_backoff_secs(),
        }
    }
}

impl HealthPolicy {
    /// Backoff between recovery probes as a `Duration`.
    pub fn recovery_backoff(&self) -> Duration {
        Duration::from_secs(self.recovery_backoff_secs)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.max_consecutive_failures == 0 {
            return Err(ValidationError::InvalidFailureThreshold);
        }
        if !(self.failure_ratio > 0.0 && self.failure_ratio <= 1.0) {
            return Err(ValidationError::InvalidFailureRatio);
        }
        if self.recovery_backoff_secs == 0 {
            return Err(ValidationError::InvalidRecoveryBackoff);
        }
        Ok(())
    }
}

/// Retry policy for a single table's push channel.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionPolicy {
    /// Channel errors tolerated per table before demoting to polling.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Seconds a recovery probe waits for subscription confirmation.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_probe_timeout_secs() -> u64 {
    10
}

impl Default for SubscriptionPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl SubscriptionPolicy {
    /// Probe confirmation timeout as a `Duration`.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.max_retries == 0 {
            return Err(ValidationError::InvalidMaxRetries);
        }
        if self.probe_timeout_secs == 0 {
            return Err(ValidationError::InvalidProbeTimeout);
        }
        Ok(())
    }
}

/// Fallback polling intervals.
///
/// High-volume tables poll less often than low-volume ones, trading
/// staleness for reduced load while push delivery is unavailable.
#[derive(Debug, Clone, Deserialize)]
pub struct PollingPolicy {
    /// Interval for throttled (high-volume) tables.
    #[serde(default = "default_high_volume_interval_secs")]
    pub high_volume_interval_secs: u64,

    /// Interval for unthrottled (low-volume) tables.
    #[serde(default = "default_low_volume_interval_secs")]
    pub low_volume_interval_secs: u64,
}

fn default_high_volume_interval_secs() -> u64 {
    60
}

fn default_low_volume_interval_secs() -> u64 {
    30
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self {
            high_volume_interval_secs: default_high_volume_interval_secs(),
            low_volume_interval_secs: default_low_volume_interval_secs(),
        }
    }
}

impl PollingPolicy {
    /// Polling interval for a table, by volume class.
    pub fn interval_for(&self, high_volume: bool) -> Duration {
        if high_volume {
            Duration::from_secs(self.high_volume_interval_secs)
        } else {
            Duration::from_secs(self.low_volume_interval_secs)
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.high_volume_interval_secs == 0 || self.low_volume_interval_secs == 0 {
            return Err(ValidationError::InvalidPollingInterval);
        }
        if self.high_volume_interval_secs < self.low_volume_interval_secs {
            return Err(ValidationError::InvertedPollingIntervals);
        }
        Ok(())
    }
}
