//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("max_retries must be at least 1")]
    InvalidMaxRetries,

    #[error("failure_ratio must be within (0, 1]")]
    InvalidFailureRatio,

    #[error("max_consecutive_failures must be at least 1")]
    InvalidFailureThreshold,

    #[error("recovery backoff must be non-zero")]
    InvalidRecoveryBackoff,

    #[error("probe timeout must be non-zero")]
    InvalidProbeTimeout,

    #[error("polling intervals must be non-zero")]
    InvalidPollingInterval,

    #[error("high-volume polling interval must not be shorter than the low-volume interval")]
    InvertedPollingIntervals,
}
