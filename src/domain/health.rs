//! Connection health snapshot.
//!
//! The live health state belongs to `application::HealthMonitor`; this is the
//! read-only copy handed to callers (telemetry, the health dashboard). Handing
//! out a clone rather than the live struct keeps external code from mutating
//! monitor state.

use serde::Serialize;

use super::Timestamp;

/// Point-in-time copy of the process-wide connection health.
///
/// Steady states: push mode (`is_connected`, not in fallback) or fallback
/// mode (polling substituting for push). The two flags can briefly overlap
/// during transitions; `is_recovering` is only ever true while in fallback.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionHealth {
    /// Cumulative connection attempts across all subscriptions.
    pub total_connections: u64,

    /// Attempts that ended in error or timeout.
    pub failed_connections: u64,

    /// Raw error count; can exceed `failed_connections` when one attempt
    /// errors repeatedly before giving up.
    pub connection_errors: u64,

    /// True once at least one subscription has been confirmed live.
    pub is_connected: bool,

    /// True while polling is substituting for push delivery.
    pub is_in_fallback_mode: bool,

    /// True during a recovery probe window.
    pub is_recovering: bool,

    /// When the most recent error was recorded.
    pub last_error_time: Option<Timestamp>,

    /// When the most recent recovery probe started.
    pub last_recovery_attempt: Option<Timestamp>,
}

impl ConnectionHealth {
    /// Failure ratio over all attempts, or 0.0 before any attempt.
    pub fn failure_ratio(&self) -> f64 {
        if self.total_connections == 0 {
            0.0
        } else {
            self.failed_connections as f64 / self.total_connections as f64
        }
    }
}
