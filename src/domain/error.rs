//! Error types for the synchronization core.
//!
//! The taxonomy mirrors the failure modes of the push transport: a channel
//! can be rejected or dropped (`Channel`), its handshake can exceed the
//! transport's own limit (`Timeout`), or a watch can be unusable from the
//! start (`Configuration`).
//!
//! None of these are terminal for the subsystem: channel and timeout errors
//! are absorbed locally and eventually demote the table to polling, while
//! configuration errors skip the watch entirely. Callers never see a hard
//! failure from the sync core.

use thiserror::Error;

/// Errors raised by the realtime synchronization core.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// The transport rejected or dropped the subscription channel.
    #[error("push channel error on table '{table}': {reason}")]
    Channel { table: String, reason: String },

    /// The channel handshake exceeded the transport's time limit.
    #[error("push channel handshake timed out on table '{table}'")]
    Timeout { table: String },

    /// The watch configuration can never produce a working subscription
    /// (e.g. an empty cache-key set). Logged once, never retried.
    #[error("invalid watch configuration for table '{table}': {reason}")]
    Configuration { table: String, reason: String },
}

impl SyncError {
    /// Creates a channel error for a table.
    pub fn channel(table: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::Channel {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Creates a handshake timeout error for a table.
    pub fn timeout(table: impl Into<String>) -> Self {
        SyncError::Timeout {
            table: table.into(),
        }
    }

    /// Creates a configuration error for a table.
    pub fn configuration(table: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::Configuration {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Returns the table this error belongs to.
    pub fn table(&self) -> &str {
        match self {
            SyncError::Channel { table, .. }
            | SyncError::Timeout { table }
            | SyncError::Configuration { table, .. } => table,
        }
    }

    /// Returns true for errors that count toward the fallback threshold.
    ///
    /// Configuration errors are excluded: retrying them can never succeed,
    /// so they must not push the monitor toward fallback.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Channel { .. } | SyncError::Timeout { .. })
    }
}
