//! Application layer - orchestration of the sync components.
//!
//! This layer coordinates the domain model with the transport and cache
//! ports: per-table subscription lifecycles, health tracking, throttled
//! invalidation, fallback polling, and the top-level [`RealtimeSync`]
//! context that owns all of them.

mod health;
mod polling;
mod subscription;
mod sync;
mod throttle;

pub use health::{HealthMonitor, RecoveryRegistration};
pub use polling::PollingScheduler;
pub use sync::{RealtimeSync, SyncStatus};
pub use throttle::ThrottledInvalidator;
