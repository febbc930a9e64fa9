//! Domain layer containing the core synchronization types.
//!
//! # Module Organization
//!
//! - `cache_key` - Structured keys under which query results are cached
//! - `change` - Change notifications and channel lifecycle messages
//! - `error` - Sync error taxonomy
//! - `health` - Connection health snapshot
//! - `registry` - Static table watch list (the fan-out source of truth)
//! - `state_machine` - Validated transitions for status enums
//! - `subscription_mode` - Per-table delivery mode state machine
//! - `timestamp` - UTC timestamp value object

mod cache_key;
mod change;
mod error;
mod health;
mod registry;
mod state_machine;
mod subscription_mode;
mod timestamp;

pub use cache_key::CacheKey;
pub use change::{ChangeEvent, ChangeKind, ChannelMessage, ChannelStatus};
pub use error::SyncError;
pub use health::ConnectionHealth;
pub use registry::{TableRegistry, TableWatch};
pub use state_machine::{InvalidTransition, StateMachine};
pub use subscription_mode::SubscriptionMode;
pub use timestamp::Timestamp;
