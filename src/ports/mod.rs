//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the sync core and the outside world. Adapters implement these ports.
//!
//! - `PushTransport` / `PushChannel` - server-push delivery of per-table
//!   change notifications
//! - `QueryCache` - mark-stale invalidation of cached query results

mod push_transport;
mod query_cache;

pub use push_transport::{PushChannel, PushTransport};
pub use query_cache::{InvalidateOptions, QueryCache};
