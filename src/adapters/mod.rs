//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the sync core to external systems:
//! - `transport` - Push transport implementations (in-memory)
//! - `cache` - Query cache implementations (in-memory)

pub mod cache;
pub mod transport;

pub use cache::{InMemoryQueryCache, Invalidation};
pub use transport::InMemoryPushTransport;
