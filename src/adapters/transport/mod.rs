//! Push transport adapters.

mod in_memory;

pub use in_memory::InMemoryPushTransport;
