//! PushTransport port - Interface to the server-push delivery mechanism.
//!
//! The transport maintains a persistent connection and delivers per-table
//! change notifications plus channel lifecycle transitions. The sync core
//! treats it as opaque: it must work against any implementation offering
//! this contract (a websocket client in production, a scriptable in-memory
//! adapter in tests).

use async_trait::async_trait;

use crate::domain::{ChannelMessage, SyncError};

/// Port for opening push channels scoped to a single table.
///
/// A channel covers all rows of its table; row-level filtering is not part
/// of this contract.
///
/// # Example
///
/// ```ignore
/// let mut channel = transport.open("attendance").await?;
/// while let Some(message) = channel.recv().await {
///     match message {
///         ChannelMessage::Status(status) => { /* lifecycle */ }
///         ChannelMessage::Change(event) => { /* invalidate */ }
///     }
/// }
/// channel.close().await;
/// ```
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Opens a channel for a table.
    ///
    /// Opening only establishes the channel; the subscription is live once
    /// the channel delivers `ChannelStatus::Subscribed`. Handshake failures
    /// and timeouts are delivered as status messages on the channel, not as
    /// errors here, so an `Err` means the transport could not even start
    /// the handshake.
    async fn open(&self, table: &str) -> Result<Box<dyn PushChannel>, SyncError>;
}

/// An open push channel owned by exactly one subscription driver.
///
/// Implementations must make `close` idempotent and must release the
/// underlying resources when the value is dropped, so a channel cannot leak
/// on a panicking or aborted driver.
#[async_trait]
pub trait PushChannel: Send {
    /// Receives the next message; `None` when the transport has closed the
    /// channel and no further messages will arrive.
    async fn recv(&mut self) -> Option<ChannelMessage>;

    /// Releases the channel. Safe to call more than once.
    async fn close(&mut self);

    /// The table this channel is scoped to.
    fn table(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time check that the port is object-safe.
    #[allow(dead_code)]
    fn assert_transport_object_safe(_: &dyn PushTransport) {}

    #[allow(dead_code)]
    fn assert_channel_object_safe(_: &dyn PushChannel) {}
}
