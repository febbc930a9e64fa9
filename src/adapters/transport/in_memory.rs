//! In-memory push transport implementation for testing.
//!
//! Provides deterministic, scriptable channel behavior so subscription
//! lifecycle tests can run without a real push connection.
//!
//! # Security Note
//!
//! This adapter is for **testing only** and should not be used in
//! production. It uses `.expect()` on lock operations which will panic if
//! locks are poisoned. Production deployments should use the websocket
//! transport adapter of the portal application.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{ChangeEvent, ChannelMessage, ChannelStatus, SyncError};
use crate::ports::{PushChannel, PushTransport};

/// Scriptable in-memory push transport.
///
/// Features:
/// - Per-table scripted handshakes (the status sequence the next `open`
///   delivers); unscripted opens confirm immediately
/// - Live event/status injection into open channels
/// - Open and live-channel counters for leak assertions
///
/// # Panics
///
/// Methods may panic if internal locks are poisoned. This is acceptable
/// for test code but this adapter should NOT be used in production.
///
/// # Example
///
/// ```ignore
/// let transport = InMemoryPushTransport::new();
///
/// // Next open on "messages" errors three times instead of confirming
/// transport.script_open(
///     "messages",
///     vec![ChannelMessage::Status(ChannelStatus::ChannelError); 3],
/// );
///
/// // Later, assert no channel leaked
/// assert_eq!(transport.live_channel_count("messages"), 0);
/// ```
#[derive(Clone)]
pub struct InMemoryPushTransport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    /// Queued message preloads for upcoming opens, per table.
    scripts: Mutex<HashMap<String, VecDeque<Vec<ChannelMessage>>>>,
    /// Senders of currently open channels, keyed by channel id.
    live: Mutex<HashMap<u64, LiveChannel>>,
    /// `open()` call count per table.
    opens: Mutex<HashMap<String, u64>>,
    next_id: AtomicU64,
}

struct LiveChannel {
    table: String,
    sender: mpsc::UnboundedSender<ChannelMessage>,
}

impl InMemoryPushTransport {
    /// Creates a transport where every open confirms immediately.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TransportInner {
                scripts: Mutex::new(HashMap::new()),
                live: Mutex::new(HashMap::new()),
                opens: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    // === Scripting ===

    /// Queues the message preload delivered by the next `open` on a table.
    ///
    /// Calling repeatedly queues scripts for successive opens. Opens with
    /// no queued script deliver `Connecting` then `Subscribed`.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn script_open(&self, table: &str, messages: Vec<ChannelMessage>) {
        self.inner
            .scripts
            .lock()
            .expect("InMemoryPushTransport: scripts lock poisoned")
            .entry(table.to_string())
            .or_default()
            .push_back(messages);
    }

    /// Queues an open that errors `n` times and never confirms.
    pub fn script_failing_open(&self, table: &str, errors: usize) {
        self.script_open(
            table,
            std::iter::once(ChannelMessage::Status(ChannelStatus::Connecting))
                .chain(
                    std::iter::repeat(ChannelMessage::Status(ChannelStatus::ChannelError))
                        .take(errors),
                )
                .collect(),
        );
    }

    // === Live injection ===

    /// Delivers a change event to every open channel of a table.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn emit(&self, table: &str, event: ChangeEvent) {
        self.broadcast(table, ChannelMessage::Change(event));
    }

    /// Delivers a status transition to every open channel of a table.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn push_status(&self, table: &str, status: ChannelStatus) {
        self.broadcast(table, ChannelMessage::Status(status));
    }

    fn broadcast(&self, table: &str, message: ChannelMessage) {
        let live = self
            .inner
            .live
            .lock()
            .expect("InMemoryPushTransport: live lock poisoned");
        for channel in live.values().filter(|c| c.table == table) {
            // A closed receiver just drops the message.
            let _ = channel.sender.send(message.clone());
        }
    }

    // === Test Helpers ===

    /// Number of `open` calls seen for a table.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn open_count(&self, table: &str) -> u64 {
        self.inner
            .opens
            .lock()
            .expect("InMemoryPushTransport: opens lock poisoned")
            .get(table)
            .copied()
            .unwrap_or(0)
    }

    /// Number of channels currently open for a table.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn live_channel_count(&self, table: &str) -> usize {
        self.inner
            .live
            .lock()
            .expect("InMemoryPushTransport: live lock poisoned")
            .values()
            .filter(|c| c.table == table)
            .count()
    }

    /// Total number of open channels across all tables.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn total_live_channels(&self) -> usize {
        self.inner
            .live
            .lock()
            .expect("InMemoryPushTransport: live lock poisoned")
            .len()
    }
}

impl Default for InMemoryPushTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushTransport for InMemoryPushTransport {
    async fn open(&self, table: &str) -> Result<Box<dyn PushChannel>, SyncError> {
        *self
            .inner
            .opens
            .lock()
            .expect("InMemoryPushTransport: opens lock poisoned")
            .entry(table.to_string())
            .or_insert(0) += 1;

        let preload = self
            .inner
            .scripts
            .lock()
            .expect("InMemoryPushTransport: scripts lock poisoned")
            .get_mut(table)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                vec![
                    ChannelMessage::Status(ChannelStatus::Connecting),
                    ChannelMessage::Status(ChannelStatus::Subscribed),
                ]
            });

        let (sender, receiver) = mpsc::unbounded_channel();
        for message in preload {
            let _ = sender.send(message);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .live
            .lock()
            .expect("InMemoryPushTransport: live lock poisoned")
            .insert(
                id,
                LiveChannel {
                    table: table.to_string(),
                    sender,
                },
            );

        Ok(Box::new(InMemoryPushChannel {
            table: table.to_string(),
            id,
            receiver,
            inner: Arc::clone(&self.inner),
        }))
    }
}

/// Channel handle returned by [`InMemoryPushTransport::open`].
struct InMemoryPushChannel {
    table: String,
    id: u64,
    receiver: mpsc::UnboundedReceiver<ChannelMessage>,
    inner: Arc<TransportInner>,
}

impl InMemoryPushChannel {
    fn release(&self) {
        self.inner
            .live
            .lock()
            .expect("InMemoryPushTransport: live lock poisoned")
            .remove(&self.id);
    }
}

#[async_trait]
impl PushChannel for InMemoryPushChannel {
    async fn recv(&mut self) -> Option<ChannelMessage> {
        self.receiver.recv().await
    }

    async fn close(&mut self) {
        self.release();
        self.receiver.close();
    }

    fn table(&self) -> &str {
        &self.table
    }
}

impl Drop for InMemoryPushChannel {
    fn drop(&mut self) {
        // Dropping an unclosed handle must not leak a live registration.
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::domain::ChangeKind;

    #[tokio::test]
    async fn default_open_confirms_immediately() {
        let transport = InMemoryPushTransport::new();
        let mut channel = transport.open("grades").await.unwrap();

        assert!(matches!(
            channel.recv().await,
            Some(ChannelMessage::Status(ChannelStatus::Connecting))
        ));
        assert!(matches!(
            channel.recv().await,
            Some(ChannelMessage::Status(ChannelStatus::Subscribed))
        ));
        assert_eq!(transport.open_count("grades"), 1);
        assert_eq!(transport.live_channel_count("grades"), 1);
    }

    #[tokio::test]
    async fn scripted_open_replaces_default_handshake() {
        let transport = InMemoryPushTransport::new();
        transport.script_failing_open("messages", 2);

        let mut channel = transport.open("messages").await.unwrap();

        assert!(matches!(
            channel.recv().await,
            Some(ChannelMessage::Status(ChannelStatus::Connecting))
        ));
        assert!(matches!(
            channel.recv().await,
            Some(ChannelMessage::Status(ChannelStatus::ChannelError))
        ));
        assert!(matches!(
            channel.recv().await,
            Some(ChannelMessage::Status(ChannelStatus::ChannelError))
        ));
    }

    #[tokio::test]
    async fn scripts_apply_to_successive_opens_in_order() {
        let transport = InMemoryPushTransport::new();
        transport.script_open(
            "attendance",
            vec![ChannelMessage::Status(ChannelStatus::TimedOut)],
        );

        let mut first = transport.open("attendance").await.unwrap();
        assert!(matches!(
            first.recv().await,
            Some(ChannelMessage::Status(ChannelStatus::TimedOut))
        ));

        // Second open falls back to the default confirming handshake.
        let mut second = transport.open("attendance").await.unwrap();
        assert!(matches!(
            second.recv().await,
            Some(ChannelMessage::Status(ChannelStatus::Connecting))
        ));
    }

    #[tokio::test]
    async fn emit_reaches_only_matching_table() {
        let transport = InMemoryPushTransport::new();
        let mut attendance = transport.open("attendance").await.unwrap();
        let mut grades = transport.open("grades").await.unwrap();

        // Drain handshakes
        for _ in 0..2 {
            attendance.recv().await;
            grades.recv().await;
        }

        transport.emit(
            "attendance",
            ChangeEvent::new(ChangeKind::Insert, "attendance", json!({"student": 9})),
        );

        let received = attendance.recv().await;
        assert!(matches!(received, Some(ChannelMessage::Change(_))));

        // The grades channel saw nothing beyond its handshake.
        transport.push_status("grades", ChannelStatus::Closed);
        assert!(matches!(
            grades.recv().await,
            Some(ChannelMessage::Status(ChannelStatus::Closed))
        ));
    }

    #[tokio::test]
    async fn close_releases_live_registration() {
        let transport = InMemoryPushTransport::new();
        let mut channel = transport.open("messages").await.unwrap();
        assert_eq!(transport.live_channel_count("messages"), 1);

        channel.close().await;
        assert_eq!(transport.live_channel_count("messages"), 0);

        // Idempotent
        channel.close().await;
        assert_eq!(transport.live_channel_count("messages"), 0);
    }

    #[tokio::test]
    async fn dropping_channel_releases_registration() {
        let transport = InMemoryPushTransport::new();
        {
            let _channel = transport.open("messages").await.unwrap();
            assert_eq!(transport.total_live_channels(), 1);
        }
        assert_eq!(transport.total_live_channels(), 0);
    }
}
