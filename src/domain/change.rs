//! Change notifications and channel lifecycle messages.
//!
//! These are the shapes the push transport delivers: row-change events for a
//! watched table, and status transitions for the channel carrying them. The
//! core treats the transport as opaque and works against any implementation
//! producing these messages.

use serde::{Deserialize, Serialize};

/// Kind of row change reported by the push transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// Wildcard subscription covering every change kind.
    #[serde(rename = "*")]
    All,
}

/// A single change notification for a watched table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// What happened to the row.
    pub kind: ChangeKind,

    /// Table the change belongs to.
    pub table: String,

    /// Row payload as delivered by the transport. The sync core never
    /// inspects it; invalidation fan-out comes from the table registry.
    pub payload: serde_json::Value,
}

impl ChangeEvent {
    /// Creates a change event for a table.
    pub fn new(kind: ChangeKind, table: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind,
            table: table.into(),
            payload,
        }
    }
}

/// Lifecycle transitions of a push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Handshake in progress.
    Connecting,
    /// Subscription confirmed live by the transport.
    Subscribed,
    /// The transport rejected or dropped the subscription.
    ChannelError,
    /// The handshake exceeded the transport's own time limit.
    TimedOut,
    /// The channel was closed.
    Closed,
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelStatus::Connecting => "connecting",
            ChannelStatus::Subscribed => "subscribed",
            ChannelStatus::ChannelError => "channel_error",
            ChannelStatus::TimedOut => "timed_out",
            ChannelStatus::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// A message delivered over an open push channel.
#[derive(Debug, Clone)]
pub enum ChannelMessage {
    /// Channel lifecycle transition.
    Status(ChannelStatus),
    /// Row-change notification.
    Change(ChangeEvent),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn change_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ChangeKind::Insert).unwrap(), "\"insert\"");
        assert_eq!(serde_json::to_string(&ChangeKind::All).unwrap(), "\"*\"");
    }

    #[test]
    fn change_event_round_trips() {
        let event = ChangeEvent::new(ChangeKind::Update, "grades", json!({"id": 7}));
        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: ChangeEvent = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded, event);
    }

    #[test]
    fn status_display_names() {
        assert_eq!(ChannelStatus::Subscribed.to_string(), "subscribed");
        assert_eq!(ChannelStatus::TimedOut.to_string(), "timed_out");
    }
}
