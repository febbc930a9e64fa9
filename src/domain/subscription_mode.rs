//! Per-table subscription lifecycle states.

use super::state_machine::StateMachine;

/// Delivery mode of a single watched table.
///
/// Exactly one mode applies at a time, so a table can never be subscribed
/// and polling simultaneously. Legal edges:
///
/// ```text
/// Disconnected ──> Connecting ──> Subscribed
///       ▲              │  │            │
///       │              │  └──> Polling <┘   (error / fallback)
///       └── Connecting │           │
///       └── Subscribed (closed)    │
///       └── Polling (recovery) <───┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionMode {
    /// No channel and no polling; a fresh connect is allowed.
    Disconnected,
    /// Channel opened, waiting for the transport to confirm.
    Connecting,
    /// Push delivery confirmed live.
    Subscribed,
    /// Interval polling is substituting for push delivery.
    Polling,
}

impl StateMachine for SubscriptionMode {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SubscriptionMode::*;
        matches!(
            (self, target),
            (Disconnected, Connecting)
                | (Connecting, Subscribed)
                | (Connecting, Disconnected)
                | (Connecting, Polling)
                | (Subscribed, Disconnected)
                | (Subscribed, Polling)
                | (Polling, Disconnected)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionMode::*;
        match self {
            Disconnected => vec![Connecting],
            Connecting => vec![Subscribed, Disconnected, Polling],
            Subscribed => vec![Disconnected, Polling],
            // Recovery is the only exit from polling.
            Polling => vec![Disconnected],
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SubscriptionMode::Disconnected => "disconnected",
            SubscriptionMode::Connecting => "connecting",
            SubscriptionMode::Subscribed => "subscribed",
            SubscriptionMode::Polling => "polling",
        }
    }
}

impl std::fmt::Display for SubscriptionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_path_is_legal() {
        let mode = SubscriptionMode::Disconnected
            .transition_to(SubscriptionMode::Connecting)
            .unwrap()
            .transition_to(SubscriptionMode::Subscribed)
            .unwrap();
        assert_eq!(mode, SubscriptionMode::Subscribed);
    }

    #[test]
    fn subscribed_and_polling_cannot_coexist() {
        // Polling is reached by leaving Subscribed, never alongside it.
        assert!(SubscriptionMode::Subscribed.can_transition_to(&SubscriptionMode::Polling));
        assert!(!SubscriptionMode::Polling.can_transition_to(&SubscriptionMode::Subscribed));
    }

    #[test]
    fn polling_only_exits_to_disconnected() {
        assert_eq!(
            SubscriptionMode::Polling.valid_transitions(),
            vec![SubscriptionMode::Disconnected]
        );
    }

    #[test]
    fn no_mode_is_terminal() {
        for mode in [
            SubscriptionMode::Disconnected,
            SubscriptionMode::Connecting,
            SubscriptionMode::Subscribed,
            SubscriptionMode::Polling,
        ] {
            assert!(!mode.is_terminal(), "{} should not be terminal", mode);
        }
    }
}
