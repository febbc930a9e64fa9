//! State machine trait for status enums.
//!
//! Provides a consistent interface for validating and performing state
//! transitions on lifecycle enums such as `SubscriptionMode`. Implementors
//! define the legal edges and get validated transition methods for free,
//! which keeps illegal combinations (e.g. subscribed and polling at once)
//! unrepresentable.

use thiserror::Error;

/// A transition was requested that the state machine does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid state transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub to: &'static str,
}

/// Trait for status enums that represent state machines.
///
/// # Example
///
/// ```ignore
/// impl StateMachine for SubscriptionMode {
///     fn can_transition_to(&self, target: &Self) -> bool {
///         matches!(
///             (self, target),
///             (Disconnected, Connecting) |
///             (Connecting, Subscribed) |
///             // ... etc
///         )
///     }
///
///     fn valid_transitions(&self) -> Vec<Self> {
///         match self {
///             Disconnected => vec![Connecting],
///             // ... etc
///         }
///     }
/// }
///
/// let mode = mode.transition_to(SubscriptionMode::Subscribed)?;
/// ```
pub trait StateMachine: Sized + Copy + PartialEq + std::fmt::Debug {
    /// Returns true if transition from self to target is valid.
    fn can_transition_to(&self, target: &Self) -> bool;

    /// Returns all valid target states from current state.
    fn valid_transitions(&self) -> Vec<Self>;

    /// Short name of the state, used in transition errors and logs.
    fn name(&self) -> &'static str;

    /// Performs transition with validation, returning error if invalid.
    ///
    /// This is the preferred way to change state, as it ensures the
    /// transition is valid according to the state machine rules.
    fn transition_to(&self, target: Self) -> Result<Self, InvalidTransition> {
        if self.can_transition_to(&target) {
            Ok(target)
        } else {
            Err(InvalidTransition {
                from: self.name(),
                to: target.name(),
            })
        }
    }

    /// Checks if current state is terminal (no valid outgoing transitions).
    fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum TestStatus {
        Idle,
        Running,
        Done,
    }

    impl StateMachine for TestStatus {
        fn can_transition_to(&self, target: &Self) -> bool {
            matches!(
                (self, target),
                (TestStatus::Idle, TestStatus::Running) | (TestStatus::Running, TestStatus::Done)
            )
        }

        fn valid_transitions(&self) -> Vec<Self> {
            match self {
                TestStatus::Idle => vec![TestStatus::Running],
                TestStatus::Running => vec![TestStatus::Done],
                TestStatus::Done => vec![],
            }
        }

        fn name(&self) -> &'static str {
            match self {
                TestStatus::Idle => "idle",
                TestStatus::Running => "running",
                TestStatus::Done => "done",
            }
        }
    }

    #[test]
    fn valid_transition_succeeds() {
        let next = TestStatus::Idle.transition_to(TestStatus::Running).unwrap();
        assert_eq!(next, TestStatus::Running);
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let err = TestStatus::Idle.transition_to(TestStatus::Done).unwrap_err();
        assert_eq!(err.from, "idle");
        assert_eq!(err.to, "done");
    }

    #[test]
    fn terminal_state_has_no_transitions() {
        assert!(TestStatus::Done.is_terminal());
        assert!(!TestStatus::Idle.is_terminal());
    }
}
