//! Process-wide connection health monitor.
//!
//! One monitor exists per [`RealtimeSync`](super::RealtimeSync) context and
//! is shared by every table subscription. It tracks connection attempts,
//! successes and errors, decides when push delivery is unhealthy enough to
//! fall back to polling, and announces recovery to registered listeners.
//!
//! # State Sharing
//!
//! This is the only mutable state shared across tables. Every mutation is a
//! single lock acquisition with no await inside, so concurrent table drivers
//! always observe complete transitions.
//!
//! ## Fallback / Recovery Cycle
//!
//! Fallback engages when the error thresholds are crossed, and also
//! whenever a table demotes to polling: a polling table relies on the
//! recovery loop for its way back to push.
//!
//! ```text
//! healthy --[threshold crossed]--> fallback --[backoff elapsed]--> recovering
//!    ▲                                ▲                                │
//!    │                                └───────[probe failed]───────────┤
//!    └────────────[probe succeeded: recovery callbacks fire]───────────┘
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::watch;

use crate::config::HealthPolicy;
use crate::domain::{ConnectionHealth, SyncError, Timestamp};

type RecoveryCallback = Arc<dyn Fn() + Send + Sync>;

/// Shared monitor for push-delivery health across all subscriptions.
pub struct HealthMonitor {
    policy: HealthPolicy,
    state: Mutex<HealthState>,
    callbacks: Mutex<HashMap<u64, RecoveryCallback>>,
    next_callback_id: AtomicU64,
    fallback_tx: watch::Sender<bool>,
}

#[derive(Default)]
struct HealthState {
    total_connections: u64,
    failed_connections: u64,
    connection_errors: u64,
    /// Failed attempts since the last success, across all tables.
    consecutive_failures: u32,
    is_connected: bool,
    is_in_fallback_mode: bool,
    is_recovering: bool,
    last_error_time: Option<Timestamp>,
    last_recovery_attempt: Option<Timestamp>,
}

impl HealthMonitor {
    /// Creates a monitor with the given fallback policy.
    pub fn new(policy: HealthPolicy) -> Arc<Self> {
        let (fallback_tx, _) = watch::channel(false);
        Arc::new(Self {
            policy,
            state: Mutex::new(HealthState::default()),
            callbacks: Mutex::new(HashMap::new()),
            next_callback_id: AtomicU64::new(1),
            fallback_tx,
        })
    }

    fn state(&self) -> MutexGuard<'_, HealthState> {
        self.state.lock().expect("HealthMonitor: state lock poisoned")
    }

    /// Records a connection attempt. Side effect only, never fails.
    pub fn record_connection(&self) {
        self.state().total_connections += 1;
    }

    /// Records a confirmed live subscription.
    ///
    /// Resets the failure streak. If the monitor was in fallback this is a
    /// successful recovery: fallback and recovering are cleared and every
    /// registered recovery callback fires exactly once for this event.
    pub fn record_success(&self) {
        let recovered = {
            let mut state = self.state();
            state.is_connected = true;
            state.consecutive_failures = 0;
            let recovered = state.is_in_fallback_mode;
            state.is_in_fallback_mode = false;
            state.is_recovering = false;
            recovered
        };

        if recovered {
            tracing::info!("push delivery recovered, leaving fallback mode");
            let _ = self.fallback_tx.send(false);
            self.fire_recovery_callbacks();
        }
    }

    /// Records a failed attempt or channel error.
    ///
    /// Bumps the error counters, stamps the error time, ends any recovery
    /// probe window, and engages fallback once the threshold is crossed.
    /// Configuration errors are ignored: retrying them can never succeed,
    /// so they must not push the monitor toward fallback.
    pub fn record_error(&self, error: &SyncError) {
        if !error.is_transient() {
            tracing::warn!(error = %error, "non-transient sync error, not counted toward fallback");
            return;
        }

        let entered_fallback = {
            let mut state = self.state();
            state.connection_errors += 1;
            state.failed_connections += 1;
            state.consecutive_failures += 1;
            state.last_error_time = Some(Timestamp::now());
            // A failed probe returns to plain fallback and restarts the
            // backoff window.
            state.is_recovering = false;

            let should_fall_back = self.evaluate_fallback(&state);
            let entering = should_fall_back && !state.is_in_fallback_mode;
            if entering {
                state.is_in_fallback_mode = true;
            }
            entering
        };

        if entered_fallback {
            tracing::warn!("push delivery unhealthy, entering fallback mode");
            let _ = self.fallback_tx.send(true);
        }
    }

    /// Forces fallback mode on regardless of the counters.
    ///
    /// Called when a single table exhausts its retry budget and demotes to
    /// polling: global counters can look healthy at that moment (another
    /// table's success resets the streak), but a polling table without the
    /// recovery loop running would poll forever.
    pub fn engage_fallback(&self) {
        let entering = {
            let mut state = self.state();
            let entering = !state.is_in_fallback_mode;
            state.is_in_fallback_mode = true;
            entering
        };

        if entering {
            tracing::warn!("a subscription demoted to polling, entering fallback mode");
            let _ = self.fallback_tx.send(true);
        }
    }

    /// Stamps the start of a recovery probe window.
    ///
    /// No-op outside fallback mode; recovery is only attempted from
    /// fallback, which keeps `is_recovering ⇒ is_in_fallback_mode` true.
    pub fn mark_recovery_attempt(&self) {
        let mut state = self.state();
        if state.is_in_fallback_mode {
            state.is_recovering = true;
            state.last_recovery_attempt = Some(Timestamp::now());
        }
    }

    /// Pure query: should tables be handed to the polling scheduler?
    ///
    /// True once the consecutive failure streak reaches the policy limit or
    /// the global failure ratio indicates systemic push unavailability.
    /// Monotonic within one error streak: only a success resets it.
    pub fn should_use_fallback(&self) -> bool {
        let state = self.state();
        state.is_in_fallback_mode || self.evaluate_fallback(&state)
    }

    fn evaluate_fallback(&self, state: &HealthState) -> bool {
        if state.consecutive_failures >= self.policy.max_consecutive_failures {
            return true;
        }
        state.total_connections >= self.policy.min_attempts_for_ratio
            && state.failed_connections as f64 / state.total_connections as f64
                >= self.policy.failure_ratio
    }

    /// Registers a callback invoked once per successful recovery.
    ///
    /// The returned registration unregisters explicitly or on drop, and is
    /// safe to release after the monitor itself has gone away.
    pub fn register_recovery_callback(
        self: &Arc<Self>,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> RecoveryRegistration {
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .lock()
            .expect("HealthMonitor: callbacks lock poisoned")
            .insert(id, Arc::new(callback));
        RecoveryRegistration {
            id,
            monitor: Arc::downgrade(self),
        }
    }

    fn fire_recovery_callbacks(&self) {
        // Snapshot under the lock, invoke outside it: each callback fires
        // exactly once for this recovery event, and a callback is free to
        // register or unregister without deadlocking.
        let snapshot: Vec<RecoveryCallback> = {
            let callbacks = self
                .callbacks
                .lock()
                .expect("HealthMonitor: callbacks lock poisoned");
            callbacks.values().cloned().collect()
        };

        for callback in snapshot {
            callback();
        }
    }

    fn unregister(&self, id: u64) {
        self.callbacks
            .lock()
            .expect("HealthMonitor: callbacks lock poisoned")
            .remove(&id);
    }

    /// Watch channel carrying the fallback flag; used by the recovery loop.
    pub fn fallback_changes(&self) -> watch::Receiver<bool> {
        self.fallback_tx.subscribe()
    }

    /// Read-only snapshot of the current health, never the live state.
    pub fn status(&self) -> ConnectionHealth {
        let state = self.state();
        ConnectionHealth {
            total_connections: state.total_connections,
            failed_connections: state.failed_connections,
            connection_errors: state.connection_errors,
            is_connected: state.is_connected,
            is_in_fallback_mode: state.is_in_fallback_mode,
            is_recovering: state.is_recovering,
            last_error_time: state.last_error_time,
            last_recovery_attempt: state.last_recovery_attempt,
        }
    }
}

/// Scoped handle for a registered recovery callback.
///
/// Dropping the handle unregisters the callback.
pub struct RecoveryRegistration {
    id: u64,
    monitor: Weak<HealthMonitor>,
}

impl RecoveryRegistration {
    /// Removes the callback; it will not fire for later recoveries.
    pub fn unregister(self) {
        // Drop impl does the work.
    }
}

impl Drop for RecoveryRegistration {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.upgrade() {
            monitor.unregister(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn monitor() -> Arc<HealthMonitor> {
        HealthMonitor::new(HealthPolicy::default())
    }

    fn channel_error() -> SyncError {
        SyncError::channel("messages", "dropped")
    }

    fn fail(m: &HealthMonitor) {
        m.record_connection();
        m.record_error(&channel_error());
    }

    fn succeed(m: &HealthMonitor) {
        m.record_connection();
        m.record_success();
    }

    // ─── Counters ─────────────────────────────────────────────────────

    #[test]
    fn record_connection_increments_total() {
        let m = monitor();
        m.record_connection();
        m.record_connection();
        assert_eq!(m.status().total_connections, 2);
    }

    #[test]
    fn errors_bump_both_error_counters() {
        let m = monitor();
        fail(&m);
        let status = m.status();
        assert_eq!(status.failed_connections, 1);
        assert_eq!(status.connection_errors, 1);
        assert!(status.last_error_time.is_some());
    }

    #[test]
    fn configuration_errors_do_not_count() {
        let m = monitor();
        m.record_error(&SyncError::configuration("grades", "empty key set"));
        let status = m.status();
        assert_eq!(status.connection_errors, 0);
        assert!(!m.should_use_fallback());
    }

    // ─── Fallback Threshold ───────────────────────────────────────────

    #[test]
    fn consecutive_failures_trigger_fallback() {
        let m = monitor();
        fail(&m);
        fail(&m);
        assert!(!m.should_use_fallback());
        fail(&m);
        assert!(m.should_use_fallback());
        assert!(m.status().is_in_fallback_mode);
    }

    #[test]
    fn failure_ratio_triggers_fallback_despite_interleaved_successes() {
        let m = monitor();
        // F S F S F F: streak never reaches 3, ratio is 4/6 >= 0.5
        fail(&m);
        succeed(&m);
        fail(&m);
        succeed(&m);
        fail(&m);
        fail(&m);
        assert!(m.should_use_fallback());
    }

    #[test]
    fn ratio_needs_minimum_sample_size() {
        let m = monitor();
        // 1 failure out of 1 attempt is a 100% ratio but not a signal.
        fail(&m);
        assert!(!m.should_use_fallback());
    }

    #[test]
    fn fallback_is_monotonic_until_success() {
        let m = monitor();
        for _ in 0..3 {
            fail(&m);
        }
        assert!(m.should_use_fallback());
        fail(&m);
        assert!(m.should_use_fallback());

        m.record_success();
        assert!(!m.status().is_in_fallback_mode);
        assert!(!m.should_use_fallback());
    }

    #[test]
    fn engage_fallback_overrides_healthy_counters() {
        let m = monitor();
        succeed(&m);
        assert!(!m.should_use_fallback());

        let rx = m.fallback_changes();
        m.engage_fallback();
        assert!(m.status().is_in_fallback_mode);
        assert!(m.should_use_fallback());
        assert!(*rx.borrow());

        // Idempotent while already engaged.
        m.engage_fallback();
        assert!(m.status().is_in_fallback_mode);

        // The next success is a recovery like any other.
        m.record_success();
        assert!(!m.status().is_in_fallback_mode);
        assert!(!*rx.borrow());
    }

    // ─── Recovery ─────────────────────────────────────────────────────

    #[test]
    fn recovering_implies_fallback() {
        let m = monitor();
        m.mark_recovery_attempt();
        assert!(!m.status().is_recovering, "no recovery outside fallback");

        for _ in 0..3 {
            fail(&m);
        }
        m.mark_recovery_attempt();
        let status = m.status();
        assert!(status.is_recovering);
        assert!(status.is_in_fallback_mode);
        assert!(status.last_recovery_attempt.is_some());
    }

    #[test]
    fn failed_probe_returns_to_plain_fallback() {
        let m = monitor();
        for _ in 0..3 {
            fail(&m);
        }
        m.mark_recovery_attempt();
        fail(&m);

        let status = m.status();
        assert!(!status.is_recovering);
        assert!(status.is_in_fallback_mode);
    }

    #[test]
    fn successful_recovery_fires_callbacks_once() {
        let m = monitor();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let _registration =
            m.register_recovery_callback(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        for _ in 0..3 {
            fail(&m);
        }
        m.mark_recovery_attempt();
        m.record_success();

        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // A success outside fallback fires nothing.
        m.record_success();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callbacks_persist_across_recoveries() {
        let m = monitor();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let _registration =
            m.register_recovery_callback(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        for round in 1..=2 {
            for _ in 0..3 {
                fail(&m);
            }
            m.record_success();
            assert_eq!(fired.load(Ordering::SeqCst), round);
        }
    }

    #[test]
    fn unregistered_callback_does_not_fire() {
        let m = monitor();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let registration =
            m.register_recovery_callback(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        registration.unregister();

        for _ in 0..3 {
            fail(&m);
        }
        m.record_success();

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn registration_outlives_monitor_safely() {
        let m = monitor();
        let registration = m.register_recovery_callback(|| {});
        drop(m);
        registration.unregister();
    }

    // ─── Snapshot & Signaling ─────────────────────────────────────────

    #[test]
    fn status_returns_a_copy() {
        let m = monitor();
        let before = m.status();
        fail(&m);
        assert_eq!(before.connection_errors, 0);
        assert_eq!(m.status().connection_errors, 1);
    }

    #[test]
    fn fallback_watch_reflects_transitions() {
        let m = monitor();
        let rx = m.fallback_changes();
        assert!(!*rx.borrow());

        for _ in 0..3 {
            fail(&m);
        }
        assert!(*rx.borrow());

        m.record_success();
        assert!(!*rx.borrow());
    }
}
