//! Per-table push subscription lifecycle.
//!
//! Each watched table owns one [`TableSubscription`]: it opens the table's
//! push channel, reports every attempt and outcome to the health monitor,
//! routes change notifications into cache invalidations, and hands the
//! table to the polling scheduler when the channel proves unreliable.
//!
//! Exactly one live channel exists per table at any time. The channel is a
//! scoped resource: the driver task owns it and releases it on every exit
//! path, including error paths and teardown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::config::{PollingPolicy, SubscriptionPolicy};
use crate::domain::{
    CacheKey, ChangeEvent, ChannelMessage, ChannelStatus, StateMachine, SubscriptionMode,
    SyncError, TableWatch,
};
use crate::ports::{InvalidateOptions, PushChannel, PushTransport, QueryCache};

use super::health::HealthMonitor;
use super::polling::PollingScheduler;
use super::throttle::ThrottledInvalidator;

/// Collaborators shared by every table subscription of one sync context.
#[derive(Clone)]
pub(crate) struct SyncShared {
    pub transport: Arc<dyn PushTransport>,
    pub cache: Arc<dyn QueryCache>,
    pub health: Arc<HealthMonitor>,
    pub poller: Arc<PollingScheduler>,
    pub throttler: Arc<ThrottledInvalidator>,
    pub subscription: SubscriptionPolicy,
    pub polling: PollingPolicy,
}

/// Lifecycle owner for one watched table.
pub(crate) struct TableSubscription {
    table: String,
    shared: SyncShared,
    inner: Mutex<SubscriptionState>,
}

struct SubscriptionState {
    keys: Vec<CacheKey>,
    throttle: Option<Duration>,
    mode: SubscriptionMode,
    /// Channel errors since the last confirmed subscription.
    attempts: u32,
    /// An empty key set can never work; log it once and stay down.
    config_error_logged: bool,
    driver: Option<DriverHandle>,
}

struct DriverHandle {
    stop: Arc<Notify>,
    task: JoinHandle<()>,
}

/// How a driver run ended, decided with the channel already released.
enum PumpOutcome {
    /// Demoted: the polling scheduler takes over this table.
    StartPolling,
    /// Channel gone without fallback-worthy conditions; a fresh connect is
    /// allowed later.
    Disconnect,
    /// Teardown requested.
    Stopped,
}

impl TableSubscription {
    pub(crate) fn new(watch: &TableWatch, shared: SyncShared) -> Arc<Self> {
        Arc::new(Self {
            table: watch.table.clone(),
            shared,
            inner: Mutex::new(SubscriptionState {
                keys: watch.cache_keys.clone(),
                throttle: watch.throttle_interval,
                mode: SubscriptionMode::Disconnected,
                attempts: 0,
                config_error_logged: false,
                driver: None,
            }),
        })
    }

    pub(crate) fn table(&self) -> &str {
        &self.table
    }

    #[cfg(test)]
    pub(crate) async fn mode(&self) -> SubscriptionMode {
        self.inner.lock().await.mode
    }

    /// Opens the table's push channel.
    ///
    /// Idempotent: a second call while connecting or subscribed is a no-op,
    /// and a table in polling mode stays there until recovery. A watch with
    /// no cache keys is a configuration error: logged once, never retried.
    pub(crate) async fn connect(self: &Arc<Self>) {
        {
            let mut state = self.inner.lock().await;
            match state.mode {
                SubscriptionMode::Connecting
                | SubscriptionMode::Subscribed
                | SubscriptionMode::Polling => return,
                SubscriptionMode::Disconnected => {}
            }

            if state.keys.is_empty() {
                if !state.config_error_logged {
                    state.config_error_logged = true;
                    let error = SyncError::configuration(&self.table, "watch has no cache keys");
                    tracing::warn!(table = %self.table, %error, "skipping unusable subscription");
                }
                return;
            }

            set_mode(&mut state, SubscriptionMode::Connecting, &self.table);
            let stop = Arc::new(Notify::new());
            let task = tokio::spawn(Self::drive(Arc::clone(self), Arc::clone(&stop)));
            state.driver = Some(DriverHandle { stop, task });
        }
    }

    /// Recovery path: stop polling and go back to push delivery.
    ///
    /// This is the only exit from `Polling`.
    pub(crate) async fn resume_push(self: &Arc<Self>) {
        {
            let mut state = self.inner.lock().await;
            if state.mode != SubscriptionMode::Polling {
                return;
            }
            self.shared.poller.stop(&self.table);
            state.attempts = 0;
            set_mode(&mut state, SubscriptionMode::Disconnected, &self.table);
        }
        self.connect().await;
    }

    /// Replaces the key set, tearing down the old channel first.
    ///
    /// A call with an unchanged key set is a no-op.
    pub(crate) async fn reconfigure(self: &Arc<Self>, keys: Vec<CacheKey>) {
        {
            let state = self.inner.lock().await;
            if state.keys == keys {
                return;
            }
        }
        self.teardown().await;
        {
            let mut state = self.inner.lock().await;
            state.keys = keys;
            state.config_error_logged = false;
        }
        self.connect().await;
    }

    /// Releases the channel, the table's polling timer and any pending
    /// throttle window. Complete when it returns.
    pub(crate) async fn teardown(&self) {
        let driver = {
            let mut state = self.inner.lock().await;
            state.driver.take()
        };
        if let Some(driver) = driver {
            driver.stop.notify_one();
            // The driver selects on the stop signal, so this cannot hang.
            let _ = driver.task.await;
        }

        self.shared.poller.stop(&self.table);
        self.shared.throttler.cancel(&self.table);

        let keys = {
            let mut state = self.inner.lock().await;
            if state.mode != SubscriptionMode::Disconnected {
                set_mode(&mut state, SubscriptionMode::Disconnected, &self.table);
            }
            state.keys.clone()
        };
        for key in &keys {
            self.shared.cache.cancel_pending(key).await;
        }
    }

    async fn drive(self: Arc<Self>, stop: Arc<Notify>) {
        self.shared.health.record_connection();

        let channel = match self.shared.transport.open(&self.table).await {
            Ok(channel) => channel,
            Err(error) => {
                // The transport could not even start the handshake.
                self.shared.health.record_error(&error);
                tracing::warn!(table = %self.table, %error, "failed to open push channel");
                let demote = {
                    let mut state = self.inner.lock().await;
                    state.attempts += 1;
                    state.attempts >= self.shared.subscription.max_retries
                        || self.shared.health.should_use_fallback()
                };
                if demote {
                    self.start_polling().await;
                } else {
                    let mut state = self.inner.lock().await;
                    set_mode(&mut state, SubscriptionMode::Disconnected, &self.table);
                }
                return;
            }
        };

        match self.pump(channel, &stop).await {
            PumpOutcome::StartPolling => self.start_polling().await,
            PumpOutcome::Disconnect | PumpOutcome::Stopped => {
                let mut state = self.inner.lock().await;
                if state.mode != SubscriptionMode::Disconnected {
                    set_mode(&mut state, SubscriptionMode::Disconnected, &self.table);
                }
            }
        }
    }

    /// Message loop over one open channel.
    ///
    /// The channel is closed before returning on every path; callers only
    /// apply the resulting mode change.
    async fn pump(&self, mut channel: Box<dyn PushChannel>, stop: &Notify) -> PumpOutcome {
        loop {
            tokio::select! {
                _ = stop.notified() => {
                    channel.close().await;
                    return PumpOutcome::Stopped;
                }
                message = channel.recv() => {
                    let Some(message) = message else {
                        // Stream ended without a close status.
                        channel.close().await;
                        return self.after_unexpected_close();
                    };
                    match message {
                        ChannelMessage::Status(ChannelStatus::Connecting) => {
                            tracing::debug!(table = %self.table, "push channel connecting");
                        }
                        ChannelMessage::Status(ChannelStatus::Subscribed) => {
                            self.on_subscribed().await;
                        }
                        ChannelMessage::Status(ChannelStatus::ChannelError) => {
                            let error = SyncError::channel(&self.table, "transport reported channel error");
                            if self.on_channel_error(error).await {
                                channel.close().await;
                                return PumpOutcome::StartPolling;
                            }
                            // Otherwise the channel stays in place for the
                            // transport's own retry semantics.
                        }
                        ChannelMessage::Status(ChannelStatus::TimedOut) => {
                            let error = SyncError::timeout(&self.table);
                            if self.on_channel_error(error).await {
                                channel.close().await;
                                return PumpOutcome::StartPolling;
                            }
                        }
                        ChannelMessage::Status(ChannelStatus::Closed) => {
                            channel.close().await;
                            return self.after_unexpected_close();
                        }
                        ChannelMessage::Change(event) => {
                            self.on_change(event).await;
                        }
                    }
                }
            }
        }
    }

    async fn on_subscribed(&self) {
        self.shared.health.record_success();
        {
            let mut state = self.inner.lock().await;
            state.attempts = 0;
            if state.mode != SubscriptionMode::Subscribed {
                set_mode(&mut state, SubscriptionMode::Subscribed, &self.table);
            }
        }
        // Push is live again; this table must not double-update.
        self.shared.poller.stop(&self.table);
        tracing::info!(table = %self.table, "push subscription confirmed");
    }

    /// Returns true when the error exhausts the retry budget and the table
    /// must demote to polling.
    async fn on_channel_error(&self, error: SyncError) -> bool {
        self.shared.health.record_error(&error);
        let attempts = {
            let mut state = self.inner.lock().await;
            state.attempts += 1;
            state.attempts
        };
        let demote =
            attempts >= self.shared.subscription.max_retries || self.shared.health.should_use_fallback();
        tracing::warn!(
            table = %self.table,
            %error,
            attempts,
            demote,
            "push channel error"
        );
        demote
    }

    fn after_unexpected_close(&self) -> PumpOutcome {
        if self.shared.health.should_use_fallback() {
            tracing::warn!(table = %self.table, "channel closed under fallback conditions, polling");
            PumpOutcome::StartPolling
        } else {
            tracing::debug!(table = %self.table, "channel closed, awaiting fresh connect");
            PumpOutcome::Disconnect
        }
    }

    async fn on_change(&self, event: ChangeEvent) {
        let (keys, throttle) = {
            let state = self.inner.lock().await;
            (state.keys.clone(), state.throttle)
        };
        tracing::debug!(table = %self.table, kind = ?event.kind, "change notification");
        match throttle {
            Some(window) => self.shared.throttler.notify(&self.table, &keys, window),
            None => {
                for key in &keys {
                    self.shared
                        .cache
                        .invalidate(key, InvalidateOptions::subtree())
                        .await;
                }
            }
        }
    }

    async fn start_polling(&self) {
        let (keys, high_volume) = {
            let mut state = self.inner.lock().await;
            set_mode(&mut state, SubscriptionMode::Polling, &self.table);
            (state.keys.clone(), state.throttle.is_some())
        };
        // Polling only exits through the recovery loop, so the monitor must
        // be in fallback mode even when the global counters look healthy.
        self.shared.health.engage_fallback();
        let interval = self.shared.polling.interval_for(high_volume);
        self.shared.poller.start(&self.table, keys, interval);
    }
}

fn set_mode(state: &mut SubscriptionState, target: SubscriptionMode, table: &str) {
    match state.mode.transition_to(target) {
        Ok(next) => {
            tracing::debug!(table, from = %state.mode, to = %next, "subscription mode change");
            state.mode = next;
        }
        Err(error) => {
            tracing::error!(table, %error, "ignoring invalid subscription mode change");
        }
    }
}
