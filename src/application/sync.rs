//! Top-level realtime sync context.
//!
//! [`RealtimeSync`] wires the table registry, health monitor, throttled
//! invalidator and polling scheduler to the push transport and query cache,
//! owns one [`TableSubscription`] per watched table, and runs the recovery
//! loop that periodically probes push delivery while in fallback mode.
//!
//! # Example
//!
//! ```ignore
//! let config = SyncConfig::load()?;
//! config.validate()?;
//!
//! let sync = RealtimeSync::new(config, TableRegistry::school_portal()?, transport, cache);
//! sync.init().await;
//! // ... application runs ...
//! sync.shutdown().await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::domain::{
    CacheKey, ChannelMessage, ChannelStatus, ConnectionHealth, SyncError, TableRegistry,
};
use crate::ports::{PushTransport, QueryCache};

use super::health::{HealthMonitor, RecoveryRegistration};
use super::polling::PollingScheduler;
use super::subscription::{SyncShared, TableSubscription};
use super::throttle::ThrottledInvalidator;

/// Read-only snapshot of the sync context, for dashboards and logs.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub enabled: bool,
    pub table_count: usize,
    pub is_fallback_mode: bool,
}

/// Owner of the whole realtime synchronization layer.
///
/// One instance exists per portal process. All methods are safe to call
/// concurrently; `init` and `shutdown` are idempotent.
pub struct RealtimeSync {
    config: SyncConfig,
    registry: TableRegistry,
    shared: SyncShared,
    started: AtomicBool,
    subscriptions: Mutex<Vec<Arc<TableSubscription>>>,
    tasks: Mutex<BackgroundTasks>,
}

#[derive(Default)]
struct BackgroundTasks {
    recovery: Option<JoinHandle<()>>,
    resume: Option<JoinHandle<()>>,
    registration: Option<RecoveryRegistration>,
}

impl RealtimeSync {
    /// Wires a sync context; nothing runs until [`init`](Self::init).
    pub fn new(
        config: SyncConfig,
        registry: TableRegistry,
        transport: Arc<dyn PushTransport>,
        cache: Arc<dyn QueryCache>,
    ) -> Arc<Self> {
        let health = HealthMonitor::new(config.health.clone());
        let poller = PollingScheduler::new(Arc::clone(&cache));
        let throttler = ThrottledInvalidator::new(Arc::clone(&cache));
        let shared = SyncShared {
            transport,
            cache,
            health,
            poller,
            throttler,
            subscription: config.subscription.clone(),
            polling: config.polling.clone(),
        };
        Arc::new(Self {
            config,
            registry,
            shared,
            started: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
            tasks: Mutex::new(BackgroundTasks::default()),
        })
    }

    fn subscriptions(&self) -> MutexGuard<'_, Vec<Arc<TableSubscription>>> {
        self.subscriptions
            .lock()
            .expect("RealtimeSync: subscriptions lock poisoned")
    }

    fn tasks(&self) -> MutexGuard<'_, BackgroundTasks> {
        self.tasks.lock().expect("RealtimeSync: tasks lock poisoned")
    }

    /// Connects every watched table and starts the recovery loop.
    ///
    /// A no-op when sync is disabled by configuration or already started.
    pub async fn init(self: &Arc<Self>) {
        if !self.config.enabled {
            tracing::info!("realtime sync disabled by configuration");
            return;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(tables = self.registry.len(), "initializing realtime sync");

        // Resume-all requests are queued from the synchronous recovery
        // callback and served by a dedicated task.
        let (resume_tx, resume_rx) = mpsc::unbounded_channel();
        let registration = self.shared.health.register_recovery_callback(move || {
            let _ = resume_tx.send(());
        });
        let fallback_rx = self.shared.health.fallback_changes();
        {
            let mut tasks = self.tasks();
            tasks.registration = Some(registration);
            tasks.resume = Some(tokio::spawn(Arc::clone(self).resume_loop(resume_rx)));
            tasks.recovery = Some(tokio::spawn(Arc::clone(self).recovery_loop(fallback_rx)));
        }

        let subscriptions: Vec<_> = self
            .registry
            .watches()
            .map(|watch| TableSubscription::new(watch, self.shared.clone()))
            .collect();
        *self.subscriptions() = subscriptions.clone();
        for subscription in &subscriptions {
            subscription.connect().await;
        }
    }

    /// Tears everything down: channels, polling timers, throttle windows
    /// and background tasks. Complete when it returns.
    pub async fn shutdown(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("shutting down realtime sync");

        {
            let mut tasks = self.tasks();
            tasks.registration.take();
            if let Some(task) = tasks.recovery.take() {
                task.abort();
            }
            if let Some(task) = tasks.resume.take() {
                task.abort();
            }
        }

        let subscriptions = std::mem::take(&mut *self.subscriptions());
        let teardowns = subscriptions.iter().map(|s| s.teardown());
        futures::future::join_all(teardowns).await;

        self.shared.throttler.shutdown();
        self.shared.poller.stop_all();
    }

    /// Replaces the cache keys of one watched table.
    ///
    /// The old channel is torn down before the new key set connects.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a table the registry never watched.
    pub async fn reconfigure(&self, table: &str, keys: Vec<CacheKey>) -> Result<(), SyncError> {
        let subscription = self
            .subscriptions()
            .iter()
            .find(|s| s.table() == table)
            .cloned()
            .ok_or_else(|| SyncError::configuration(table, "table is not watched"))?;
        subscription.reconfigure(keys).await;
        Ok(())
    }

    /// Snapshot of the context for dashboards.
    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            enabled: self.config.enabled,
            table_count: self.registry.len(),
            is_fallback_mode: self.shared.health.status().is_in_fallback_mode,
        }
    }

    /// Snapshot of connection health.
    pub fn health(&self) -> ConnectionHealth {
        self.shared.health.status()
    }

    /// Serves queued resume-all requests emitted by successful recoveries.
    async fn resume_loop(self: Arc<Self>, mut requests: mpsc::UnboundedReceiver<()>) {
        while requests.recv().await.is_some() {
            tracing::info!("push delivery recovered, resuming all subscriptions");
            let subscriptions = self.subscriptions().clone();
            for subscription in subscriptions {
                subscription.resume_push().await;
            }
            // No table may keep polling after recovery.
            self.shared.poller.stop_all();
        }
    }

    /// Waits out fallback periods, probing push delivery after each backoff.
    async fn recovery_loop(self: Arc<Self>, mut fallback: watch::Receiver<bool>) {
        loop {
            while !*fallback.borrow_and_update() {
                if fallback.changed().await.is_err() {
                    return;
                }
            }
            while *fallback.borrow() {
                tokio::time::sleep(self.config.health.recovery_backoff()).await;
                if !*fallback.borrow() {
                    break;
                }
                self.shared.health.mark_recovery_attempt();
                self.probe_push().await;
            }
        }
    }

    /// Opens one short-lived probe channel and reports the outcome to the
    /// health monitor. Success there triggers the recovery callbacks.
    async fn probe_push(&self) {
        let Some(watch) = self.registry.watches().next() else {
            return;
        };
        let table = watch.table.as_str();
        tracing::info!(table, "probing push delivery");
        self.shared.health.record_connection();

        let mut channel = match self.shared.transport.open(table).await {
            Ok(channel) => channel,
            Err(error) => {
                tracing::warn!(table, %error, "recovery probe failed to open");
                self.shared.health.record_error(&error);
                return;
            }
        };

        let confirmed = tokio::time::timeout(self.config.subscription.probe_timeout(), async {
            while let Some(message) = channel.recv().await {
                match message {
                    ChannelMessage::Status(ChannelStatus::Subscribed) => return true,
                    ChannelMessage::Status(
                        ChannelStatus::ChannelError | ChannelStatus::TimedOut | ChannelStatus::Closed,
                    ) => return false,
                    _ => {}
                }
            }
            false
        })
        .await
        .unwrap_or(false);
        channel.close().await;

        if confirmed {
            tracing::info!(table, "recovery probe confirmed");
            self.shared.health.record_success();
        } else {
            tracing::warn!(table, "recovery probe did not confirm");
            self.shared.health.record_error(&SyncError::timeout(table));
        }
    }
}
