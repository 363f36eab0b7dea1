//! Client context: wires persistence, replica, realtime channel and
//! recovery together and owns the background tasks.

use crate::api::{BroadcastHub, CrudApi};
use crate::config::EngineConfig;
use crate::error::FatalInitError;
use crate::realtime::RealtimeChannel;
use crate::recovery::{RecoveryCoordinator, RecoveryDecider, RecoveryReport};
use crate::replica::{BulkLoadReport, ReplicaStore};
use cmsync_persist::{AppConfig, BackupEntry, LocalPersistence, MetricsUpdate};
use cmsync_storage::KeyValueStore;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// How a boot ended.
#[derive(Debug, Clone)]
pub enum BootOutcome {
    /// Recovery produced a replica.
    Ready(RecoveryReport),
    /// Recovery failed, the user confirmed a reset, and the replica was
    /// rebuilt from scratch.
    Reset {
        /// Why recovery failed.
        cause: FatalInitError,
        /// Outcome of the fresh load.
        load: BulkLoadReport,
    },
    /// Recovery failed and no reset was confirmed.
    Degraded(FatalInitError),
}

impl BootOutcome {
    /// Returns true unless the context is degraded.
    pub fn is_usable(&self) -> bool {
        !matches!(self, BootOutcome::Degraded(_))
    }
}

/// A running client.
///
/// Background tasks are started at most once per context and are
/// aborted when the context is dropped.
pub struct ClientContext {
    config: EngineConfig,
    persist: Arc<LocalPersistence>,
    replica: Arc<ReplicaStore>,
    channel: RealtimeChannel,
    decider: Arc<dyn RecoveryDecider>,
    app_config: RwLock<Option<AppConfig>>,
    degraded: RwLock<Option<FatalInitError>>,
    backup_timer_started: AtomicBool,
    backup_task: Mutex<Option<JoinHandle<()>>>,
}

impl ClientContext {
    /// Creates a context over a local store.
    pub fn new(
        api: Arc<dyn CrudApi>,
        hub: Arc<dyn BroadcastHub>,
        store: Arc<dyn KeyValueStore>,
        decider: Arc<dyn RecoveryDecider>,
        config: EngineConfig,
    ) -> Self {
        let persist = Arc::new(LocalPersistence::new(store, config.persist.clone()));
        Self::with_persistence(api, hub, persist, decider, config)
    }

    /// Creates a context over an existing persistence manager.
    pub fn with_persistence(
        api: Arc<dyn CrudApi>,
        hub: Arc<dyn BroadcastHub>,
        persist: Arc<LocalPersistence>,
        decider: Arc<dyn RecoveryDecider>,
        config: EngineConfig,
    ) -> Self {
        let replica = Arc::new(
            ReplicaStore::new(api, config.request_timeout)
                .with_sink(persist.clone())
                .with_issue_sink(persist.clone()),
        );
        let channel = RealtimeChannel::new(hub, replica.clone(), config.channel.clone());
        Self {
            config,
            persist,
            replica,
            channel,
            decider,
            app_config: RwLock::new(None),
            degraded: RwLock::new(None),
            backup_timer_started: AtomicBool::new(false),
            backup_task: Mutex::new(None),
        }
    }

    /// Brings the client up.
    ///
    /// Purges legacy keys, loads the config record, runs recovery, then
    /// starts the realtime channel and the backup timer. Never panics on a
    /// recovery failure: the outcome says whether the context is usable.
    pub async fn boot(&self) -> BootOutcome {
        let started = Instant::now();

        self.persist.purge_legacy();
        let app = self.persist.load_config();
        *self.app_config.write() = Some(app.clone());

        let coordinator = RecoveryCoordinator::new(
            self.persist.clone(),
            self.replica.clone(),
            self.decider.clone(),
        );
        let outcome = match coordinator.run().await {
            Ok(report) => {
                if report.final_state().is_from_snapshot() {
                    self.replica.refresh().await;
                    self.replica.flush();
                }
                BootOutcome::Ready(report)
            }
            Err(fatal) => self.handle_fatal(fatal).await,
        };

        if outcome.is_usable() {
            *self.degraded.write() = None;
            if app.realtime_enabled && self.config.channel.enabled {
                self.channel.initialize();
            }
            self.start_backup_timer(self.config.effective_backup_interval(&app));
        }

        let latency = started.elapsed();
        self.persist.record_metrics(
            &MetricsUpdate::new()
                .session()
                .startup_latency(latency),
        );
        tracing::info!(
            latency_ms = latency.as_millis() as u64,
            usable = outcome.is_usable(),
            total = self.replica.counts().total(),
            "client booted"
        );
        outcome
    }

    async fn handle_fatal(&self, fatal: FatalInitError) -> BootOutcome {
        tracing::error!(cause = %fatal.cause, "recovery failed");
        let confirmed = match self.decider.confirm_reset(&fatal).await {
            Ok(confirmed) => confirmed,
            Err(e) => {
                tracing::warn!(error = %e, "reset confirmation unavailable");
                false
            }
        };

        if !confirmed {
            *self.degraded.write() = Some(fatal.clone());
            return BootOutcome::Degraded(fatal);
        }

        tracing::warn!("resetting local state");
        self.persist.wipe_all();
        self.persist.purge_legacy();
        let app = self.persist.load_config();
        *self.app_config.write() = Some(app);

        self.replica.clear();
        let load = self.replica.bulk_load().await;
        self.replica.flush();
        BootOutcome::Reset { cause: fatal, load }
    }

    /// Starts the periodic backup task.
    ///
    /// Returns false if it was already started.
    pub fn start_backup_timer(&self, interval: Duration) -> bool {
        if self.backup_timer_started.swap(true, Ordering::SeqCst) {
            return false;
        }

        let interval = interval.max(Duration::from_millis(1));
        let replica = self.replica.clone();
        let persist = self.persist.clone();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                backup(&replica, &persist);
            }
        });
        *self.backup_task.lock() = Some(handle);
        tracing::debug!(interval_secs = interval.as_secs(), "backup timer started");
        true
    }

    /// Exports the replica into the current slot and the backup ring.
    pub fn backup_now(&self) -> Option<BackupEntry> {
        backup(&self.replica, &self.persist)
    }

    /// The replica.
    pub fn replica(&self) -> &Arc<ReplicaStore> {
        &self.replica
    }

    /// The persistence manager.
    pub fn persistence(&self) -> &Arc<LocalPersistence> {
        &self.persist
    }

    /// The realtime channel.
    pub fn channel(&self) -> &RealtimeChannel {
        &self.channel
    }

    /// The config record loaded at boot.
    pub fn app_config(&self) -> Option<AppConfig> {
        self.app_config.read().clone()
    }

    /// The error that left the context degraded, if any.
    pub fn degraded_error(&self) -> Option<FatalInitError> {
        self.degraded.read().clone()
    }

    /// Returns true if the last boot left the context degraded.
    pub fn is_degraded(&self) -> bool {
        self.degraded.read().is_some()
    }
}

impl Drop for ClientContext {
    fn drop(&mut self) {
        if let Some(handle) = self.backup_task.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientContext")
            .field("replica", &self.replica)
            .field("channel", &self.channel)
            .field("degraded", &self.is_degraded())
            .finish()
    }
}

fn backup(replica: &ReplicaStore, persist: &LocalPersistence) -> Option<BackupEntry> {
    match replica.export_snapshot() {
        Ok(blob) => {
            persist.save_snapshot(&blob);
            persist.create_backup(&blob)
        }
        Err(e) => {
            persist.report_issue("periodic backup", &e);
            None
        }
    }
}
