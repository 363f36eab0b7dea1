//! Crash recovery at client start.
//!
//! The coordinator decides how the replica is populated:
//!
//! ```text
//! Start ──no snapshot──────────────────────────────────────▶ Regenerated
//!   │
//!   ▼
//! SnapshotPresent ──import ok──────────────────────────────▶ ImportOk
//!   │ import failed (snapshot archived as corrupt)
//!   ▼
//! ImportFailed ──no backups────────────────────────────────▶ Regenerated
//!   │
//!   ▼
//! BackupOffered ──accepted, import ok──────────────────────▶ BackupRestored
//!   │ declined, or restored import failed
//!   ▼
//! Regenerated   (any error on this path ─────────────────────▶ Fatal)
//! ```
//!
//! Entering `ImportFailed` or `Fatal` counts a crash and records an issue.

use crate::error::{FatalInitError, SyncError, SyncResult};
use crate::replica::{BulkLoadReport, ReplicaStore};
use async_trait::async_trait;
use cmsync_codec::DecodeReport;
use cmsync_persist::{BackupEntry, LocalPersistence, MetricsUpdate};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// States of the recovery procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    /// Nothing decided yet.
    Start,
    /// A current snapshot exists.
    SnapshotPresent,
    /// The current snapshot was imported.
    ImportOk,
    /// The current snapshot could not be imported.
    ImportFailed,
    /// The newest backup was offered for restore.
    BackupOffered,
    /// A backup was imported.
    BackupRestored,
    /// The replica was rebuilt from the authoritative source.
    Regenerated,
    /// Recovery gave up.
    Fatal,
}

impl RecoveryState {
    /// Returns true if the procedure ends in this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecoveryState::ImportOk
                | RecoveryState::BackupRestored
                | RecoveryState::Regenerated
                | RecoveryState::Fatal
        )
    }

    /// Returns true if the replica came from a local snapshot.
    pub fn is_from_snapshot(&self) -> bool {
        matches!(self, RecoveryState::ImportOk | RecoveryState::BackupRestored)
    }
}

/// Trace of one recovery run.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// States entered, in order.
    pub transitions: Vec<RecoveryState>,
    /// Key the corrupt snapshot was archived under.
    pub archived: Option<String>,
    /// Backup offered for restore.
    pub offered_backup: Option<String>,
    /// What the successful import had to drop.
    pub decode: Option<DecodeReport>,
    /// Outcome of the regeneration load.
    pub load: Option<BulkLoadReport>,
    /// Issue descriptions recorded during the run.
    pub issues: Vec<String>,
}

impl RecoveryReport {
    /// The last state entered.
    pub fn final_state(&self) -> RecoveryState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(RecoveryState::Start)
    }

    fn enter(&mut self, state: RecoveryState) {
        tracing::debug!(?state, "recovery transition");
        self.transitions.push(state);
    }
}

/// Answers the questions recovery has to ask.
///
/// Implementations usually forward to a UI prompt.
#[async_trait]
pub trait RecoveryDecider: Send + Sync {
    /// Whether to restore `backup` after the current snapshot failed to
    /// import.
    async fn offer_backup(&self, backup: &BackupEntry) -> SyncResult<bool>;

    /// Whether to wipe all local state after recovery failed.
    async fn confirm_reset(&self, error: &FatalInitError) -> SyncResult<bool>;
}

/// A decider with fixed answers.
#[derive(Debug, Clone, Copy)]
pub struct FixedDecider {
    /// Answer to backup offers.
    pub accept_backup: bool,
    /// Answer to reset confirmations.
    pub accept_reset: bool,
}

impl FixedDecider {
    /// Accepts everything.
    pub fn accept_all() -> Self {
        Self {
            accept_backup: true,
            accept_reset: true,
        }
    }

    /// Declines everything.
    pub fn decline_all() -> Self {
        Self {
            accept_backup: false,
            accept_reset: false,
        }
    }
}

#[async_trait]
impl RecoveryDecider for FixedDecider {
    async fn offer_backup(&self, _backup: &BackupEntry) -> SyncResult<bool> {
        Ok(self.accept_backup)
    }

    async fn confirm_reset(&self, _error: &FatalInitError) -> SyncResult<bool> {
        Ok(self.accept_reset)
    }
}

/// A question sent by a [`ChannelDecider`].
#[derive(Debug)]
pub enum DecisionRequest {
    /// Restore the named backup?
    RestoreBackup {
        /// Backup key.
        name: String,
        /// Where to send the answer.
        respond: oneshot::Sender<bool>,
    },
    /// Wipe all local state?
    Reset {
        /// Why recovery failed.
        cause: String,
        /// Where to send the answer.
        respond: oneshot::Sender<bool>,
    },
}

impl DecisionRequest {
    /// Answers the request.
    pub fn answer(self, accept: bool) {
        let respond = match self {
            DecisionRequest::RestoreBackup { respond, .. } => respond,
            DecisionRequest::Reset { respond, .. } => respond,
        };
        // The asking side may have stopped waiting.
        let _ = respond.send(accept);
    }
}

/// A decider that forwards each question over a channel.
///
/// If the receiving side is gone, or drops a request unanswered, the
/// decision fails with [`SyncError::Cancelled`].
#[derive(Debug, Clone)]
pub struct ChannelDecider {
    requests: mpsc::Sender<DecisionRequest>,
}

impl ChannelDecider {
    /// Creates a decider and the receiver its questions arrive on.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<DecisionRequest>) {
        let (requests, rx) = mpsc::channel(buffer.max(1));
        (Self { requests }, rx)
    }

    async fn ask(
        &self,
        request: impl FnOnce(oneshot::Sender<bool>) -> DecisionRequest,
    ) -> SyncResult<bool> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(request(tx))
            .await
            .map_err(|_| SyncError::Cancelled)?;
        rx.await.map_err(|_| SyncError::Cancelled)
    }
}

#[async_trait]
impl RecoveryDecider for ChannelDecider {
    async fn offer_backup(&self, backup: &BackupEntry) -> SyncResult<bool> {
        let name = backup.name.clone();
        self.ask(|respond| DecisionRequest::RestoreBackup { name, respond })
            .await
    }

    async fn confirm_reset(&self, error: &FatalInitError) -> SyncResult<bool> {
        let cause = error.cause.clone();
        self.ask(|respond| DecisionRequest::Reset { cause, respond })
            .await
    }
}

/// Runs the recovery procedure.
pub struct RecoveryCoordinator {
    persist: Arc<LocalPersistence>,
    replica: Arc<ReplicaStore>,
    decider: Arc<dyn RecoveryDecider>,
}

impl RecoveryCoordinator {
    /// Creates a coordinator.
    pub fn new(
        persist: Arc<LocalPersistence>,
        replica: Arc<ReplicaStore>,
        decider: Arc<dyn RecoveryDecider>,
    ) -> Self {
        Self {
            persist,
            replica,
            decider,
        }
    }

    /// Populates the replica.
    ///
    /// # Errors
    ///
    /// Returns [`FatalInitError`] if no usable replica could be produced
    /// after the current snapshot failed.
    pub async fn run(&self) -> Result<RecoveryReport, FatalInitError> {
        let mut report = RecoveryReport::default();
        report.enter(RecoveryState::Start);

        let Some(blob) = self.persist.current_snapshot() else {
            tracing::info!("no local snapshot, loading from source");
            let load = self.replica.bulk_load().await;
            self.replica.flush();
            report.load = Some(load);
            report.enter(RecoveryState::Regenerated);
            return Ok(report);
        };

        report.enter(RecoveryState::SnapshotPresent);
        match self.replica.import_snapshot(&blob) {
            Ok(decode) => {
                tracing::info!(total = self.replica.counts().total(), "local snapshot imported");
                report.decode = Some(decode);
                report.enter(RecoveryState::ImportOk);
                Ok(report)
            }
            Err(e) => {
                report.archived = self.persist.archive_corrupt(&blob);
                report.enter(RecoveryState::ImportFailed);
                self.record_crash(&mut report, format!("snapshot import failed: {e}"));
                self.recover_from_failed_import(report).await
            }
        }
    }

    async fn recover_from_failed_import(
        &self,
        mut report: RecoveryReport,
    ) -> Result<RecoveryReport, FatalInitError> {
        if let Some(backup) = self.persist.backups().pop() {
            report.offered_backup = Some(backup.name.clone());
            report.enter(RecoveryState::BackupOffered);

            let accepted = match self.decider.offer_backup(&backup).await {
                Ok(accepted) => accepted,
                Err(e) => {
                    return Err(self.fatal(report, format!("recovery decision unavailable: {e}")))
                }
            };

            if accepted {
                if self.restore(&backup, &mut report) {
                    report.enter(RecoveryState::BackupRestored);
                    return Ok(report);
                }
            } else {
                tracing::info!(name = %backup.name, "backup restore declined");
            }
        } else {
            tracing::info!("no backups to restore from");
        }

        let load = self.replica.bulk_load().await;
        if load.all_failed() {
            report.load = Some(load);
            return Err(self.fatal(report, "every collection failed to load"));
        }
        self.replica.flush();
        report.load = Some(load);
        report.enter(RecoveryState::Regenerated);
        Ok(report)
    }

    fn restore(&self, backup: &BackupEntry, report: &mut RecoveryReport) -> bool {
        let Some(blob) = self.persist.read_backup(&backup.name) else {
            tracing::warn!(name = %backup.name, "backup unreadable");
            return false;
        };
        match self.replica.import_snapshot(&blob) {
            Ok(decode) => {
                self.persist.save_snapshot(&blob);
                tracing::info!(name = %backup.name, "backup restored");
                report.decode = Some(decode);
                true
            }
            Err(e) => {
                tracing::warn!(name = %backup.name, error = %e, "backup import failed");
                report.issues.push(format!("backup {} import failed: {e}", backup.name));
                false
            }
        }
    }

    fn record_crash(&self, report: &mut RecoveryReport, description: String) {
        tracing::error!(issue = %description, "recovery issue");
        self.persist
            .record_metrics(&MetricsUpdate::new().crash().issue(description.clone()));
        report.issues.push(description);
    }

    fn fatal(&self, mut report: RecoveryReport, cause: impl Into<String>) -> FatalInitError {
        let cause = cause.into();
        report.enter(RecoveryState::Fatal);
        self.record_crash(&mut report, format!("recovery failed: {cause}"));
        FatalInitError::new(cause, report)
    }
}

impl std::fmt::Debug for RecoveryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryCoordinator").finish_non_exhaustive()
    }
}
