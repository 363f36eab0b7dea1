//! The client-side replica of the server-owned collections.
//!
//! All five entity kinds go through the same generic code, parameterized by
//! the [`Record`] trait. The collections are guarded by a single
//! `parking_lot::RwLock`. The lock is never held across an `.await`: every
//! network call completes first, then the result is applied under a short
//! write lock. Between an in-flight mutation and a concurrent reconcile for
//! the same id, whichever applies last wins.
//!
//! Mutations only ever insert records returned by the authoritative source.
//! A failed call leaves the collections untouched.

use crate::api::CrudApi;
use crate::error::{SyncError, SyncResult};
use cmsync_codec::{decode, encode, DecodeReport, Snapshot};
use cmsync_persist::LocalPersistence;
use cmsync_protocol::{
    ApiResponse, ChangeAction, ChangeMessage, Chart, CollectionCounts, Collections, EntityKind,
    Product, Record, Template, TextAsset, VisualAsset,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Receives a snapshot after every change to the replica.
pub trait SnapshotSink: Send + Sync {
    /// Stores `blob` as the current snapshot.
    fn store_snapshot(&self, blob: &str);
}

impl SnapshotSink for LocalPersistence {
    fn store_snapshot(&self, blob: &str) {
        self.save_snapshot(blob);
    }
}

/// Receives errors that were handled and logged locally.
pub trait IssueSink: Send + Sync {
    /// Records an issue. The caller has already logged it.
    fn record_issue(&self, context: &str, error: &dyn fmt::Display);
}

impl IssueSink for LocalPersistence {
    fn record_issue(&self, context: &str, error: &dyn fmt::Display) {
        LocalPersistence::record_issue(self, context, error);
    }
}

/// A collection that could not be loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct KindFailure {
    /// The collection.
    pub kind: EntityKind,
    /// Why it failed.
    pub error: String,
}

/// Outcome of [`ReplicaStore::bulk_load`] or [`ReplicaStore::refresh`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkLoadReport {
    /// Entry counts after the load.
    pub counts: CollectionCounts,
    /// Collections whose fetch failed.
    pub failed: Vec<KindFailure>,
    /// Records the source returned that failed structural validation.
    pub dropped: usize,
}

impl BulkLoadReport {
    /// Returns true if every collection loaded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Returns true if no collection loaded.
    pub fn all_failed(&self) -> bool {
        self.failed.len() == EntityKind::ALL.len()
    }

    /// Returns true if `kind` failed to load.
    pub fn failed_kind(&self, kind: EntityKind) -> bool {
        self.failed.iter().any(|f| f.kind == kind)
    }
}

/// The in-memory replica.
pub struct ReplicaStore {
    api: Arc<dyn CrudApi>,
    collections: RwLock<Collections>,
    sink: Option<Arc<dyn SnapshotSink>>,
    issues: Option<Arc<dyn IssueSink>>,
    request_timeout: Duration,
}

impl ReplicaStore {
    /// Creates an empty replica backed by `api`.
    pub fn new(api: Arc<dyn CrudApi>, request_timeout: Duration) -> Self {
        Self {
            api,
            collections: RwLock::new(Collections::new()),
            sink: None,
            issues: None,
            request_timeout,
        }
    }

    /// Sets where snapshots are written after each change.
    pub fn with_sink(mut self, sink: Arc<dyn SnapshotSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sets where handled errors are recorded.
    pub fn with_issue_sink(mut self, issues: Arc<dyn IssueSink>) -> Self {
        self.issues = Some(issues);
        self
    }

    /// Passes an already logged error to the issue sink, if any.
    pub fn record_issue(&self, context: &str, error: &dyn fmt::Display) {
        if let Some(issues) = &self.issues {
            issues.record_issue(context, error);
        }
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Replaces every collection with the source's current contents.
    ///
    /// The five fetches run concurrently. A collection whose fetch fails
    /// becomes empty; the others are unaffected.
    pub async fn bulk_load(&self) -> BulkLoadReport {
        self.load(false).await
    }

    /// Like [`ReplicaStore::bulk_load`], but a collection whose fetch fails
    /// keeps its current contents.
    pub async fn refresh(&self) -> BulkLoadReport {
        self.load(true).await
    }

    async fn load(&self, keep_on_failure: bool) -> BulkLoadReport {
        let (products, templates, text_assets, visual_assets, charts) = tokio::join!(
            self.fetch::<Product>(),
            self.fetch::<Template>(),
            self.fetch::<TextAsset>(),
            self.fetch::<VisualAsset>(),
            self.fetch::<Chart>(),
        );

        let mut report = BulkLoadReport::default();
        {
            let mut collections = self.collections.write();
            install(&mut collections, products, keep_on_failure, &mut report);
            install(&mut collections, templates, keep_on_failure, &mut report);
            install(&mut collections, text_assets, keep_on_failure, &mut report);
            install(&mut collections, visual_assets, keep_on_failure, &mut report);
            install(&mut collections, charts, keep_on_failure, &mut report);
            report.counts = collections.counts();
        }

        for failure in &report.failed {
            self.record_issue(&format!("load {}", failure.kind), &failure.error);
        }

        if report.is_complete() {
            tracing::info!(total = report.counts.total(), "collections loaded");
        } else {
            tracing::warn!(
                failed = report.failed.len(),
                total = report.counts.total(),
                "collections loaded with failures"
            );
        }
        report
    }

    async fn fetch<R: Record>(&self) -> SyncResult<(Vec<R>, usize)> {
        let response = self.call(self.api.list(R::KIND)).await?;
        let values = accept(response)?.unwrap_or_default();

        let mut scratch = Collections::new();
        let mut dropped = 0;
        for value in values {
            match R::from_value(value) {
                Ok(record) => {
                    scratch.upsert(record);
                }
                Err(e) => {
                    tracing::warn!(kind = %R::KIND, error = %e, "dropping invalid record from source");
                    dropped += 1;
                }
            }
        }
        Ok((std::mem::take(R::collection_mut(&mut scratch)), dropped))
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Creates a record at the source and adds the source's version.
    ///
    /// The record is upserted by id, since the change notification for it
    /// may already have been applied.
    pub async fn create<R: Record>(&self, input: Value) -> SyncResult<R> {
        let response = self.call(self.api.create(R::KIND, input)).await?;
        let record = R::from_value(require(accept(response)?)?)?;

        self.collections.write().upsert(record.clone());
        tracing::debug!(kind = %R::KIND, id = record.id(), "record created");
        self.flush();
        Ok(record)
    }

    /// Updates a record at the source and replaces the local entry.
    ///
    /// If no local entry has the id, the collection is left as it is.
    pub async fn update<R: Record>(&self, id: &str, patch: Value) -> SyncResult<R> {
        let response = self.call(self.api.update(R::KIND, id, patch)).await?;
        let record = R::from_value(require(accept(response)?)?)?;

        let replaced = self.collections.write().replace(record.clone());
        if !replaced {
            tracing::debug!(kind = %R::KIND, id, "updated record not in replica");
        }
        self.flush();
        Ok(record)
    }

    /// Deletes a record at the source and removes the local entry.
    pub async fn delete<R: Record>(&self, id: &str) -> SyncResult<()> {
        let response = self.call(self.api.delete(R::KIND, id)).await?;
        accept(response)?;

        self.collections.write().remove::<R>(id);
        tracing::debug!(kind = %R::KIND, id, "record deleted");
        self.flush();
        Ok(())
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Applies a change notification.
    ///
    /// Idempotent per id: a repeated create or update overwrites in place,
    /// an update for an unknown id inserts it, a delete for an unknown id
    /// does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Validation`] if the payload cannot be
    /// interpreted; the replica is left untouched.
    pub fn reconcile(&self, message: &ChangeMessage) -> SyncResult<()> {
        match message.entity_kind {
            EntityKind::Product => self.apply::<Product>(message),
            EntityKind::Template => self.apply::<Template>(message),
            EntityKind::TextAsset => self.apply::<TextAsset>(message),
            EntityKind::VisualAsset => self.apply::<VisualAsset>(message),
            EntityKind::Chart => self.apply::<Chart>(message),
        }?;
        self.flush();
        Ok(())
    }

    /// Parses a raw wire message and applies it.
    pub fn reconcile_value(&self, raw: Value) -> SyncResult<()> {
        let kind = raw
            .get("entityKind")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::Validation("message has no entityKind".into()))?;
        EntityKind::from_str(kind)?;

        let message: ChangeMessage = serde_json::from_value(raw)
            .map_err(|e| SyncError::Validation(format!("malformed change message: {e}")))?;
        self.reconcile(&message)
    }

    fn apply<R: Record>(&self, message: &ChangeMessage) -> SyncResult<()> {
        match message.action {
            ChangeAction::Create | ChangeAction::Update => {
                let record = R::from_value(message.payload.clone())?;
                let id = record.id().to_string();
                let inserted = self.collections.write().upsert(record);
                tracing::debug!(kind = %R::KIND, id = %id, inserted, action = ?message.action, "reconciled");
            }
            ChangeAction::Delete | ChangeAction::BatchDelete => {
                let ids = message.target_ids()?;
                let mut collections = self.collections.write();
                let removed = ids.iter().filter(|id| collections.remove::<R>(id)).count();
                drop(collections);
                tracing::debug!(kind = %R::KIND, requested = ids.len(), removed, "reconciled delete");
            }
        }
        Ok(())
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Serializes the replica.
    pub fn export_snapshot(&self) -> SyncResult<String> {
        let collections = self.collections.read().clone();
        Ok(encode(&Snapshot::new(collections))?)
    }

    /// Replaces the replica with the contents of a snapshot blob.
    ///
    /// Records failing structural validation are dropped and reported.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Serialization`] if the blob is not a usable
    /// snapshot; the replica is left untouched.
    pub fn import_snapshot(&self, blob: &str) -> SyncResult<DecodeReport> {
        let decoded = decode(blob)?;
        *self.collections.write() = decoded.snapshot.collections;
        Ok(decoded.report)
    }

    /// Writes the current state to the snapshot sink, if any.
    pub fn flush(&self) {
        let Some(sink) = &self.sink else {
            return;
        };
        match self.export_snapshot() {
            Ok(blob) => sink.store_snapshot(&blob),
            Err(e) => tracing::warn!(error = %e, "snapshot export failed"),
        }
    }

    /// Empties every collection.
    pub fn clear(&self) {
        *self.collections.write() = Collections::new();
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// All records of a kind, in replica order.
    pub fn list<R: Record>(&self) -> Vec<R> {
        R::collection(&self.collections.read()).clone()
    }

    /// One record by id.
    pub fn get<R: Record>(&self, id: &str) -> Option<R> {
        self.collections.read().find::<R>(id).cloned()
    }

    /// Entry counts per collection.
    pub fn counts(&self) -> CollectionCounts {
        self.collections.read().counts()
    }

    /// A copy of every collection.
    pub fn collections(&self) -> Collections {
        self.collections.read().clone()
    }

    async fn call<T, F>(&self, request: F) -> SyncResult<T>
    where
        F: Future<Output = SyncResult<T>>,
    {
        tokio::time::timeout(self.request_timeout, request)
            .await
            .map_err(|_| SyncError::Timeout)?
    }
}

impl fmt::Debug for ReplicaStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicaStore")
            .field("counts", &self.counts())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Turns a failed response into an error.
///
/// 4xx responses are rejections of the input; anything else is a
/// transport-class failure.
fn accept<T>(response: ApiResponse<T>) -> SyncResult<Option<T>> {
    if response.success {
        return Ok(response.data);
    }
    let rejected = response.is_rejection();
    let message = response
        .error
        .unwrap_or_else(|| "request failed without a message".into());
    if rejected {
        Err(SyncError::Validation(message))
    } else {
        Err(SyncError::transport_retryable(message))
    }
}

fn require<T>(data: Option<T>) -> SyncResult<T> {
    data.ok_or_else(|| SyncError::transport_fatal("response has no payload"))
}

fn install<R: Record>(
    collections: &mut Collections,
    fetched: SyncResult<(Vec<R>, usize)>,
    keep_on_failure: bool,
    report: &mut BulkLoadReport,
) {
    match fetched {
        Ok((records, dropped)) => {
            *R::collection_mut(collections) = records;
            report.dropped += dropped;
        }
        Err(e) => {
            tracing::warn!(kind = %R::KIND, error = %e, "collection failed to load");
            if !keep_on_failure {
                collections.clear_kind(R::KIND);
            }
            report.failed.push(KindFailure {
                kind: R::KIND,
                error: e.to_string(),
            });
        }
    }
}
