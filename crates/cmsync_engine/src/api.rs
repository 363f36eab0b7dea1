//! Seams to the authoritative source and the broadcast hub.
//!
//! Both traits abstract the network layer so the engine can run against
//! HTTP, an in-process server, or the mocks in this module.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use cmsync_protocol::{ApiResponse, ChangeMessage, EntityKind};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Stream of change notifications. Ends when the connection is lost.
pub type ChangeStream = mpsc::Receiver<ChangeMessage>;

/// CRUD access to the authoritative source.
///
/// A returned `Err` is a transport failure; a response with
/// `success == false` is a failure reported by the source itself.
#[async_trait]
pub trait CrudApi: Send + Sync {
    /// Lists every record of `kind`.
    async fn list(&self, kind: EntityKind) -> SyncResult<ApiResponse<Vec<Value>>>;

    /// Creates a record. The source assigns the id.
    async fn create(&self, kind: EntityKind, fields: Value) -> SyncResult<ApiResponse<Value>>;

    /// Updates the record `id` with `fields`.
    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        fields: Value,
    ) -> SyncResult<ApiResponse<Value>>;

    /// Deletes the record `id`.
    async fn delete(&self, kind: EntityKind, id: &str) -> SyncResult<ApiResponse<Value>>;
}

/// Push channel for change notifications.
///
/// Delivery is at-least-once and includes the subscriber's own changes.
#[async_trait]
pub trait BroadcastHub: Send + Sync {
    /// Opens a new subscription.
    async fn subscribe(&self) -> SyncResult<ChangeStream>;
}

/// Id prefix the mock source uses for a kind.
fn id_prefix(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Product => "p",
        EntityKind::Template => "t",
        EntityKind::TextAsset => "ta",
        EntityKind::VisualAsset => "va",
        EntityKind::Chart => "c",
    }
}

/// An in-memory authoritative source for unit tests.
///
/// Does not validate input beyond what the test configures.
#[derive(Debug, Default)]
pub struct MockApi {
    records: Mutex<BTreeMap<EntityKind, Vec<Value>>>,
    failing: Mutex<HashSet<EntityKind>>,
    offline: AtomicBool,
    rejecting: AtomicBool,
    next_id: AtomicU64,
    calls: AtomicU64,
}

impl MockApi {
    /// Creates an empty mock source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the records of `kind`.
    pub fn with_records(self, kind: EntityKind, records: Vec<Value>) -> Self {
        self.records.lock().insert(kind, records);
        self
    }

    /// Makes `list(kind)` fail with a server error.
    pub fn set_failing(&self, kind: EntityKind, failing: bool) {
        let mut set = self.failing.lock();
        if failing {
            set.insert(kind);
        } else {
            set.remove(&kind);
        }
    }

    /// Makes every call fail at the transport level.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes every write return a 422 rejection.
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    /// Number of calls received.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Current records of `kind`.
    pub fn records(&self, kind: EntityKind) -> Vec<Value> {
        self.records.lock().get(&kind).cloned().unwrap_or_default()
    }

    fn enter(&self) -> SyncResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::transport_retryable("mock source offline"));
        }
        Ok(())
    }

    fn rejecting(&self) -> bool {
        self.rejecting.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CrudApi for MockApi {
    async fn list(&self, kind: EntityKind) -> SyncResult<ApiResponse<Vec<Value>>> {
        self.enter()?;
        if self.failing.lock().contains(&kind) {
            return Ok(ApiResponse::error(format!("{kind} listing failed")));
        }
        Ok(ApiResponse::ok(self.records(kind)))
    }

    async fn create(&self, kind: EntityKind, fields: Value) -> SyncResult<ApiResponse<Value>> {
        self.enter()?;
        if self.rejecting() {
            return Ok(ApiResponse::rejected("input rejected"));
        }
        let Value::Object(mut map) = fields else {
            return Ok(ApiResponse::rejected("fields must be an object"));
        };

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        map.insert("id".into(), json!(format!("{}-{}", id_prefix(kind), n)));
        let record = Value::Object(map);
        self.records
            .lock()
            .entry(kind)
            .or_default()
            .push(record.clone());
        Ok(ApiResponse::ok(record))
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        fields: Value,
    ) -> SyncResult<ApiResponse<Value>> {
        self.enter()?;
        if self.rejecting() {
            return Ok(ApiResponse::rejected("input rejected"));
        }
        let mut records = self.records.lock();
        let Some(existing) = records
            .entry(kind)
            .or_default()
            .iter_mut()
            .find(|r| r["id"] == id)
        else {
            return Ok(ApiResponse::not_found(format!("{kind} {id} not found")));
        };

        if let (Value::Object(target), Value::Object(patch)) = (&mut *existing, fields) {
            for (key, value) in patch {
                if key != "id" {
                    target.insert(key, value);
                }
            }
        }
        Ok(ApiResponse::ok(existing.clone()))
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> SyncResult<ApiResponse<Value>> {
        self.enter()?;
        if self.rejecting() {
            return Ok(ApiResponse::rejected("delete rejected"));
        }
        self.records
            .lock()
            .entry(kind)
            .or_default()
            .retain(|r| r["id"] != id);
        Ok(ApiResponse::ok(json!({ "id": id })))
    }
}

/// An in-memory broadcast hub for unit tests.
///
/// Each subscription gets its own channel; [`MockHub::disconnect`] drops
/// every live sender so the streams end.
#[derive(Debug, Default)]
pub struct MockHub {
    senders: Mutex<Vec<mpsc::Sender<ChangeMessage>>>,
    available: AtomicBool,
    subscriptions: AtomicU64,
}

impl MockHub {
    /// Creates a hub that accepts subscriptions.
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Makes `subscribe` fail while `false`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successful subscriptions so far.
    pub fn subscriptions(&self) -> u64 {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Delivers `message` to every live subscriber. Returns how many
    /// received it.
    pub async fn publish(&self, message: ChangeMessage) -> usize {
        let senders: Vec<_> = self.senders.lock().clone();
        let mut delivered = 0;
        for sender in senders {
            if sender.send(message.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Ends every live subscription.
    pub fn disconnect(&self) {
        self.senders.lock().clear();
    }
}

#[async_trait]
impl BroadcastHub for MockHub {
    async fn subscribe(&self) -> SyncResult<ChangeStream> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }
        let (tx, rx) = mpsc::channel(64);
        self.senders.lock().push(tx);
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_assigns_ids() {
        let api = MockApi::new();
        let first = api
            .create(EntityKind::Product, json!({ "title": "X" }))
            .await
            .unwrap();
        assert_eq!(first.data.unwrap()["id"], "p-1");

        let second = api
            .create(EntityKind::Chart, json!({ "name": "c", "chart_type": "bar" }))
            .await
            .unwrap();
        assert_eq!(second.data.unwrap()["id"], "c-2");
    }

    #[tokio::test]
    async fn mock_failure_modes() {
        let api = MockApi::new();
        api.set_failing(EntityKind::Template, true);
        assert!(!api.list(EntityKind::Template).await.unwrap().success);
        assert!(api.list(EntityKind::Product).await.unwrap().success);

        api.set_rejecting(true);
        let response = api
            .create(EntityKind::Product, json!({ "title": "X" }))
            .await
            .unwrap();
        assert!(response.is_rejection());

        api.set_offline(true);
        assert!(api.list(EntityKind::Product).await.is_err());
    }

    #[tokio::test]
    async fn mock_update_merges_fields() {
        let api = MockApi::new()
            .with_records(EntityKind::Product, vec![json!({ "id": "p-9", "title": "Old" })]);
        let updated = api
            .update(EntityKind::Product, "p-9", json!({ "title": "New", "id": "hijack" }))
            .await
            .unwrap()
            .data
            .unwrap();
        assert_eq!(updated, json!({ "id": "p-9", "title": "New" }));

        let missing = api
            .update(EntityKind::Product, "p-404", json!({}))
            .await
            .unwrap();
        assert_eq!(missing.status, Some(404));
    }

    #[tokio::test]
    async fn hub_disconnect_ends_streams() {
        let hub = MockHub::new();
        let mut stream = hub.subscribe().await.unwrap();
        assert_eq!(
            hub.publish(ChangeMessage::deleted(EntityKind::Product, "p-1"))
                .await,
            1
        );
        assert!(stream.recv().await.is_some());

        hub.disconnect();
        assert!(stream.recv().await.is_none());

        hub.set_available(false);
        assert!(matches!(hub.subscribe().await, Err(SyncError::NotConnected)));
    }
}
