//! Integration tests for the engine against the reference server.

use async_trait::async_trait;
use cmsync_engine::{
    BootOutcome, BroadcastHub, ChangeStream, ChannelState, ClientContext, CrudApi, EngineConfig,
    FixedDecider, MockApi, RecoveryDecider, RecoveryState, ReplicaStore, SyncError, SyncResult,
};
use cmsync_persist::KeyLayout;
use cmsync_protocol::{ApiResponse, EntityKind, Product, Template};
use cmsync_server::{respond, CmsServer, IdStrategy, ServerConfig};
use cmsync_storage::{InMemoryStore, KeyValueStore};
use cmsync_testkit::{corrupt_blob, sample_value};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// CRUD access to an in-process server.
struct ServerApi {
    server: Arc<CmsServer>,
    response_delay: Duration,
    failing: Mutex<HashSet<EntityKind>>,
}

impl ServerApi {
    fn new(server: Arc<CmsServer>) -> Self {
        Self {
            server,
            response_delay: Duration::ZERO,
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Holds every response back after the server has acted on it.
    fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    fn fail_kind(&self, kind: EntityKind) {
        self.failing.lock().insert(kind);
    }

    async fn deliver<T>(&self, response: ApiResponse<T>) -> SyncResult<ApiResponse<T>> {
        if !self.response_delay.is_zero() {
            tokio::time::sleep(self.response_delay).await;
        }
        Ok(response)
    }
}

#[async_trait]
impl CrudApi for ServerApi {
    async fn list(&self, kind: EntityKind) -> SyncResult<ApiResponse<Vec<Value>>> {
        if self.failing.lock().contains(&kind) {
            return Ok(ApiResponse::error(format!("{kind} listing failed")));
        }
        self.deliver(respond(self.server.list(kind))).await
    }

    async fn create(&self, kind: EntityKind, fields: Value) -> SyncResult<ApiResponse<Value>> {
        let response = respond(self.server.create(kind, fields));
        self.deliver(response).await
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        fields: Value,
    ) -> SyncResult<ApiResponse<Value>> {
        let response = respond(self.server.update(kind, id, fields));
        self.deliver(response).await
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> SyncResult<ApiResponse<Value>> {
        let response = respond(self.server.delete(kind, id));
        self.deliver(response).await
    }
}

/// Change subscriptions on an in-process server.
struct ServerHub {
    server: Arc<CmsServer>,
}

#[async_trait]
impl BroadcastHub for ServerHub {
    async fn subscribe(&self) -> SyncResult<ChangeStream> {
        self.server
            .subscribe()
            .map_err(|e| SyncError::transport_retryable(e.to_string()))
    }
}

fn sequential_server() -> Arc<CmsServer> {
    Arc::new(CmsServer::new(
        ServerConfig::new().with_id_strategy(IdStrategy::Sequential),
    ))
}

fn client(
    api: Arc<ServerApi>,
    server: &Arc<CmsServer>,
    store: Arc<InMemoryStore>,
    decider: impl RecoveryDecider + 'static,
) -> ClientContext {
    ClientContext::new(
        api,
        Arc::new(ServerHub {
            server: server.clone(),
        }),
        store,
        Arc::new(decider),
        EngineConfig::new(),
    )
}

async fn wait_connected(ctx: &ClientContext) {
    let mut rx = ctx.channel().watch_state();
    rx.wait_for(|s| *s == ChannelState::Connected).await.unwrap();
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn own_echo_before_response_yields_one_record() {
    let server = sequential_server();

    let api_a = Arc::new(
        ServerApi::new(server.clone()).with_response_delay(Duration::from_millis(50)),
    );
    let a = client(api_a, &server, Arc::new(InMemoryStore::new()), FixedDecider::decline_all());
    let api_b = Arc::new(ServerApi::new(server.clone()));
    let b = client(api_b, &server, Arc::new(InMemoryStore::new()), FixedDecider::decline_all());

    assert!(a.boot().await.is_usable());
    assert!(b.boot().await.is_usable());
    wait_connected(&a).await;
    wait_connected(&b).await;

    let created: Product = a.replica().create(json!({ "title": "X" })).await.unwrap();
    assert_eq!(created.id, "p-1");

    // The notification was applied while the response was held back.
    assert_eq!(a.channel().stats().messages_received, 1);
    let products = a.replica().list::<Product>();
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].title, "X");

    eventually(|| b.replica().list::<Product>().len() == 1).await;
    assert_eq!(b.replica().get::<Product>("p-1").unwrap().title, "X");
}

#[tokio::test(start_paused = true)]
async fn updates_and_deletes_propagate_between_clients() {
    let server = sequential_server();
    let a = client(
        Arc::new(ServerApi::new(server.clone())),
        &server,
        Arc::new(InMemoryStore::new()),
        FixedDecider::decline_all(),
    );
    let b = client(
        Arc::new(ServerApi::new(server.clone())),
        &server,
        Arc::new(InMemoryStore::new()),
        FixedDecider::decline_all(),
    );
    a.boot().await;
    b.boot().await;
    wait_connected(&a).await;
    wait_connected(&b).await;

    let template: Template = a
        .replica()
        .create(json!({ "name": "Grid" }))
        .await
        .unwrap();
    eventually(|| b.replica().get::<Template>(&template.id).is_some()).await;

    b.replica()
        .update::<Template>(&template.id, json!({ "name": "Rows" }))
        .await
        .unwrap();
    eventually(|| {
        a.replica()
            .get::<Template>(&template.id)
            .is_some_and(|t| t.name == "Rows")
    })
    .await;

    a.replica().delete::<Template>(&template.id).await.unwrap();
    eventually(|| b.replica().list::<Template>().is_empty()).await;
    assert_eq!(server.count(EntityKind::Template), 0);
}

#[tokio::test(start_paused = true)]
async fn failing_collection_does_not_block_others() {
    let server = sequential_server();
    server
        .create(EntityKind::Product, json!({ "title": "Chair" }))
        .unwrap();
    server
        .create(EntityKind::Template, json!({ "name": "Grid" }))
        .unwrap();

    let api = Arc::new(ServerApi::new(server.clone()));
    api.fail_kind(EntityKind::Template);
    let ctx = client(api, &server, Arc::new(InMemoryStore::new()), FixedDecider::decline_all());

    let report = match ctx.boot().await {
        BootOutcome::Ready(report) => report,
        other => panic!("expected ready, got {other:?}"),
    };
    assert_eq!(report.final_state(), RecoveryState::Regenerated);
    let load = report.load.unwrap();
    assert!(load.failed_kind(EntityKind::Template));
    assert!(!load.failed_kind(EntityKind::Product));

    assert_eq!(ctx.replica().list::<Product>().len(), 1);
    assert!(ctx.replica().list::<Template>().is_empty());
}

#[tokio::test(start_paused = true)]
async fn corrupt_snapshot_without_backups_regenerates() {
    let server = sequential_server();
    server
        .create(EntityKind::Product, json!({ "title": "Chair" }))
        .unwrap();

    let store = Arc::new(InMemoryStore::new());
    let keys = KeyLayout::new(EngineConfig::new().persist.namespace.clone());
    store.set(&keys.current_snapshot(), &corrupt_blob()).unwrap();

    let ctx = client(
        Arc::new(ServerApi::new(server.clone())),
        &server,
        store.clone(),
        FixedDecider::accept_all(),
    );
    let report = match ctx.boot().await {
        BootOutcome::Ready(report) => report,
        other => panic!("expected ready, got {other:?}"),
    };

    assert_eq!(
        report.transitions,
        vec![
            RecoveryState::Start,
            RecoveryState::SnapshotPresent,
            RecoveryState::ImportFailed,
            RecoveryState::Regenerated
        ]
    );
    assert!(report.offered_backup.is_none());
    assert_eq!(ctx.replica().list::<Product>().len(), 1);

    let persist = ctx.persistence();
    assert_eq!(persist.metrics().crash_count, 1);
    assert_eq!(persist.corrupt_archives().len(), 1);
    assert!(persist.current_snapshot().is_some_and(|blob| blob != corrupt_blob()));
}

#[tokio::test(start_paused = true)]
async fn corrupt_snapshot_restores_accepted_backup() {
    let server = sequential_server();
    server
        .create(EntityKind::Product, json!({ "title": "Chair" }))
        .unwrap();
    let store = Arc::new(InMemoryStore::new());

    {
        let first = client(
            Arc::new(ServerApi::new(server.clone())),
            &server,
            store.clone(),
            FixedDecider::decline_all(),
        );
        first.boot().await;
        assert!(first.backup_now().is_some());
    }

    let keys = KeyLayout::new(EngineConfig::new().persist.namespace.clone());
    store.set(&keys.current_snapshot(), &corrupt_blob()).unwrap();

    let second = client(
        Arc::new(ServerApi::new(server.clone())),
        &server,
        store.clone(),
        FixedDecider::accept_all(),
    );
    let report = match second.boot().await {
        BootOutcome::Ready(report) => report,
        other => panic!("expected ready, got {other:?}"),
    };
    assert_eq!(report.final_state(), RecoveryState::BackupRestored);
    assert!(report.offered_backup.is_some());
    assert_eq!(second.replica().list::<Product>().len(), 1);
    assert_eq!(second.persistence().metrics().crash_count, 1);
}

#[tokio::test(start_paused = true)]
async fn reconnect_refreshes_missed_changes() {
    let server = sequential_server();
    let ctx = client(
        Arc::new(ServerApi::new(server.clone())),
        &server,
        Arc::new(InMemoryStore::new()),
        FixedDecider::decline_all(),
    );
    ctx.boot().await;
    wait_connected(&ctx).await;

    server.disconnect_all();
    let mut rx = ctx.channel().watch_state();
    rx.wait_for(|s| *s == ChannelState::Reconnecting)
        .await
        .unwrap();

    // Published while no subscription is live.
    server
        .create(EntityKind::Product, json!({ "title": "Missed" }))
        .unwrap();

    wait_connected(&ctx).await;
    eventually(|| ctx.replica().list::<Product>().len() == 1).await;
    assert_eq!(ctx.channel().stats().reconnects, 1);
}

#[tokio::test(start_paused = true)]
async fn unavailable_server_exhausts_channel_but_keeps_replica() {
    let server = sequential_server();
    server
        .create(EntityKind::Product, json!({ "title": "Chair" }))
        .unwrap();
    let ctx = client(
        Arc::new(ServerApi::new(server.clone())),
        &server,
        Arc::new(InMemoryStore::new()),
        FixedDecider::decline_all(),
    );
    ctx.boot().await;
    wait_connected(&ctx).await;

    server.set_available(false);
    server.disconnect_all();
    let mut rx = ctx.channel().watch_state();
    rx.wait_for(|s| *s == ChannelState::Exhausted).await.unwrap();

    assert_eq!(ctx.replica().list::<Product>().len(), 1);
}

mod reconcile_properties {
    use super::*;
    use cmsync_testkit::change_sequence_strategy;
    use proptest::prelude::*;

    fn replica() -> ReplicaStore {
        ReplicaStore::new(Arc::new(MockApi::new()), Duration::from_secs(1))
    }

    proptest! {
        #[test]
        fn duplicate_delivery_is_idempotent(messages in change_sequence_strategy(24)) {
            let once = replica();
            let twice = replica();
            for message in &messages {
                once.reconcile(message).unwrap();
                twice.reconcile(message).unwrap();
                twice.reconcile(message).unwrap();
            }
            prop_assert_eq!(once.collections(), twice.collections());
        }

        #[test]
        fn ids_stay_unique(messages in change_sequence_strategy(32)) {
            let replica = replica();
            for message in &messages {
                replica.reconcile(message).unwrap();
            }
            let mut ids: Vec<String> = replica.list::<Product>().into_iter().map(|p| p.id).collect();
            let total = ids.len();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), total);
        }
    }

    #[test]
    fn malformed_message_leaves_replica_untouched() {
        let replica = replica();
        replica
            .reconcile_value(json!({
                "entityKind": "product",
                "action": "create",
                "payload": sample_value(EntityKind::Product, "p-1"),
            }))
            .unwrap();

        let before = replica.collections();
        assert!(replica
            .reconcile_value(json!({ "entityKind": "widget", "action": "create" }))
            .is_err());
        assert!(replica
            .reconcile_value(json!({
                "entityKind": "product",
                "action": "update",
                "payload": { "id": "p-1" },
            }))
            .is_err());
        assert_eq!(replica.collections(), before);
    }
}
