//! The reference authoritative source.

use crate::config::{IdStrategy, ServerConfig};
use crate::error::{ServerError, ServerResult};
use crate::hub::ChangeHub;
use chrono::Utc;
use cmsync_protocol::{
    ChangeMessage, Chart, EntityKind, Product, Record, Template, TextAsset, VisualAsset,
};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Fields only the server may set.
const SERVER_FIELDS: [&str; 3] = ["id", "created_at", "updated_at"];

/// In-process authoritative CRUD source with a change broadcast.
///
/// Every successful mutation is published to the hub *before* the call
/// returns, so a subscribed client can observe the change notification
/// ahead of its own CRUD response.
pub struct CmsServer {
    config: ServerConfig,
    collections: RwLock<BTreeMap<EntityKind, Vec<Value>>>,
    hub: ChangeHub,
    available: AtomicBool,
    next_seq: AtomicU64,
}

impl CmsServer {
    /// Creates an empty server.
    pub fn new(config: ServerConfig) -> Self {
        let hub = ChangeHub::new(config.broadcast_capacity, config.stream_buffer);
        Self {
            config,
            collections: RwLock::new(BTreeMap::new()),
            hub,
            available: AtomicBool::new(true),
            next_seq: AtomicU64::new(1),
        }
    }

    /// The server's configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The change hub.
    pub fn hub(&self) -> &ChangeHub {
        &self.hub
    }

    // =========================================================================
    // CRUD
    // =========================================================================

    /// Returns every record of `kind`.
    pub fn list(&self, kind: EntityKind) -> ServerResult<Vec<Value>> {
        self.ensure_available()?;
        Ok(self
            .collections
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_default())
    }

    /// Returns one record.
    pub fn get(&self, kind: EntityKind, id: &str) -> ServerResult<Value> {
        self.ensure_available()?;
        self.collections
            .read()
            .get(&kind)
            .and_then(|records| records.iter().find(|r| record_id(r) == Some(id)).cloned())
            .ok_or_else(|| not_found(kind, id))
    }

    /// Creates a record from client-supplied fields.
    ///
    /// Any client-supplied id or timestamps are replaced.
    pub fn create(&self, kind: EntityKind, fields: Value) -> ServerResult<Value> {
        self.ensure_available()?;
        let mut map = into_object(fields)?;
        for field in SERVER_FIELDS {
            map.remove(field);
        }

        let now = json!(Utc::now());
        map.insert("id".into(), Value::String(self.assign_id(kind)));
        map.insert("created_at".into(), now.clone());
        map.insert("updated_at".into(), now);
        let record = Value::Object(map);
        validate(kind, &record)?;

        self.collections
            .write()
            .entry(kind)
            .or_default()
            .push(record.clone());
        tracing::debug!(%kind, id = record_id(&record).unwrap_or_default(), "record created");

        self.hub.publish(ChangeMessage::created(kind, record.clone()));
        Ok(record)
    }

    /// Merges `patch` into an existing record.
    pub fn update(&self, kind: EntityKind, id: &str, patch: Value) -> ServerResult<Value> {
        self.ensure_available()?;
        let patch = into_object(patch)?;

        let record = {
            let mut collections = self.collections.write();
            let slot = collections
                .get_mut(&kind)
                .and_then(|records| records.iter_mut().find(|r| record_id(r) == Some(id)))
                .ok_or_else(|| not_found(kind, id))?;

            let mut merged = slot.clone();
            if let Value::Object(map) = &mut merged {
                for (key, value) in patch {
                    if !SERVER_FIELDS.contains(&key.as_str()) {
                        map.insert(key, value);
                    }
                }
                map.insert("updated_at".into(), json!(Utc::now()));
            }
            validate(kind, &merged)?;
            *slot = merged.clone();
            merged
        };
        tracing::debug!(%kind, id, "record updated");

        self.hub.publish(ChangeMessage::updated(kind, record.clone()));
        Ok(record)
    }

    /// Deletes a record. Returns the deleted record.
    pub fn delete(&self, kind: EntityKind, id: &str) -> ServerResult<Value> {
        self.ensure_available()?;
        let removed = {
            let mut collections = self.collections.write();
            let records = collections
                .get_mut(&kind)
                .ok_or_else(|| not_found(kind, id))?;
            let index = records
                .iter()
                .position(|r| record_id(r) == Some(id))
                .ok_or_else(|| not_found(kind, id))?;
            records.remove(index)
        };
        tracing::debug!(%kind, id, "record deleted");

        self.hub.publish(ChangeMessage::deleted(kind, id));
        Ok(removed)
    }

    /// Deletes every listed record that exists. Returns the ids removed.
    ///
    /// Publishes a single batch delete message, and none if nothing
    /// matched.
    pub fn batch_delete(&self, kind: EntityKind, ids: &[String]) -> ServerResult<Vec<String>> {
        self.ensure_available()?;
        let removed: Vec<String> = {
            let mut collections = self.collections.write();
            let Some(records) = collections.get_mut(&kind) else {
                return Ok(Vec::new());
            };
            let mut removed = Vec::new();
            records.retain(|r| match record_id(r) {
                Some(id) if ids.iter().any(|wanted| wanted == id) => {
                    removed.push(id.to_string());
                    false
                }
                _ => true,
            });
            removed
        };

        if !removed.is_empty() {
            tracing::debug!(%kind, count = removed.len(), "records batch deleted");
            self.hub
                .publish(ChangeMessage::batch_deleted(kind, removed.clone()));
        }
        Ok(removed)
    }

    /// Number of records of `kind`.
    pub fn count(&self, kind: EntityKind) -> usize {
        self.collections.read().get(&kind).map_or(0, Vec::len)
    }

    // =========================================================================
    // Availability and subscriptions
    // =========================================================================

    /// Switches the server on or off. An unavailable server fails every
    /// CRUD call and subscription.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        tracing::info!(available, "server availability changed");
    }

    /// Returns true if the server is accepting requests.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Opens a change subscription.
    pub fn subscribe(&self) -> ServerResult<mpsc::Receiver<ChangeMessage>> {
        self.ensure_available()?;
        Ok(self.hub.subscribe())
    }

    /// Drops every live subscription.
    pub fn disconnect_all(&self) {
        self.hub.disconnect_all();
    }

    fn ensure_available(&self) -> ServerResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(ServerError::Unavailable)
        }
    }

    fn assign_id(&self, kind: EntityKind) -> String {
        match self.config.id_strategy {
            IdStrategy::Uuid => uuid::Uuid::new_v4().to_string(),
            IdStrategy::Sequential => {
                let n = self.next_seq.fetch_add(1, Ordering::SeqCst);
                format!("{}-{}", id_prefix(kind), n)
            }
        }
    }
}

impl Default for CmsServer {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl std::fmt::Debug for CmsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: BTreeMap<EntityKind, usize> = self
            .collections
            .read()
            .iter()
            .map(|(kind, records)| (*kind, records.len()))
            .collect();
        f.debug_struct("CmsServer")
            .field("available", &self.is_available())
            .field("counts", &counts)
            .field("subscribers", &self.hub.subscriber_count())
            .finish()
    }
}

fn id_prefix(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Product => "p",
        EntityKind::Template => "t",
        EntityKind::TextAsset => "ta",
        EntityKind::VisualAsset => "va",
        EntityKind::Chart => "c",
    }
}

fn record_id(record: &Value) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

fn not_found(kind: EntityKind, id: &str) -> ServerError {
    ServerError::NotFound {
        kind,
        id: id.to_string(),
    }
}

fn into_object(value: Value) -> ServerResult<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ServerError::Validation(format!(
            "expected an object, got {other}"
        ))),
    }
}

fn validate(kind: EntityKind, record: &Value) -> ServerResult<()> {
    let value = record.clone();
    let result = match kind {
        EntityKind::Product => Product::from_value(value).map(drop),
        EntityKind::Template => Template::from_value(value).map(drop),
        EntityKind::TextAsset => TextAsset::from_value(value).map(drop),
        EntityKind::VisualAsset => VisualAsset::from_value(value).map(drop),
        EntityKind::Chart => Chart::from_value(value).map(drop),
    };
    result.map_err(|e| ServerError::Validation(e.to_string()))
}
