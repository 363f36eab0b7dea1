//! Change messages delivered by the broadcast hub.

use crate::entity::EntityKind;
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// What happened to the entity (or entities) in a change message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeAction {
    /// A record was created.
    Create,
    /// A record was updated.
    Update,
    /// A record was deleted.
    Delete,
    /// Several records were deleted at once.
    BatchDelete,
}

/// A single change notification.
///
/// Delivery is at-least-once and includes changes originated by the
/// receiving client itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeMessage {
    /// Collection the change applies to.
    pub entity_kind: EntityKind,
    /// Type of change.
    pub action: ChangeAction,
    /// Full record for create/update; id(s) for deletes.
    #[serde(default)]
    pub payload: Value,
}

impl ChangeMessage {
    /// Creates a message.
    pub fn new(entity_kind: EntityKind, action: ChangeAction, payload: Value) -> Self {
        Self {
            entity_kind,
            action,
            payload,
        }
    }

    /// A create message carrying the full record.
    pub fn created(entity_kind: EntityKind, record: Value) -> Self {
        Self::new(entity_kind, ChangeAction::Create, record)
    }

    /// An update message carrying the full record.
    pub fn updated(entity_kind: EntityKind, record: Value) -> Self {
        Self::new(entity_kind, ChangeAction::Update, record)
    }

    /// A delete message for one id.
    pub fn deleted(entity_kind: EntityKind, id: impl Into<String>) -> Self {
        Self::new(entity_kind, ChangeAction::Delete, json!({ "id": id.into() }))
    }

    /// A batch delete message.
    pub fn batch_deleted(entity_kind: EntityKind, ids: Vec<String>) -> Self {
        Self::new(entity_kind, ChangeAction::BatchDelete, json!({ "ids": ids }))
    }

    /// Extracts the identifiers a delete or batch delete applies to.
    ///
    /// Accepted payload shapes: `"id"`, `{"id": "..."}`, `{"ids": [...]}` and
    /// arrays of either strings or `{"id": ...}` objects.
    pub fn target_ids(&self) -> ProtocolResult<Vec<String>> {
        let ids = match &self.payload {
            Value::String(id) => vec![id.clone()],
            Value::Object(map) => match (map.get("ids"), map.get("id")) {
                (Some(Value::Array(items)), _) => ids_from_array(items)?,
                (_, Some(Value::String(id))) => vec![id.clone()],
                _ => {
                    return Err(ProtocolError::InvalidPayload(format!(
                        "{:?} payload has no id",
                        self.action
                    )))
                }
            },
            Value::Array(items) => ids_from_array(items)?,
            other => {
                return Err(ProtocolError::InvalidPayload(format!(
                    "unexpected {:?} payload: {}",
                    self.action, other
                )))
            }
        };

        if self.action == ChangeAction::Delete && ids.len() != 1 {
            return Err(ProtocolError::InvalidPayload(format!(
                "delete expects one id, got {}",
                ids.len()
            )));
        }
        Ok(ids)
    }
}

fn ids_from_array(items: &[Value]) -> ProtocolResult<Vec<String>> {
    items
        .iter()
        .map(|item| match item {
            Value::String(id) => Ok(id.clone()),
            Value::Object(map) => map
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| ProtocolError::InvalidPayload("array entry has no id".into())),
            other => Err(ProtocolError::InvalidPayload(format!(
                "unexpected id entry: {}",
                other
            ))),
        })
        .collect()
}
