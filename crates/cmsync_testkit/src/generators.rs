//! Property-based test generators using proptest.
//!
//! Ids are drawn from a small pool so generated message sequences hit the
//! same records repeatedly.

use crate::fixtures::sample_value;
use cmsync_protocol::{ChangeMessage, EntityKind};
use proptest::prelude::*;
use serde_json::Value;

/// Strategy for entity kinds.
pub fn entity_kind_strategy() -> impl Strategy<Value = EntityKind> {
    prop::sample::select(EntityKind::ALL.to_vec())
}

/// Strategy for record ids from a pool of eight.
pub fn record_id_strategy() -> impl Strategy<Value = String> {
    (1u8..=8).prop_map(|n| format!("r-{n}"))
}

/// Strategy for valid JSON records of `kind`.
pub fn record_value_strategy(kind: EntityKind) -> impl Strategy<Value = Value> {
    (record_id_strategy(), "[a-zA-Z ]{1,16}").prop_map(move |(id, label)| {
        let mut value = sample_value(kind, &id);
        let field = match kind {
            EntityKind::Product => "title",
            EntityKind::TextAsset => "content",
            _ => "name",
        };
        value[field] = Value::String(label);
        value
    })
}

/// Strategy for well-formed change messages of any action.
pub fn change_message_strategy() -> impl Strategy<Value = ChangeMessage> {
    entity_kind_strategy().prop_flat_map(|kind| {
        prop_oneof![
            3 => record_value_strategy(kind).prop_map(move |v| ChangeMessage::created(kind, v)),
            3 => record_value_strategy(kind).prop_map(move |v| ChangeMessage::updated(kind, v)),
            2 => record_id_strategy().prop_map(move |id| ChangeMessage::deleted(kind, id)),
            1 => prop::collection::vec(record_id_strategy(), 0..4)
                .prop_map(move |ids| ChangeMessage::batch_deleted(kind, ids)),
        ]
    })
}

/// Strategy for sequences of change messages.
pub fn change_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<ChangeMessage>> {
    prop::collection::vec(change_message_strategy(), 0..max_len)
}
