//! Snapshot decoder with per-record structural validation.

use crate::error::{CodecError, CodecResult};
use crate::snapshot::{Snapshot, CURRENT_FORMAT_VERSION};
use cmsync_protocol::{
    Chart, Collections, EntityKind, Product, Record, Template, TextAsset, Timestamp, VisualAsset,
};
use serde_json::{Map, Value};

/// A record dropped during decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRecord {
    /// Collection the record was in.
    pub kind: EntityKind,
    /// Position in the stored array.
    pub index: usize,
    /// Why it was dropped.
    pub reason: String,
}

/// What decoding had to discard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeReport {
    /// Records that failed structural validation.
    pub dropped: Vec<DroppedRecord>,
    /// Records that repeated an id already seen in the same collection.
    pub duplicates: usize,
}

impl DecodeReport {
    /// Returns true if nothing was discarded.
    pub fn is_clean(&self) -> bool {
        self.dropped.is_empty() && self.duplicates == 0
    }

    /// Number of dropped records of `kind`.
    pub fn dropped_of(&self, kind: EntityKind) -> usize {
        self.dropped.iter().filter(|d| d.kind == kind).count()
    }
}

/// A decoded snapshot together with its report.
#[derive(Debug, Clone)]
pub struct Decoded {
    /// The usable snapshot.
    pub snapshot: Snapshot,
    /// What was discarded to obtain it.
    pub report: DecodeReport,
}

/// Decodes and validates a snapshot blob.
///
/// # Errors
///
/// Returns an error if the blob as a whole cannot be interpreted as a
/// snapshot. Bad individual records are reported, not returned as errors.
pub fn decode(blob: &str) -> CodecResult<Decoded> {
    let root: Value = serde_json::from_str(blob).map_err(|e| CodecError::InvalidJson {
        message: e.to_string(),
    })?;
    let Value::Object(root) = root else {
        return Err(CodecError::envelope("snapshot is not an object"));
    };

    let format_version = read_version(&root)?;
    let created_at = root
        .get("created_at")
        .and_then(|v| serde_json::from_value::<Timestamp>(v.clone()).ok());

    let collections = match root.get("collections") {
        Some(Value::Object(map)) => map,
        Some(_) => return Err(CodecError::envelope("collections is not an object")),
        None => return Err(CodecError::envelope("missing collections")),
    };

    let mut report = DecodeReport::default();
    let mut decoded = Collections::new();
    read_collection::<Product>(collections, &mut decoded, &mut report)?;
    read_collection::<Template>(collections, &mut decoded, &mut report)?;
    read_collection::<TextAsset>(collections, &mut decoded, &mut report)?;
    read_collection::<VisualAsset>(collections, &mut decoded, &mut report)?;
    read_collection::<Chart>(collections, &mut decoded, &mut report)?;

    if !report.is_clean() {
        tracing::warn!(
            dropped = report.dropped.len(),
            duplicates = report.duplicates,
            "snapshot contained invalid records"
        );
    }

    Ok(Decoded {
        snapshot: Snapshot {
            format_version,
            created_at,
            collections: decoded,
        },
        report,
    })
}

fn read_version(root: &Map<String, Value>) -> CodecResult<u32> {
    let version = root
        .get("format_version")
        .ok_or_else(|| CodecError::envelope("missing format_version"))?
        .as_u64()
        .ok_or_else(|| CodecError::envelope("format_version is not an unsigned integer"))?;

    if version == 0 || version > u64::from(CURRENT_FORMAT_VERSION) {
        return Err(CodecError::UnsupportedVersion {
            found: version,
            supported: CURRENT_FORMAT_VERSION,
        });
    }
    Ok(version as u32)
}

fn read_collection<R: Record>(
    collections: &Map<String, Value>,
    into: &mut Collections,
    report: &mut DecodeReport,
) -> CodecResult<()> {
    let name = R::KIND.collection_name();
    let items = match collections.get(name) {
        None | Some(Value::Null) => return Ok(()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(CodecError::envelope(format!(
                "collection {name} is not an array"
            )))
        }
    };

    for (index, item) in items.iter().enumerate() {
        match R::from_value(item.clone()) {
            Ok(record) => {
                if !into.upsert(record) {
                    report.duplicates += 1;
                }
            }
            Err(e) => report.dropped.push(DroppedRecord {
                kind: R::KIND,
                index,
                reason: e.to_string(),
            }),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::encode;
    use serde_json::json;

    fn blob(value: Value) -> String {
        value.to_string()
    }

    #[test]
    fn round_trip_keeps_records() {
        let mut collections = Collections::new();
        collections.upsert(Product::from_value(json!({ "id": "p-1", "title": "Lamp" })).unwrap());
        collections.upsert(
            Chart::from_value(json!({ "id": "c-1", "name": "Sales", "chart_type": "bar" }))
                .unwrap(),
        );

        let decoded = decode(&encode(&Snapshot::new(collections.clone())).unwrap()).unwrap();
        assert_eq!(decoded.snapshot.collections, collections);
        assert!(decoded.report.is_clean());
        assert!(decoded.snapshot.created_at.is_some());
    }

    #[test]
    fn invalid_records_are_dropped_not_fatal() {
        let decoded = decode(&blob(json!({
            "format_version": 2,
            "collections": {
                "products": [
                    { "id": "p-1", "title": "Lamp" },
                    { "title": "no id" },
                    { "id": "p-3" },
                    "garbage"
                ],
                "templates": [{ "id": "t-1", "name": "Default" }]
            }
        })))
        .unwrap();

        assert_eq!(decoded.snapshot.collections.products.len(), 1);
        assert_eq!(decoded.snapshot.collections.templates.len(), 1);
        assert_eq!(decoded.report.dropped_of(EntityKind::Product), 3);
        let indexes: Vec<usize> = decoded.report.dropped.iter().map(|d| d.index).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
    }

    #[test]
    fn duplicate_ids_keep_last() {
        let decoded = decode(&blob(json!({
            "format_version": 2,
            "collections": {
                "products": [
                    { "id": "p-1", "title": "old" },
                    { "id": "p-1", "title": "new" }
                ]
            }
        })))
        .unwrap();

        assert_eq!(decoded.snapshot.collections.products.len(), 1);
        assert_eq!(decoded.snapshot.collections.products[0].title, "new");
        assert_eq!(decoded.report.duplicates, 1);
    }

    #[test]
    fn missing_collections_default_to_empty() {
        let decoded = decode(r#"{"format_version":1,"collections":{}}"#).unwrap();
        assert!(decoded.snapshot.collections.is_empty());
        assert_eq!(decoded.snapshot.format_version, 1);
    }

    #[test]
    fn unparseable_blob_is_rejected() {
        assert!(matches!(
            decode("{\"format_version\": 2, \"collec"),
            Err(CodecError::InvalidJson { .. })
        ));
        assert!(matches!(
            decode("[1, 2, 3]"),
            Err(CodecError::InvalidEnvelope { .. })
        ));
        assert!(matches!(
            decode(r#"{"format_version":2}"#),
            Err(CodecError::InvalidEnvelope { .. })
        ));
        assert!(matches!(
            decode(r#"{"format_version":2,"collections":{"charts":{}}}"#),
            Err(CodecError::InvalidEnvelope { .. })
        ));
    }

    #[test]
    fn version_is_checked() {
        assert!(matches!(
            decode(r#"{"collections":{}}"#),
            Err(CodecError::InvalidEnvelope { .. })
        ));
        assert!(matches!(
            decode(r#"{"format_version":99,"collections":{}}"#),
            Err(CodecError::UnsupportedVersion { found: 99, .. })
        ));
        assert!(matches!(
            decode(r#"{"format_version":0,"collections":{}}"#),
            Err(CodecError::UnsupportedVersion { found: 0, .. })
        ));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    proptest! {
        #[test]
        fn arbitrary_text_never_panics(text in ".{0,256}") {
            let _ = decode(&text);
        }

        #[test]
        fn decoded_ids_are_unique(ids in prop::collection::vec("[a-c]{1,2}", 0..20)) {
            let products: Vec<Value> = ids
                .iter()
                .map(|id| json!({ "id": id, "title": "t" }))
                .collect();
            let blob = json!({ "format_version": 2, "collections": { "products": products } });
            let decoded = decode(&blob.to_string()).unwrap();

            let mut seen: Vec<&str> = decoded
                .snapshot
                .collections
                .products
                .iter()
                .map(|p| p.id.as_str())
                .collect();
            let total = seen.len();
            seen.sort_unstable();
            seen.dedup();
            prop_assert_eq!(seen.len(), total);
            prop_assert_eq!(total + decoded.report.duplicates, ids.len());
        }
    }
}
