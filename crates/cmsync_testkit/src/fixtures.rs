//! Sample records, snapshots and stores.
//!
//! Records are built from JSON so the fixtures exercise the same parsing
//! path as data coming off the wire.

use cmsync_codec::{encode, Snapshot};
use cmsync_protocol::{
    Chart, Collections, EntityKind, Product, Record, Template, TextAsset, VisualAsset,
};
use cmsync_storage::FileStore;
use serde_json::{json, Value};
use std::path::Path;
use tempfile::TempDir;

/// A valid JSON record of `kind` with the given id.
pub fn sample_value(kind: EntityKind, id: &str) -> Value {
    match kind {
        EntityKind::Product => json!({
            "id": id,
            "title": format!("Product {id}"),
            "price": 9.5,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
        }),
        EntityKind::Template => json!({
            "id": id,
            "name": format!("Template {id}"),
            "layout": { "columns": 2 },
        }),
        EntityKind::TextAsset => json!({
            "id": id,
            "key": format!("text.{id}"),
            "content": "Hello",
            "locale": "en-US",
        }),
        EntityKind::VisualAsset => json!({
            "id": id,
            "name": format!("Image {id}"),
            "url": format!("https://cdn.example.com/{id}.png"),
            "mime_type": "image/png",
        }),
        EntityKind::Chart => json!({
            "id": id,
            "name": format!("Chart {id}"),
            "chart_type": "bar",
            "data": [1, 2, 3],
        }),
    }
}

/// A JSON record of `kind` that fails structural validation.
pub fn invalid_value(kind: EntityKind) -> Value {
    json!({ "id": format!("bad-{}", kind.as_str()) })
}

/// Parses a fixture value into its typed record.
///
/// # Panics
///
/// Panics if the value is not a valid record of `R`'s kind.
pub fn sample<R: Record>(id: &str) -> R {
    R::from_value(sample_value(R::KIND, id)).expect("fixture record is valid")
}

/// A sample product.
pub fn product(id: &str) -> Product {
    sample(id)
}

/// Collections with `per_kind` records of every kind.
///
/// Ids are `<kind>-<n>`, starting at 1.
pub fn sample_collections(per_kind: usize) -> Collections {
    let mut collections = Collections::new();
    for n in 1..=per_kind {
        collections.upsert(sample::<Product>(&format!("product-{n}")));
        collections.upsert(sample::<Template>(&format!("template-{n}")));
        collections.upsert(sample::<TextAsset>(&format!("textAsset-{n}")));
        collections.upsert(sample::<VisualAsset>(&format!("visualAsset-{n}")));
        collections.upsert(sample::<Chart>(&format!("chart-{n}")));
    }
    collections
}

/// Encoded snapshot blob of `collections`.
///
/// # Panics
///
/// Panics if encoding fails.
pub fn snapshot_blob(collections: Collections) -> String {
    encode(&Snapshot::new(collections)).expect("fixture snapshot encodes")
}

/// A blob that is not a decodable snapshot.
pub fn corrupt_blob() -> String {
    "{\"format_version\": 2, \"collections\": [truncated".to_string()
}

/// A file store rooted in a temporary directory.
pub struct TempStore {
    /// The store.
    pub store: FileStore,
    _temp_dir: TempDir,
}

impl TempStore {
    /// Creates an empty store in a fresh temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the directory or store cannot be created.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStore::open(temp_dir.path()).expect("Failed to open file store");
        Self {
            store,
            _temp_dir: temp_dir,
        }
    }

    /// Directory the store writes to.
    pub fn path(&self) -> &Path {
        self.store.path()
    }
}

impl Default for TempStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TempStore {
    type Target = FileStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmsync_codec::decode;
    use cmsync_storage::KeyValueStore;

    #[test]
    fn every_sample_value_is_valid() {
        for kind in EntityKind::ALL {
            let value = sample_value(kind, "x-1");
            let ok = match kind {
                EntityKind::Product => Product::from_value(value).is_ok(),
                EntityKind::Template => Template::from_value(value).is_ok(),
                EntityKind::TextAsset => TextAsset::from_value(value).is_ok(),
                EntityKind::VisualAsset => VisualAsset::from_value(value).is_ok(),
                EntityKind::Chart => Chart::from_value(value).is_ok(),
            };
            assert!(ok, "{kind} fixture rejected");
        }
    }

    #[test]
    fn invalid_value_is_rejected() {
        assert!(Product::from_value(invalid_value(EntityKind::Product)).is_err());
        assert!(Chart::from_value(invalid_value(EntityKind::Chart)).is_err());
    }

    #[test]
    fn sample_collections_round_trip() {
        let collections = sample_collections(3);
        assert_eq!(collections.counts().total(), 15);

        let decoded = decode(&snapshot_blob(collections.clone())).unwrap();
        assert_eq!(decoded.snapshot.collections, collections);
        assert!(decoded.report.is_clean());
        assert!(decode(&corrupt_blob()).is_err());
    }

    #[test]
    fn temp_store_is_usable() {
        let temp = TempStore::new();
        temp.set("k", "v").unwrap();
        assert_eq!(temp.get("k").unwrap().as_deref(), Some("v"));
        assert!(temp.path().exists());
    }
}
