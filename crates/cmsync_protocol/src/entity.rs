//! Managed entity kinds and their typed records.
//!
//! Every record carries a server-assigned `id` and two server-assigned
//! timestamps. Fields a kind does not know about are kept in `extra` so a
//! record survives a round-trip through a client that is older than the
//! server.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Timestamp type used for `created_at` / `updated_at`.
pub type Timestamp = DateTime<Utc>;

/// The five server-owned collections a client replicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    /// Sellable product.
    Product,
    /// Layout template products render through.
    Template,
    /// Localised text snippet.
    TextAsset,
    /// Image or other visual media reference.
    VisualAsset,
    /// Chart definition.
    Chart,
}

impl EntityKind {
    /// All kinds, in snapshot order.
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Product,
        EntityKind::Template,
        EntityKind::TextAsset,
        EntityKind::VisualAsset,
        EntityKind::Chart,
    ];

    /// Wire name used in change messages (`"product"`, `"textAsset"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Product => "product",
            EntityKind::Template => "template",
            EntityKind::TextAsset => "textAsset",
            EntityKind::VisualAsset => "visualAsset",
            EntityKind::Chart => "chart",
        }
    }

    /// Collection name used in snapshots (`"products"`, `"text_assets"`, ...).
    pub fn collection_name(&self) -> &'static str {
        match self {
            EntityKind::Product => "products",
            EntityKind::Template => "templates",
            EntityKind::TextAsset => "text_assets",
            EntityKind::VisualAsset => "visual_assets",
            EntityKind::Chart => "charts",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s || kind.collection_name() == s)
            .ok_or_else(|| ProtocolError::UnknownEntityKind(s.to_string()))
    }
}

/// A typed record belonging to one entity kind.
///
/// Replica operations are generic over this trait so that all five kinds
/// share one implementation.
pub trait Record:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// The kind this record type represents.
    const KIND: EntityKind;

    /// Server-assigned identifier.
    fn id(&self) -> &str;

    /// Borrows this kind's collection.
    fn collection(collections: &Collections) -> &Vec<Self>;

    /// Mutably borrows this kind's collection.
    fn collection_mut(collections: &mut Collections) -> &mut Vec<Self>;

    /// Parses and structurally validates a JSON record.
    ///
    /// Fails when a required field is missing or mistyped, or when the
    /// identifier is empty.
    fn from_value(value: Value) -> ProtocolResult<Self> {
        let record: Self = serde_json::from_value(value)
            .map_err(|e| ProtocolError::invalid_record(Self::KIND, e.to_string()))?;
        if record.id().trim().is_empty() {
            return Err(ProtocolError::invalid_record(Self::KIND, "empty id"));
        }
        Ok(record)
    }
}

/// A product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Identifier.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Long description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Price in the shop currency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    /// Template used to render the product.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    /// Last update time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    /// Fields not known to this client.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A layout template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Identifier.
    pub id: String,
    /// Template name.
    pub name: String,
    /// Layout definition, opaque to the sync layer.
    #[serde(default)]
    pub layout: Value,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    /// Last update time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    /// Fields not known to this client.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A text asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextAsset {
    /// Identifier.
    pub id: String,
    /// Lookup key.
    pub key: String,
    /// Text content.
    #[serde(default)]
    pub content: String,
    /// Locale tag, e.g. `en-US`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    /// Last update time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    /// Fields not known to this client.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A visual asset (image, video poster, icon).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualAsset {
    /// Identifier.
    pub id: String,
    /// Asset name.
    pub name: String,
    /// Where the media file is served from.
    pub url: String,
    /// MIME type of the media file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Pixel width.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Pixel height.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    /// Last update time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    /// Fields not known to this client.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A chart definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    /// Identifier.
    pub id: String,
    /// Chart name.
    pub name: String,
    /// Chart type (`bar`, `line`, ...).
    pub chart_type: String,
    /// Series data, opaque to the sync layer.
    #[serde(default)]
    pub data: Value,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    /// Last update time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    /// Fields not known to this client.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

macro_rules! impl_record {
    ($ty:ty, $kind:expr, $field:ident) => {
        impl Record for $ty {
            const KIND: EntityKind = $kind;

            fn id(&self) -> &str {
                &self.id
            }

            fn collection(collections: &Collections) -> &Vec<Self> {
                &collections.$field
            }

            fn collection_mut(collections: &mut Collections) -> &mut Vec<Self> {
                &mut collections.$field
            }
        }
    };
}

impl_record!(Product, EntityKind::Product, products);
impl_record!(Template, EntityKind::Template, templates);
impl_record!(TextAsset, EntityKind::TextAsset, text_assets);
impl_record!(VisualAsset, EntityKind::VisualAsset, visual_assets);
impl_record!(Chart, EntityKind::Chart, charts);

/// The full set of replicated collections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Collections {
    /// Products.
    #[serde(default)]
    pub products: Vec<Product>,
    /// Templates.
    #[serde(default)]
    pub templates: Vec<Template>,
    /// Text assets.
    #[serde(default)]
    pub text_assets: Vec<TextAsset>,
    /// Visual assets.
    #[serde(default)]
    pub visual_assets: Vec<VisualAsset>,
    /// Charts.
    #[serde(default)]
    pub charts: Vec<Chart>,
}

impl Collections {
    /// Creates an empty set of collections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds a record by identifier.
    pub fn find<R: Record>(&self, id: &str) -> Option<&R> {
        R::collection(self).iter().find(|r| r.id() == id)
    }

    /// Inserts `record`, or replaces the entry with the same id in place.
    ///
    /// Returns `true` if the record was newly inserted.
    pub fn upsert<R: Record>(&mut self, record: R) -> bool {
        let collection = R::collection_mut(self);
        match collection.iter_mut().find(|r| r.id() == record.id()) {
            Some(existing) => {
                *existing = record;
                false
            }
            None => {
                collection.push(record);
                true
            }
        }
    }

    /// Replaces the entry with the same id. Unmatched ids are left alone.
    ///
    /// Returns `true` if an entry was replaced.
    pub fn replace<R: Record>(&mut self, record: R) -> bool {
        match R::collection_mut(self)
            .iter_mut()
            .find(|r| r.id() == record.id())
        {
            Some(existing) => {
                *existing = record;
                true
            }
            None => false,
        }
    }

    /// Removes the entry with `id`. Returns `true` if one was removed.
    pub fn remove<R: Record>(&mut self, id: &str) -> bool {
        let collection = R::collection_mut(self);
        let before = collection.len();
        collection.retain(|r| r.id() != id);
        collection.len() != before
    }

    /// Empties the collection for `kind`.
    pub fn clear_kind(&mut self, kind: EntityKind) {
        match kind {
            EntityKind::Product => self.products.clear(),
            EntityKind::Template => self.templates.clear(),
            EntityKind::TextAsset => self.text_assets.clear(),
            EntityKind::VisualAsset => self.visual_assets.clear(),
            EntityKind::Chart => self.charts.clear(),
        }
    }

    /// Returns per-collection entry counts.
    pub fn counts(&self) -> CollectionCounts {
        CollectionCounts {
            products: self.products.len(),
            templates: self.templates.len(),
            text_assets: self.text_assets.len(),
            visual_assets: self.visual_assets.len(),
            charts: self.charts.len(),
        }
    }

    /// Returns true if every collection is empty.
    pub fn is_empty(&self) -> bool {
        self.counts().total() == 0
    }
}

/// Entry counts per collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionCounts {
    /// Number of products.
    pub products: usize,
    /// Number of templates.
    pub templates: usize,
    /// Number of text assets.
    pub text_assets: usize,
    /// Number of visual assets.
    pub visual_assets: usize,
    /// Number of charts.
    pub charts: usize,
}

impl CollectionCounts {
    /// Count for a single kind.
    pub fn of(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Product => self.products,
            EntityKind::Template => self.templates,
            EntityKind::TextAsset => self.text_assets,
            EntityKind::VisualAsset => self.visual_assets,
            EntityKind::Chart => self.charts,
        }
    }

    /// Sum over all kinds.
    pub fn total(&self) -> usize {
        self.products + self.templates + self.text_assets + self.visual_assets + self.charts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn product(id: &str, title: &str) -> Product {
        Product::from_value(json!({ "id": id, "title": title })).unwrap()
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
            assert_eq!(kind.collection_name().parse::<EntityKind>().unwrap(), kind);
        }
        assert!("widget".parse::<EntityKind>().is_err());
    }

    #[test]
    fn kind_serializes_as_wire_name() {
        assert_eq!(
            serde_json::to_value(EntityKind::TextAsset).unwrap(),
            json!("textAsset")
        );
    }

    #[test]
    fn from_value_requires_kind_fields() {
        assert!(Product::from_value(json!({ "id": "p-1" })).is_err());
        assert!(VisualAsset::from_value(json!({ "id": "v-1", "name": "logo" })).is_err());
        assert!(Chart::from_value(json!({ "id": "c-1", "name": "sales", "chart_type": "bar" })).is_ok());
    }

    #[test]
    fn from_value_rejects_empty_id() {
        let err = Product::from_value(json!({ "id": "  ", "title": "X" })).unwrap_err();
        assert!(err.to_string().contains("empty id"));
    }

    #[test]
    fn unknown_fields_are_preserved() {
        let value = json!({ "id": "p-1", "title": "X", "badge": "new" });
        let record = Product::from_value(value.clone()).unwrap();
        assert_eq!(record.extra.get("badge"), Some(&json!("new")));
        assert_eq!(serde_json::to_value(&record).unwrap(), value);
    }

    #[test]
    fn upsert_replaces_in_place() {
        let mut collections = Collections::new();
        assert!(collections.upsert(product("p-1", "A")));
        assert!(collections.upsert(product("p-2", "B")));
        assert!(!collections.upsert(product("p-1", "A2")));

        assert_eq!(collections.products.len(), 2);
        assert_eq!(collections.products[0].title, "A2");
    }

    #[test]
    fn replace_ignores_unknown_ids() {
        let mut collections = Collections::new();
        collections.upsert(product("p-1", "A"));
        assert!(!collections.replace(product("p-9", "Z")));
        assert_eq!(collections.products.len(), 1);
    }

    #[test]
    fn remove_absent_is_noop() {
        let mut collections = Collections::new();
        collections.upsert(product("p-1", "A"));
        assert!(!collections.remove::<Product>("p-2"));
        assert!(collections.remove::<Product>("p-1"));
        assert!(collections.is_empty());
    }

    #[test]
    fn counts_per_kind() {
        let mut collections = Collections::new();
        collections.upsert(product("p-1", "A"));
        let counts = collections.counts();
        assert_eq!(counts.of(EntityKind::Product), 1);
        assert_eq!(counts.total(), 1);
        collections.clear_kind(EntityKind::Product);
        assert!(collections.is_empty());
    }
}
