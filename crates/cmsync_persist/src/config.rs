//! The persisted client configuration record.
//!
//! Stored configs are merged against a fixed schema one field at a time:
//! a recognized field that is missing or does not validate takes the
//! default, everything else is kept. Unrecognized fields are carried along
//! in [`AppConfig::extra`] so that they survive a re-save, but nothing in
//! the client reads them.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// UI color theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Follow the operating system.
    #[default]
    System,
    /// Light theme.
    Light,
    /// Dark theme.
    Dark,
}

/// Client configuration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Software version that last wrote the record.
    pub version: String,
    /// Data-format version that last wrote the record.
    pub data_format_version: u32,
    /// UI theme.
    pub theme: Theme,
    /// Locale tag.
    pub locale: String,
    /// Seconds between automatic snapshot saves.
    pub autosave_interval_secs: u64,
    /// Seconds between automatic backups.
    pub backup_interval_secs: u64,
    /// Number of backups kept in the ring.
    pub max_backups: usize,
    /// Whether the realtime channel is started at boot.
    pub realtime_enabled: bool,
    /// Fields this version does not recognize.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Field names of the fixed schema.
const RECOGNIZED_FIELDS: [&str; 8] = [
    "version",
    "data_format_version",
    "theme",
    "locale",
    "autosave_interval_secs",
    "backup_interval_secs",
    "max_backups",
    "realtime_enabled",
];

impl AppConfig {
    /// Default configuration for the given software and data-format versions.
    pub fn defaults(version: impl Into<String>, data_format_version: u32) -> Self {
        Self {
            version: version.into(),
            data_format_version,
            theme: Theme::System,
            locale: "en-US".into(),
            autosave_interval_secs: 30,
            backup_interval_secs: 300,
            max_backups: crate::backup::DEFAULT_BACKUP_CAPACITY,
            realtime_enabled: true,
            extra: BTreeMap::new(),
        }
    }

    /// Merges a stored record into `defaults`, field by field.
    ///
    /// A stored value that is not a JSON object yields the defaults with
    /// every field reported as filled.
    pub fn merge_stored(stored: &Value, defaults: &AppConfig) -> (AppConfig, ConfigMerge) {
        let mut config = defaults.clone();
        let mut merge = ConfigMerge::default();

        let Value::Object(map) = stored else {
            merge.filled = RECOGNIZED_FIELDS.to_vec();
            return (config, merge);
        };

        merge_field(map, "version", &mut config.version, &mut merge, |v: &String| {
            !v.is_empty()
        });
        merge_field(
            map,
            "data_format_version",
            &mut config.data_format_version,
            &mut merge,
            |v| *v > 0,
        );
        merge_field(map, "theme", &mut config.theme, &mut merge, |_| true);
        merge_field(map, "locale", &mut config.locale, &mut merge, |v: &String| {
            !v.trim().is_empty()
        });
        merge_field(
            map,
            "autosave_interval_secs",
            &mut config.autosave_interval_secs,
            &mut merge,
            |v| *v > 0,
        );
        merge_field(
            map,
            "backup_interval_secs",
            &mut config.backup_interval_secs,
            &mut merge,
            |v| *v > 0,
        );
        merge_field(map, "max_backups", &mut config.max_backups, &mut merge, |v| {
            (1..=100).contains(v)
        });
        merge_field(
            map,
            "realtime_enabled",
            &mut config.realtime_enabled,
            &mut merge,
            |_| true,
        );

        for (key, value) in map {
            if !RECOGNIZED_FIELDS.contains(&key.as_str()) {
                merge.extra.push(key.clone());
                config.extra.insert(key.clone(), value.clone());
            }
        }

        (config, merge)
    }

    /// Returns true if the record was written by another software or
    /// data-format version.
    pub fn is_stale(&self, version: &str, data_format_version: u32) -> bool {
        self.version != version || self.data_format_version != data_format_version
    }
}

/// What [`AppConfig::merge_stored`] had to change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMerge {
    /// Recognized fields that were missing and took their default.
    pub filled: Vec<&'static str>,
    /// Recognized fields whose stored value was rejected.
    pub invalid: Vec<&'static str>,
    /// Unrecognized fields carried along.
    pub extra: Vec<String>,
}

impl ConfigMerge {
    /// Returns true if any recognized field was defaulted.
    pub fn changed(&self) -> bool {
        !self.filled.is_empty() || !self.invalid.is_empty()
    }
}

fn merge_field<T, F>(
    map: &Map<String, Value>,
    key: &'static str,
    target: &mut T,
    merge: &mut ConfigMerge,
    valid: F,
) where
    T: DeserializeOwned,
    F: Fn(&T) -> bool,
{
    match map.get(key) {
        None => merge.filled.push(key),
        Some(value) => match serde_json::from_value::<T>(value.clone()) {
            Ok(parsed) if valid(&parsed) => *target = parsed,
            _ => merge.invalid.push(key),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn defaults() -> AppConfig {
        AppConfig::defaults("1.4.0", 2)
    }

    #[test]
    fn missing_fields_take_defaults_and_stored_values_survive() {
        let stored = json!({
            "version": "1.3.0",
            "data_format_version": 2,
            "theme": "dark",
            "locale": "de-DE",
            "autosave_interval_secs": 45,
            "backup_interval_secs": 600,
            "max_backups": 4
        });

        let (config, merge) = AppConfig::merge_stored(&stored, &defaults());
        assert_eq!(merge.filled, vec!["realtime_enabled"]);
        assert!(merge.invalid.is_empty());
        assert!(config.realtime_enabled);
        assert_eq!(config.theme, Theme::Dark);
        assert_eq!(config.locale, "de-DE");
        assert_eq!(config.autosave_interval_secs, 45);
        assert_eq!(config.max_backups, 4);
        assert_eq!(config.version, "1.3.0");
    }

    #[test]
    fn invalid_values_are_defaulted() {
        let stored = json!({
            "theme": "neon",
            "max_backups": 0,
            "autosave_interval_secs": "soon",
            "locale": "  "
        });

        let (config, merge) = AppConfig::merge_stored(&stored, &defaults());
        assert_eq!(config.theme, Theme::System);
        assert_eq!(config.max_backups, 10);
        assert_eq!(config.autosave_interval_secs, 30);
        assert_eq!(config.locale, "en-US");
        assert_eq!(
            merge.invalid,
            vec!["theme", "locale", "autosave_interval_secs", "max_backups"]
        );
    }

    #[test]
    fn unknown_fields_are_carried_not_interpreted() {
        let stored = json!({ "sidebar_width": 320, "theme": "light" });
        let (config, merge) = AppConfig::merge_stored(&stored, &defaults());

        assert_eq!(merge.extra, vec!["sidebar_width"]);
        assert_eq!(config.extra.get("sidebar_width"), Some(&json!(320)));

        let resaved = serde_json::to_value(&config).unwrap();
        assert_eq!(resaved["sidebar_width"], json!(320));
        assert_eq!(resaved["theme"], json!("light"));
    }

    #[test]
    fn non_object_yields_defaults() {
        let (config, merge) = AppConfig::merge_stored(&json!([1, 2]), &defaults());
        assert_eq!(config, defaults());
        assert_eq!(merge.filled.len(), RECOGNIZED_FIELDS.len());
    }

    #[test]
    fn staleness() {
        let config = defaults();
        assert!(!config.is_stale("1.4.0", 2));
        assert!(config.is_stale("1.5.0", 2));
        assert!(config.is_stale("1.4.0", 3));
    }
}
