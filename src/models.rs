use crate::profile::EntityKind;
use crate::reference::ReferenceDataset;
use crate::table::Cell;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Root holding the geojson/ and codes/ reference folders
    pub data_directory: Option<String>,
    pub output_directory: Option<String>,
    pub reference_source: ReferenceSourceMode,
    pub code_width: usize,
    pub duplicate_policy: DuplicatePolicy,
    // Keyed by entity kind; consulted when reference_source is "internet"
    pub reference_urls: Option<BTreeMap<String, String>>,
    pub map: MapSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceSourceMode {
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "internet")]
    Internet,
}

/// What to do when several uploaded rows share one canonical code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicatePolicy {
    /// Standard left-join behaviour: the reference row is repeated once per user row.
    #[serde(rename = "multiply")]
    Multiply,
    /// Only the first uploaded row for a code takes part in the join.
    #[serde(rename = "keep_first")]
    KeepFirst,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapSettings {
    pub center: [f64; 2],
    pub zoom: u8,
    // Outline drawn under the entities, relative to data_directory
    pub state_outline: Option<String>,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            center: [44.3148, -85.6024],
            zoom: 7,
            state_outline: Some("geojson/michigan.geojson".to_string()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_directory: Some(".".to_string()),
            output_directory: Some("output".to_string()),
            reference_source: ReferenceSourceMode::Local,
            code_width: 5,
            duplicate_policy: DuplicatePolicy::Multiply,
            reference_urls: Some(default_reference_urls()),
            map: MapSettings::default(),
        }
    }
}

// Placeholder host mirroring the local data layout, one entry per kind and dataset
fn default_reference_urls() -> BTreeMap<String, String> {
    let mut urls = BTreeMap::new();
    for kind in EntityKind::ALL {
        let profile = kind.profile();
        for dataset in [ReferenceDataset::Geographic, ReferenceDataset::CodeLookup] {
            urls.insert(
                dataset.url_key(&profile),
                format!("https://example.com/{}", dataset.relative_path(&profile)),
            );
        }
    }
    urls
}

impl Config {
    pub fn load_from_file(file_path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(file_path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, file_path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(file_path, content)?;
        Ok(())
    }

    pub fn reference_url(&self, key: &str) -> Option<&str> {
        self.reference_urls
            .as_ref()
            .and_then(|urls| urls.get(key))
            .map(String::as_str)
    }
}

/// Where an entity sits on the map.
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    /// Opaque GeoJSON geometry, carried through the join untouched.
    Polygon(serde_json::Value),
    Point { latitude: f64, longitude: f64 },
    None,
}

/// One row of the reference dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub name: String,
    pub code: String,
    pub location: Location,
    pub attributes: BTreeMap<String, String>,
}

/// One row of the uploaded spreadsheet after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub name: String,
    // None when the code cell was blank
    pub code: Option<String>,
    pub extra: BTreeMap<String, Cell>,
    pub present_count: u8,
}

impl UserRecord {
    pub fn code_or_blank(&self) -> &str {
        self.code.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_survives_toml_round_trip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();

        assert_eq!(back.code_width, 5);
        assert_eq!(back.duplicate_policy, DuplicatePolicy::Multiply);
        assert_eq!(back.reference_source, ReferenceSourceMode::Local);
        assert_eq!(back.map.center, [44.3148, -85.6024]);
        assert_eq!(back.reference_url("isd"), config.reference_url("isd"));
    }

    #[test]
    fn default_config_has_a_url_for_every_reference_dataset() {
        let config = Config::default();
        for kind in EntityKind::ALL {
            let profile = kind.profile();
            for dataset in [ReferenceDataset::Geographic, ReferenceDataset::CodeLookup] {
                let key = dataset.url_key(&profile);
                assert!(config.reference_url(&key).is_some(), "no default URL for {key}");
            }
        }
        assert_eq!(
            config.reference_url("psa_codes"),
            Some("https://example.com/codes/MI_PSA_Codes.csv")
        );
    }

    #[test]
    fn policies_use_snake_case_names() {
        let text = r#"
            data_directory = "data"
            reference_source = "internet"
            code_width = 5
            duplicate_policy = "keep_first"

            [map]
            center = [42.0, -84.0]
            zoom = 6
        "#;
        let config: Config = toml::from_str(text).unwrap();

        assert_eq!(config.duplicate_policy, DuplicatePolicy::KeepFirst);
        assert_eq!(config.reference_source, ReferenceSourceMode::Internet);
        assert!(config.output_directory.is_none());
        assert!(config.map.state_outline.is_none());
        assert!(config.reference_url("psa").is_none());
    }
}
