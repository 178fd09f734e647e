use crate::error::ReconcileError;
use crate::models::{EntityRecord, Location};
use crate::normalize::{normalize_code, normalize_name};
use crate::profile::{EntityProfile, LocationKind};
use crate::table::{Cell, Table};
use anyhow::Context;
use log::{info, warn};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const LATITUDE: &str = "Latitude";
pub const LONGITUDE: &str = "Longitude";

/// Which reference file of a profile to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceDataset {
    /// Boundaries or locations used by the map maker.
    Geographic,
    /// Name/code lookup used by the code matchmaker.
    CodeLookup,
}

impl ReferenceDataset {
    pub fn relative_path(self, profile: &EntityProfile) -> &'static str {
        match self {
            ReferenceDataset::Geographic => profile.reference_file,
            ReferenceDataset::CodeLookup => profile.code_lookup_file,
        }
    }

    /// Key of this dataset in the config's `reference_urls` table.
    pub fn url_key(self, profile: &EntityProfile) -> String {
        match self {
            ReferenceDataset::Geographic => profile.kind.key().to_string(),
            ReferenceDataset::CodeLookup => format!("{}_codes", profile.kind.key()),
        }
    }
}

/// The authoritative entities an upload is matched against. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceTable {
    pub records: Vec<EntityRecord>,
}

impl ReferenceTable {
    pub fn new(records: Vec<EntityRecord>) -> Self {
        Self { records }
    }

    /// Parse raw reference bytes. `location` only labels error messages.
    pub fn parse(
        profile: &EntityProfile,
        dataset: ReferenceDataset,
        bytes: &[u8],
        location: &str,
    ) -> Result<Self, ReconcileError> {
        let table = match (dataset, profile.location_kind) {
            (ReferenceDataset::CodeLookup, _) => parse_code_lookup(profile, bytes, location)?,
            (ReferenceDataset::Geographic, LocationKind::Polygon) => {
                parse_boundaries(profile, bytes, location)?
            }
            (ReferenceDataset::Geographic, LocationKind::Point) => {
                parse_located_csv(profile, bytes, location)?
            }
        };

        let duplicates = table.duplicate_codes();
        if !duplicates.is_empty() {
            warn!(
                "{} code(s) appear more than once in {}: {}",
                duplicates.len(),
                location,
                duplicates.keys().cloned().collect::<Vec<_>>().join(", ")
            );
        }

        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Canonical codes shared by more than one reference record, with their counts.
    pub fn duplicate_codes(&self) -> BTreeMap<String, usize> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for record in &self.records {
            *counts.entry(record.code.as_str()).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(code, count)| (code.to_string(), count))
            .collect()
    }
}

/// Capability the reconciliation pipeline reads its reference data from.
pub trait ReferenceProvider {
    fn reference(&self) -> Result<&ReferenceTable, ReconcileError>;
}

/// Lazily parses a reference file on first use and serves the same table afterwards.
///
/// There is no invalidation; a fresh process is the only way to pick up a changed file.
pub struct CachedReference {
    path: PathBuf,
    profile: EntityProfile,
    dataset: ReferenceDataset,
    cache: OnceLock<ReferenceTable>,
}

impl CachedReference {
    pub fn new(data_directory: &Path, profile: EntityProfile, dataset: ReferenceDataset) -> Self {
        let path = data_directory.join(dataset.relative_path(&profile));
        Self {
            path,
            profile,
            dataset,
            cache: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<ReferenceTable, ReconcileError> {
        let location = self.path.display().to_string();
        if !self.path.exists() {
            return Err(ReconcileError::ReferenceFileMissing { location });
        }

        let bytes = std::fs::read(&self.path)?;
        let table = ReferenceTable::parse(&self.profile, self.dataset, &bytes, &location)?;
        if table.is_empty() {
            warn!("{} holds no usable {} records", location, self.profile.label);
        }
        info!("loaded {} reference {} records from {}", table.len(), self.profile.label, location);
        Ok(table)
    }
}

impl ReferenceProvider for CachedReference {
    fn reference(&self) -> Result<&ReferenceTable, ReconcileError> {
        if let Some(table) = self.cache.get() {
            return Ok(table);
        }
        let table = self.load()?;
        Ok(self.cache.get_or_init(|| table))
    }
}

/// A reference table built before the pipeline starts.
pub struct LoadedReference {
    table: ReferenceTable,
}

impl LoadedReference {
    pub fn new(table: ReferenceTable) -> Self {
        Self { table }
    }
}

impl ReferenceProvider for LoadedReference {
    fn reference(&self) -> Result<&ReferenceTable, ReconcileError> {
        Ok(&self.table)
    }
}

/// Download a reference dataset and build it up front.
pub async fn fetch_remote(
    client: &reqwest::Client,
    url: &str,
    profile: &EntityProfile,
    dataset: ReferenceDataset,
) -> anyhow::Result<LoadedReference> {
    println!("🌐 Fetching reference data from: {}", url);

    let response = client
        .get(url)
        .timeout(std::time::Duration::from_secs(30))
        .send()
        .await
        .with_context(|| format!("Failed to fetch URL: {}", url))?;

    if !response.status().is_success() {
        return Err(ReconcileError::ReferenceFileMissing {
            location: format!("{} (HTTP {})", url, response.status()),
        }
        .into());
    }

    let bytes = response
        .bytes()
        .await
        .with_context(|| format!("Failed to read response body from: {}", url))?;

    let table = ReferenceTable::parse(profile, dataset, &bytes, url)?;
    println!("   ✅ Received {} reference records", table.len());
    Ok(LoadedReference::new(table))
}

fn invalid(location: &str, reason: impl Into<String>) -> ReconcileError {
    ReconcileError::InvalidReference {
        location: location.to_string(),
        reason: reason.into(),
    }
}

fn json_to_cell(value: &Value) -> Cell {
    match value {
        Value::Null => Cell::Empty,
        Value::Bool(b) => Cell::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Cell::Int(i),
            None => n.as_f64().map(Cell::Float).unwrap_or(Cell::Empty),
        },
        Value::String(s) => Cell::Text(s.clone()),
        other => Cell::Text(other.to_string()),
    }
}

fn json_to_attribute(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_boundaries(
    profile: &EntityProfile,
    bytes: &[u8],
    location: &str,
) -> Result<ReferenceTable, ReconcileError> {
    let collection: Value = serde_json::from_slice(bytes)?;
    let features = collection
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid(location, "not a GeoJSON FeatureCollection"))?;

    let code_column = profile.code_column();
    let mut records = Vec::with_capacity(features.len());

    for (index, feature) in features.iter().enumerate() {
        let mut properties: BTreeMap<String, Value> = BTreeMap::new();
        if let Some(raw) = feature.get("properties").and_then(Value::as_object) {
            for (key, value) in raw {
                let column = profile.canonical_column(key);
                if !profile.is_dropped(column) {
                    properties.insert(column.to_string(), value.clone());
                }
            }
        }

        let code_cell = properties.remove(&code_column).map(|v| json_to_cell(&v)).unwrap_or(Cell::Empty);
        if code_cell.is_blank() {
            warn!("feature {} in {} has no {}; skipped", index, location, code_column);
            continue;
        }
        let code = match normalize_code(&code_cell, profile.code_width) {
            Ok(code) => code,
            Err(err) => {
                warn!("feature {} in {}: {}; skipped", index, location, err);
                continue;
            }
        };

        let name = properties
            .remove(profile.name_column())
            .map(|v| normalize_name(&json_to_attribute(&v)))
            .unwrap_or_default();

        let geometry = feature.get("geometry").cloned().unwrap_or(Value::Null);

        records.push(EntityRecord {
            name,
            code,
            location: Location::Polygon(geometry),
            attributes: properties
                .iter()
                .map(|(k, v)| (k.clone(), json_to_attribute(v)))
                .collect(),
        });
    }

    Ok(ReferenceTable::new(records))
}

/// Reference CSV rows split into name, code and the rest, with metadata columns dropped.
struct CsvReferenceRow {
    row_number: usize,
    name: String,
    code: String,
    attributes: BTreeMap<String, String>,
}

fn read_reference_csv(
    profile: &EntityProfile,
    bytes: &[u8],
    location: &str,
) -> Result<Vec<CsvReferenceRow>, ReconcileError> {
    let table = Table::from_csv_reader(bytes)?;
    let code_column = profile.code_column();

    let name_index = table
        .column_index(profile.name_column())
        .ok_or_else(|| invalid(location, format!("missing '{}' column", profile.name_column())))?;
    let code_index = table
        .column_index(&code_column)
        .ok_or_else(|| invalid(location, format!("missing '{}' column", code_column)))?;

    let mut rows = Vec::with_capacity(table.len());
    let mut skipped = 0usize;

    for (index, row) in table.rows.iter().enumerate() {
        if row[code_index].is_blank() {
            skipped += 1;
            continue;
        }
        let code = match normalize_code(&row[code_index], profile.code_width) {
            Ok(code) => code,
            Err(err) => {
                warn!("{}: {}; skipped", location, err.at_row(table.row_number(index)));
                continue;
            }
        };

        let attributes = table
            .headers
            .iter()
            .zip(row)
            .enumerate()
            .filter(|(i, (header, _))| {
                *i != name_index && *i != code_index && !profile.is_dropped(header)
            })
            .map(|(_, (header, cell))| (header.clone(), cell.to_string()))
            .collect();

        rows.push(CsvReferenceRow {
            row_number: table.row_number(index),
            name: normalize_name(&row[name_index].to_string()),
            code,
            attributes,
        });
    }

    if skipped > 0 {
        warn!("{} row(s) in {} have no {}; skipped", skipped, location, code_column);
    }
    Ok(rows)
}

fn parse_located_csv(
    profile: &EntityProfile,
    bytes: &[u8],
    location: &str,
) -> Result<ReferenceTable, ReconcileError> {
    let rows = read_reference_csv(profile, bytes, location)?;
    let mut records = Vec::with_capacity(rows.len());
    let mut unlocated = 0usize;

    for mut row in rows {
        let latitude = row.attributes.remove(LATITUDE).and_then(|v| v.trim().parse::<f64>().ok());
        let longitude = row.attributes.remove(LONGITUDE).and_then(|v| v.trim().parse::<f64>().ok());

        match (latitude, longitude) {
            (Some(latitude), Some(longitude)) if latitude.is_finite() && longitude.is_finite() => {
                records.push(EntityRecord {
                    name: row.name,
                    code: row.code,
                    location: Location::Point { latitude, longitude },
                    attributes: row.attributes,
                });
            }
            _ => {
                log::debug!("row {} ({}) has no usable coordinates", row.row_number, row.name);
                unlocated += 1;
            }
        }
    }

    if unlocated > 0 {
        warn!("dropped {} row(s) without numeric {}/{} from {}", unlocated, LATITUDE, LONGITUDE, location);
    }
    Ok(ReferenceTable::new(records))
}

fn parse_code_lookup(
    profile: &EntityProfile,
    bytes: &[u8],
    location: &str,
) -> Result<ReferenceTable, ReconcileError> {
    let records = read_reference_csv(profile, bytes, location)?
        .into_iter()
        .map(|row| EntityRecord {
            name: row.name,
            code: row.code,
            location: Location::None,
            attributes: row.attributes,
        })
        .collect();
    Ok(ReferenceTable::new(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::EntityKind;

    const ISD_GEOJSON: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": {"ISD": 41, "NAME": "Kent ISD ", "OBJECTID": 7, "REGION": "West"},
                "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}
            },
            {
                "type": "Feature",
                "properties": {"ISD": "82.0", "NAME": "Wayne RESA", "SQKM": 1.5},
                "geometry": null
            },
            {
                "type": "Feature",
                "properties": {"ISD": null, "NAME": "Nowhere"},
                "geometry": null
            }
        ]
    }"#;

    #[test]
    fn boundaries_are_renamed_trimmed_and_normalized() {
        let profile = EntityKind::Isd.profile();
        let table =
            ReferenceTable::parse(&profile, ReferenceDataset::Geographic, ISD_GEOJSON.as_bytes(), "test")
                .unwrap();

        assert_eq!(table.len(), 2);
        let kent = &table.records[0];
        assert_eq!(kent.name, "Kent ISD");
        assert_eq!(kent.code, "00041");
        assert_eq!(kent.attributes.get("REGION").map(String::as_str), Some("West"));
        assert!(!kent.attributes.contains_key("OBJECTID"));
        assert!(matches!(kent.location, Location::Polygon(ref g) if g["type"] == "Polygon"));

        assert_eq!(table.records[1].code, "00082");
        assert!(table.records[1].attributes.is_empty());
    }

    #[test]
    fn located_csv_drops_rows_without_coordinates() {
        let profile = EntityKind::Psa.profile();
        let csv = "PSA,PSA Code,Latitude,Longitude,City\n\
                   Alpha Academy,1234,42.5,-83.1,Detroit\n\
                   Beta Academy,5678,n/a,-83.0,Flint\n";
        let table =
            ReferenceTable::parse(&profile, ReferenceDataset::Geographic, csv.as_bytes(), "test").unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.records[0].code, "01234");
        assert_eq!(
            table.records[0].location,
            Location::Point { latitude: 42.5, longitude: -83.1 }
        );
        assert!(table.records[0].attributes.is_empty());
    }

    #[test]
    fn code_lookup_needs_name_and_code_columns() {
        let profile = EntityKind::District.profile();
        let err = ReferenceTable::parse(
            &profile,
            ReferenceDataset::CodeLookup,
            b"District,County\nAlpena,Alpena\n",
            "codes.csv",
        )
        .unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidReference { .. }));
    }

    #[test]
    fn malformed_reference_codes_are_skipped() {
        let profile = EntityKind::District.profile();
        let table = ReferenceTable::parse(
            &profile,
            ReferenceDataset::CodeLookup,
            b"District,District Code\nAlpena,4010\nPending,N/A\nAtlanta,60010\n",
            "codes.csv",
        )
        .unwrap();

        let codes: Vec<&str> = table.records.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["04010", "60010"]);

        let only_pending = ReferenceTable::parse(
            &profile,
            ReferenceDataset::CodeLookup,
            b"District,District Code\nPending,N/A\n",
            "codes.csv",
        )
        .unwrap();
        assert!(only_pending.is_empty());
    }

    #[test]
    fn features_with_malformed_codes_are_skipped() {
        let profile = EntityKind::Isd.profile();
        let geojson = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"ISD": "TBD", "NAME": "Future ISD"}, "geometry": null},
            {"type": "Feature", "properties": {"ISD": 41, "NAME": "Kent ISD"}, "geometry": null}
        ]}"#;
        let table =
            ReferenceTable::parse(&profile, ReferenceDataset::Geographic, geojson.as_bytes(), "test").unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.records[0].name, "Kent ISD");
    }

    #[test]
    fn duplicate_reference_codes_are_counted() {
        let profile = EntityKind::District.profile();
        let table = ReferenceTable::parse(
            &profile,
            ReferenceDataset::CodeLookup,
            b"District,District Code\nA,1\nB,00001\nC,2\n",
            "codes.csv",
        )
        .unwrap();

        assert_eq!(table.duplicate_codes(), BTreeMap::from([("00001".to_string(), 2)]));
    }

    #[test]
    fn cached_reference_reports_missing_files() {
        let provider = CachedReference::new(
            Path::new("/nonexistent/reference/root"),
            EntityKind::School.profile(),
            ReferenceDataset::Geographic,
        );
        assert!(matches!(
            provider.reference(),
            Err(ReconcileError::ReferenceFileMissing { .. })
        ));
    }

    #[test]
    fn cached_reference_parses_once() {
        let dir = std::env::temp_dir().join(format!("school-map-matcher-ref-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("codes")).unwrap();
        std::fs::write(dir.join("codes/MI_ISD_Codes.csv"), "ISD,ISD Code\nKent ISD,41\n").unwrap();

        let provider = CachedReference::new(&dir, EntityKind::Isd.profile(), ReferenceDataset::CodeLookup);
        let first = provider.reference().unwrap() as *const ReferenceTable;

        // Later edits are not observed by an already-warm cache
        std::fs::write(dir.join("codes/MI_ISD_Codes.csv"), "ISD,ISD Code\n").unwrap();
        let second = provider.reference().unwrap();

        assert_eq!(first, second as *const ReferenceTable);
        assert_eq!(second.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }
}
