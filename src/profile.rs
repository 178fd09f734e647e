use crate::normalize::DEFAULT_CODE_WIDTH;
use std::fmt;
use std::str::FromStr;

/// Name of the marker column set to 1 for every uploaded row.
pub const COUNT_COLUMN: &str = "Count";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    District,
    Isd,
    Psa,
    School,
}

/// How reference entities are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    /// Boundary polygons from a GeoJSON feature collection.
    Polygon,
    /// Latitude/Longitude pairs from a CSV.
    Point,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::District,
        EntityKind::Isd,
        EntityKind::Psa,
        EntityKind::School,
    ];

    pub fn key(self) -> &'static str {
        match self {
            EntityKind::District => "district",
            EntityKind::Isd => "isd",
            EntityKind::Psa => "psa",
            EntityKind::School => "school",
        }
    }

    pub fn profile(self) -> EntityProfile {
        match self {
            EntityKind::District => EntityProfile {
                kind: self,
                label: "District",
                code_width: DEFAULT_CODE_WIDTH,
                location_kind: LocationKind::Polygon,
                reference_file: "geojson/School_Districts.geojson",
                code_lookup_file: "codes/MI_District_Codes.csv",
                renames: &[("DCODE", "District Code"), ("NAME", "District")],
                dropped_columns: &[
                    "OBJECTID",
                    "FIPSCODE",
                    "FIPSNUM",
                    "LABEL",
                    "TYPE",
                    "SQKM",
                    "SQMILES",
                    "ACRES",
                    "VER",
                    "LAYOUT",
                    "PENINSULA",
                    "ShapeSTArea",
                    "ShapeSTLength",
                    "ISD",
                ],
            },
            EntityKind::Isd => EntityProfile {
                kind: self,
                label: "ISD",
                code_width: DEFAULT_CODE_WIDTH,
                location_kind: LocationKind::Polygon,
                reference_file: "geojson/Intermediate_School_Districts.geojson",
                code_lookup_file: "codes/MI_ISD_Codes.csv",
                renames: &[("ISD", "ISD Code"), ("NAME", "ISD")],
                dropped_columns: &[
                    "OBJECTID",
                    "LABEL",
                    "TYPE",
                    "SQKM",
                    "SQMILES",
                    "ACRES",
                    "VER",
                    "LAYOUT",
                    "PENINSULA",
                    "ISDCode",
                    "ISD1",
                    "ShapeSTArea",
                    "ShapeSTLength",
                ],
            },
            EntityKind::Psa => EntityProfile {
                kind: self,
                label: "PSA",
                code_width: DEFAULT_CODE_WIDTH,
                location_kind: LocationKind::Point,
                reference_file: "geojson/PSA_geojson.csv",
                code_lookup_file: "codes/MI_PSA_Codes.csv",
                renames: &[],
                dropped_columns: &[
                    "Street",
                    "City",
                    "State",
                    "Zip",
                    "Address_Unformatted",
                    "confidence",
                    "confidence_city_level",
                    "confidence_street_level",
                ],
            },
            EntityKind::School => EntityProfile {
                kind: self,
                label: "School",
                code_width: DEFAULT_CODE_WIDTH,
                location_kind: LocationKind::Point,
                reference_file: "geojson/School_geojson.csv",
                code_lookup_file: "codes/MI_School_Codes.csv",
                renames: &[],
                dropped_columns: &[
                    "Address",
                    "City",
                    "ZIP Code",
                    "Grade Levels",
                    "Locale",
                    "District Code",
                    "District",
                    "ISD Code",
                    "ISD Name",
                ],
            },
        }
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.key().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown entity kind {s:?}; expected district, isd, psa or school"))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Everything that differs between the district, ISD, PSA and school tools.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityProfile {
    pub kind: EntityKind,
    pub label: &'static str,
    pub code_width: usize,
    pub location_kind: LocationKind,
    pub reference_file: &'static str,
    pub code_lookup_file: &'static str,
    // (source property, canonical column)
    pub renames: &'static [(&'static str, &'static str)],
    pub dropped_columns: &'static [&'static str],
}

impl EntityProfile {
    #[must_use]
    pub fn with_code_width(mut self, code_width: usize) -> Self {
        self.code_width = code_width;
        self
    }

    pub fn name_column(&self) -> &'static str {
        self.label
    }

    pub fn code_column(&self) -> String {
        format!("{} Code", self.label)
    }

    /// Canonical column name for a raw reference column.
    pub fn canonical_column<'a>(&self, raw: &'a str) -> &'a str {
        self.renames
            .iter()
            .find(|(from, _)| *from == raw)
            .map(|(_, to)| *to)
            .unwrap_or(raw)
    }

    pub fn is_dropped(&self, column: &str) -> bool {
        self.dropped_columns.contains(&column)
    }

    pub fn verify_list_file(&self) -> String {
        format!("{}_List_to_Verify.csv", self.label)
    }

    pub fn unmatched_list_file(&self) -> String {
        format!("Unmatched_{}_List.csv", self.label)
    }

    pub fn map_file(&self) -> String {
        format!("{}_Map.html", self.label)
    }

    pub fn updated_file(&self, extension: &str) -> String {
        format!("{}_updated_file.{extension}", self.label)
    }

    pub fn example_file(&self) -> String {
        format!("{}_Data.csv", self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_from_cli_spelling() {
        assert_eq!("ISD".parse::<EntityKind>().unwrap(), EntityKind::Isd);
        assert_eq!(" school ".parse::<EntityKind>().unwrap(), EntityKind::School);
        assert!("charter".parse::<EntityKind>().is_err());
    }

    #[test]
    fn columns_derive_from_the_label() {
        let profile = EntityKind::Psa.profile();
        assert_eq!(profile.name_column(), "PSA");
        assert_eq!(profile.code_column(), "PSA Code");
        assert_eq!(profile.verify_list_file(), "PSA_List_to_Verify.csv");
        assert_eq!(profile.unmatched_list_file(), "Unmatched_PSA_List.csv");
        assert_eq!(profile.map_file(), "PSA_Map.html");
    }

    #[test]
    fn isd_renames_swap_name_and_code() {
        let profile = EntityKind::Isd.profile();
        assert_eq!(profile.canonical_column("ISD"), "ISD Code");
        assert_eq!(profile.canonical_column("NAME"), "ISD");
        assert_eq!(profile.canonical_column("Other"), "Other");
        assert!(profile.is_dropped("ShapeSTArea"));
    }

    #[test]
    fn every_kind_defaults_to_five_digit_codes() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.profile().code_width, DEFAULT_CODE_WIDTH);
        }
        assert_eq!(EntityKind::School.profile().with_code_width(8).code_width, 8);
    }
}
