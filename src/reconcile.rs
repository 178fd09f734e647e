use crate::error::ReconcileError;
use crate::models::{DuplicatePolicy, EntityRecord, UserRecord};
use crate::normalize::{normalize_code, normalize_name};
use crate::profile::{EntityProfile, LocationKind, COUNT_COLUMN};
use crate::reference::{ReferenceTable, LATITUDE, LONGITUDE};
use crate::table::{Cell, Table};
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Uploaded rows after the column check and normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct UserTable {
    // Upload columns other than name, code and Count, in upload order
    pub columns: Vec<String>,
    pub records: Vec<UserRecord>,
}

/// One reference entity joined with (at most) one uploaded row.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedRow<'r> {
    pub entity: &'r EntityRecord,
    pub count: u8,
    pub user_fields: BTreeMap<String, Cell>,
}

impl CombinedRow<'_> {
    pub fn is_matched(&self) -> bool {
        self.count == 1
    }

    /// User-side value, with 0 standing in for unmatched entities.
    pub fn user_value(&self, column: &str) -> Cell {
        self.user_fields.get(column).cloned().unwrap_or(Cell::Int(0))
    }
}

/// Left join of the reference entities with the uploaded rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Combined<'r> {
    pub user_columns: Vec<String>,
    // Upload columns shadowed by a reference column of the same name
    pub discarded_columns: Vec<String>,
    pub rows: Vec<CombinedRow<'r>>,
    // Canonical codes uploaded more than once, with how many rows carried each
    pub duplicate_user_codes: BTreeMap<String, usize>,
}

impl Combined<'_> {
    pub fn codes(&self) -> HashSet<&str> {
        self.rows.iter().map(|row| row.entity.code.as_str()).collect()
    }

    pub fn unmatched_reference_count(&self) -> usize {
        self.rows.iter().filter(|row| row.count == 0).count()
    }
}

/// Name and code of one reported entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Reference entities that received an uploaded row.
    pub matched: Vec<ListEntry>,
    /// Uploaded rows whose code is not in the reference dataset at all.
    pub unmatched_from_user: Vec<ListEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapMakerRun<'r> {
    pub combined: Combined<'r>,
    pub partition: Partition,
    pub uploaded_rows: usize,
}

/// An uploaded row after the name lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct NameMatchRow {
    pub cells: Vec<Cell>,
    pub name: String,
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NameMatchOutcome {
    // Upload headers, with the code column appended when it was missing
    pub headers: Vec<String>,
    pub code_index: usize,
    pub rows: Vec<NameMatchRow>,
}

impl NameMatchOutcome {
    pub fn matched(&self) -> impl Iterator<Item = &NameMatchRow> {
        self.rows.iter().filter(|row| row.code.is_some())
    }

    pub fn unmatched(&self) -> impl Iterator<Item = &NameMatchRow> {
        self.rows.iter().filter(|row| row.code.is_none())
    }

    /// Row cells with the looked-up code written into the code column.
    pub fn output_cells(&self, row: &NameMatchRow) -> Vec<Cell> {
        let mut cells = row.cells.clone();
        cells.resize(self.headers.len(), Cell::Empty);
        cells[self.code_index] = match &row.code {
            Some(code) => Cell::Text(code.clone()),
            None => Cell::Empty,
        };
        cells
    }
}

pub struct Reconciler<'a> {
    pub profile: &'a EntityProfile,
    pub duplicate_policy: DuplicatePolicy,
}

impl<'a> Reconciler<'a> {
    pub fn new(profile: &'a EntityProfile, duplicate_policy: DuplicatePolicy) -> Self {
        Self {
            profile,
            duplicate_policy,
        }
    }

    /// Map maker pipeline: column check, normalization, join and partition.
    pub fn run<'r>(
        &self,
        reference: &'r ReferenceTable,
        upload: &Table,
    ) -> Result<MapMakerRun<'r>, ReconcileError> {
        let user = self.prepare_user_records(upload)?;
        let combined = self.join_by_code(reference, &user);
        let partition = self.partition(&combined, &user);

        Ok(MapMakerRun {
            combined,
            partition,
            uploaded_rows: user.records.len(),
        })
    }

    /// Check the required columns, trim names, normalize codes and mark every row present.
    pub fn prepare_user_records(&self, upload: &Table) -> Result<UserTable, ReconcileError> {
        let code_column = self.profile.code_column();
        upload.require_columns(&[self.profile.name_column(), code_column.as_str()])?;

        let name_index = upload.column_index(self.profile.name_column()).unwrap_or_default();
        let code_index = upload.column_index(&code_column).unwrap_or_default();

        let extra_columns: Vec<(usize, String)> = upload
            .headers
            .iter()
            .enumerate()
            .filter(|(i, header)| *i != name_index && *i != code_index && header.as_str() != COUNT_COLUMN)
            .map(|(i, header)| (i, header.clone()))
            .collect();

        if upload.is_empty() {
            warn!("the uploaded {} file has no data rows", self.profile.label);
        }

        let mut records = Vec::with_capacity(upload.len());
        for (index, row) in upload.rows.iter().enumerate() {
            let raw_code = &row[code_index];
            let code = if raw_code.is_blank() {
                None
            } else {
                Some(
                    normalize_code(raw_code, self.profile.code_width)
                        .map_err(|err| err.at_row(upload.row_number(index)))?,
                )
            };

            records.push(UserRecord {
                name: normalize_name(&row[name_index].to_string()),
                code,
                extra: extra_columns
                    .iter()
                    .map(|(i, header)| (header.clone(), row[*i].clone()))
                    .collect(),
                present_count: 1,
            });
        }

        Ok(UserTable {
            columns: extra_columns.into_iter().map(|(_, header)| header).collect(),
            records,
        })
    }

    /// Left join with the reference as the driving side. Every reference record appears at
    /// least once; reference columns win over same-named upload columns.
    pub fn join_by_code<'r>(&self, reference: &'r ReferenceTable, user: &UserTable) -> Combined<'r> {
        let reserved = self.reserved_columns(reference);
        let (user_columns, discarded_columns): (Vec<String>, Vec<String>) =
            user.columns.iter().cloned().partition(|column| !reserved.contains(column.as_str()));
        if !discarded_columns.is_empty() {
            debug!("upload columns shadowed by reference data: {}", discarded_columns.join(", "));
        }

        // Group uploaded rows by canonical code, keeping upload order
        let mut by_code: HashMap<&str, Vec<&UserRecord>> = HashMap::new();
        for record in &user.records {
            if let Some(code) = record.code.as_deref() {
                by_code.entry(code).or_default().push(record);
            }
        }

        let duplicate_user_codes: BTreeMap<String, usize> = by_code
            .iter()
            .filter(|(_, rows)| rows.len() > 1)
            .map(|(code, rows)| (code.to_string(), rows.len()))
            .collect();
        if !duplicate_user_codes.is_empty() {
            warn!(
                "{} {} code(s) appear on more than one uploaded row ({:?} policy): {}",
                duplicate_user_codes.len(),
                self.profile.label,
                self.duplicate_policy,
                duplicate_user_codes.keys().cloned().collect::<Vec<_>>().join(", ")
            );
        }
        if self.duplicate_policy == DuplicatePolicy::KeepFirst {
            for rows in by_code.values_mut() {
                rows.truncate(1);
            }
        }

        let mut rows = Vec::with_capacity(reference.len());
        for entity in &reference.records {
            match by_code.get(entity.code.as_str()) {
                Some(matches) => {
                    for user_row in matches {
                        rows.push(CombinedRow {
                            entity,
                            count: user_row.present_count,
                            user_fields: user_columns
                                .iter()
                                .filter_map(|column| {
                                    user_row.extra.get(column).map(|cell| (column.clone(), cell.clone()))
                                })
                                .collect(),
                        });
                    }
                }
                None => rows.push(CombinedRow {
                    entity,
                    count: 0,
                    user_fields: BTreeMap::new(),
                }),
            }
        }

        Combined {
            user_columns,
            discarded_columns,
            rows,
            duplicate_user_codes,
        }
    }

    /// Split into matched reference entities and uploaded rows unknown to the reference.
    ///
    /// The two lists come from different tables and are not complements of each other.
    pub fn partition(&self, combined: &Combined<'_>, user: &UserTable) -> Partition {
        let matched = combined
            .rows
            .iter()
            .filter(|row| row.is_matched())
            .map(|row| ListEntry {
                name: row.entity.name.clone(),
                code: row.entity.code.clone(),
            })
            .collect();

        let known_codes = combined.codes();
        let unmatched_from_user = user
            .records
            .iter()
            .filter(|record| match record.code.as_deref() {
                Some(code) => !known_codes.contains(code),
                None => true,
            })
            .map(|record| ListEntry {
                name: record.name.clone(),
                code: record.code_or_blank().to_string(),
            })
            .collect();

        Partition {
            matched,
            unmatched_from_user,
        }
    }

    /// Code matchmaker: look up each uploaded name (exact, case-sensitive) and take the
    /// code of the first reference record with that name.
    pub fn match_by_exact_name(
        &self,
        reference: &ReferenceTable,
        upload: &Table,
    ) -> Result<NameMatchOutcome, ReconcileError> {
        upload.require_columns(&[self.profile.name_column()])?;
        let name_index = upload.column_index(self.profile.name_column()).unwrap_or_default();

        let mut first_code_by_name: HashMap<&str, &str> = HashMap::new();
        for record in &reference.records {
            first_code_by_name
                .entry(record.name.as_str())
                .or_insert(record.code.as_str());
        }

        let code_column = self.profile.code_column();
        let mut headers = upload.headers.clone();
        let code_index = match upload.column_index(&code_column) {
            Some(index) => index,
            None => {
                headers.push(code_column);
                headers.len() - 1
            }
        };

        let rows = upload
            .rows
            .iter()
            .map(|row| {
                let name = normalize_name(&row[name_index].to_string());
                let code = first_code_by_name.get(name.as_str()).map(|code| code.to_string());

                let mut cells = row.clone();
                cells[name_index] = Cell::Text(name.clone());
                NameMatchRow { cells, name, code }
            })
            .collect();

        Ok(NameMatchOutcome {
            headers,
            code_index,
            rows,
        })
    }

    fn reserved_columns<'r>(&self, reference: &'r ReferenceTable) -> HashSet<&'r str> {
        let mut reserved: HashSet<&str> = reference
            .records
            .iter()
            .flat_map(|record| record.attributes.keys().map(String::as_str))
            .collect();
        reserved.insert(self.profile.name_column());
        reserved.insert(COUNT_COLUMN);
        if self.profile.location_kind == LocationKind::Point {
            reserved.insert(LATITUDE);
            reserved.insert(LONGITUDE);
        }
        reserved
    }
}

/// Reference records whose name starts with `prefix` (case-sensitive), in reference order.
pub fn search_by_prefix<'r>(reference: &'r ReferenceTable, prefix: &str) -> Vec<&'r EntityRecord> {
    reference
        .records
        .iter()
        .filter(|record| record.name.starts_with(prefix))
        .collect()
}
