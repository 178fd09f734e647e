use crate::error::ReconcileError;
use crate::profile::EntityProfile;
use crate::reconcile::{ListEntry, MapMakerRun, NameMatchOutcome};
use crate::table::Cell;
use csv::Writer;
use rust_xlsxwriter::{Workbook, XlsxError};
use std::fs;
use std::path::{Path, PathBuf};

/// A download produced by one run, held in memory until the whole run succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Xlsx,
}

impl TableFormat {
    pub fn extension(self) -> &'static str {
        match self {
            TableFormat::Csv => "csv",
            TableFormat::Xlsx => "xlsx",
        }
    }
}

/// `{Label},{Label} Code` list, UTF-8 with a header row and no index column.
pub fn write_code_list(profile: &EntityProfile, entries: &[ListEntry]) -> Result<Vec<u8>, ReconcileError> {
    let mut writer = Writer::from_writer(Vec::new());
    writer.write_record([profile.name_column(), profile.code_column().as_str()])?;
    for entry in entries {
        writer.write_record([entry.name.as_str(), entry.code.as_str()])?;
    }
    into_bytes(writer)
}

/// The uploaded table with its code column filled in by the name lookup.
pub fn write_updated_table(outcome: &NameMatchOutcome, format: TableFormat) -> Result<Vec<u8>, ReconcileError> {
    match format {
        TableFormat::Csv => {
            let mut writer = Writer::from_writer(Vec::new());
            writer.write_record(&outcome.headers)?;
            for row in &outcome.rows {
                writer.write_record(outcome.output_cells(row).iter().map(Cell::to_string))?;
            }
            into_bytes(writer)
        }
        TableFormat::Xlsx => {
            let mut workbook = Workbook::new();
            let worksheet = workbook.add_worksheet();

            for (col, header) in outcome.headers.iter().enumerate() {
                worksheet.write_string(0, column_number(col)?, header)?;
            }
            for (index, row) in outcome.rows.iter().enumerate() {
                let row_number = u32::try_from(index + 1).map_err(|_| XlsxError::RowColumnLimitError)?;
                for (col, cell) in outcome.output_cells(row).iter().enumerate() {
                    let col = column_number(col)?;
                    match cell {
                        Cell::Empty => {}
                        Cell::Int(value) => {
                            worksheet.write_number(row_number, col, *value as f64)?;
                        }
                        Cell::Float(value) => {
                            worksheet.write_number(row_number, col, *value)?;
                        }
                        Cell::Bool(value) => {
                            worksheet.write_boolean(row_number, col, *value)?;
                        }
                        // Codes stay text so their leading zeros survive
                        Cell::Text(text) => {
                            worksheet.write_string(row_number, col, text)?;
                        }
                    }
                }
            }

            Ok(workbook.save_to_buffer()?)
        }
    }
}

/// Two-row sample upload showing the columns the map maker needs.
pub fn write_example(profile: &EntityProfile) -> Result<Vec<u8>, ReconcileError> {
    let mut writer = Writer::from_writer(Vec::new());
    writer.write_record([profile.name_column(), profile.code_column().as_str()])?;
    writer.write_record([format!("Example {} One", profile.label), "123".to_string()])?;
    writer.write_record([format!("Example {} Two", profile.label), "04567".to_string()])?;
    into_bytes(writer)
}

/// Write every artifact under a temporary name, then rename them all into place.
///
/// A failed write removes the temporary files so no artifact of the run is left behind.
pub fn write_artifacts(output_dir: &Path, artifacts: &[Artifact]) -> Result<Vec<PathBuf>, ReconcileError> {
    fs::create_dir_all(output_dir)?;

    let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let path = output_dir.join(&artifact.file_name);
        let partial = partial_path(&path);
        if let Err(err) = fs::write(&partial, &artifact.bytes) {
            for (partial, _) in &staged {
                fs::remove_file(partial).ok();
            }
            return Err(err.into());
        }
        staged.push((partial, path));
    }

    let mut written = Vec::with_capacity(staged.len());
    for (partial, path) in staged {
        fs::rename(&partial, &path)?;
        written.push(path);
    }
    Ok(written)
}

fn partial_path(path: &Path) -> PathBuf {
    let file_name = path.file_name().map(|name| name.to_string_lossy()).unwrap_or_default();
    path.with_file_name(format!(".{file_name}.partial"))
}

/// Console summary for a map maker run.
pub fn map_summary(profile: &EntityProfile, run: &MapMakerRun<'_>) -> String {
    let label = profile.label;
    let mut content = String::new();

    content.push_str(&format!("📥 Uploaded rows: {}\n", run.uploaded_rows));

    if run.partition.matched.is_empty() {
        content.push_str(&format!("❌ No {}s\n", label));
    } else {
        content.push_str(&format!("✅ {}s Included:\n", label));
        for entry in &run.partition.matched {
            content.push_str(&format!("   - {} ({})\n", entry.name, entry.code));
        }
        content.push_str(&format!("Total number of {}s: {}\n", label, run.partition.matched.len()));
    }
    content.push('\n');

    if run.partition.unmatched_from_user.is_empty() {
        content.push_str(&format!(
            "🎯 All {}s from your spreadsheet matched with the reference dataset.\n",
            label
        ));
    } else {
        content.push_str(&format!("⚠️  {}s unmatched:\n", label));
        for entry in &run.partition.unmatched_from_user {
            let code = if entry.code.is_empty() { "no code" } else { entry.code.as_str() };
            content.push_str(&format!("   - {} ({})\n", entry.name, code));
        }
        content.push_str(&format!(
            "Total number of unmatched {}s: {}\n",
            label,
            run.partition.unmatched_from_user.len()
        ));
    }

    let duplicates = &run.combined.duplicate_user_codes;
    if !duplicates.is_empty() {
        let extra_rows: usize = duplicates.values().map(|count| count - 1).sum();
        content.push_str(&format!(
            "\n🔄 {} {} code(s) appear on more than one row ({} extra row(s)): {}\n",
            duplicates.len(),
            label,
            extra_rows,
            duplicates.keys().cloned().collect::<Vec<_>>().join(", ")
        ));
    }

    content
}

/// Console summary for a code matchmaker run.
pub fn name_match_summary(outcome: &NameMatchOutcome) -> String {
    let mut content = String::new();
    content.push_str(&format!("✅ Total number of matched rows: {}\n", outcome.matched().count()));

    let unmatched: Vec<&str> = outcome.unmatched().map(|row| row.name.as_str()).collect();
    content.push_str(&format!("⚠️  Total number of unmatched rows: {}\n", unmatched.len()));
    for name in unmatched {
        content.push_str(&format!("   - {}\n", name));
    }
    content
}

fn column_number(col: usize) -> Result<u16, XlsxError> {
    u16::try_from(col).map_err(|_| XlsxError::RowColumnLimitError)
}

fn into_bytes(writer: Writer<Vec<u8>>) -> Result<Vec<u8>, ReconcileError> {
    writer
        .into_inner()
        .map_err(|err| ReconcileError::Io(std::io::Error::new(err.error().kind(), err.error().to_string())))
}
