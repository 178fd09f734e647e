use crate::error::ReconcileError;
use calamine::{open_workbook_auto, Data, Reader};
use log::debug;
use std::fmt;
use std::io::Read;
use std::path::Path;

/// A single spreadsheet cell, whichever parser produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl Cell {
    /// Empty cells and whitespace-only text.
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    fn from_csv_field(field: &str) -> Self {
        if field.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(field.to_string())
        }
    }

    fn from_excel(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::Int(value) => Cell::Int(*value),
            Data::Float(value) => Cell::Float(*value),
            Data::String(text) => Cell::from_csv_field(text),
            Data::Bool(value) => Cell::Bool(*value),
            other => Cell::Text(other.to_string()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Int(value) => write!(f, "{value}"),
            Cell::Float(value) => write!(f, "{value}"),
            Cell::Text(text) => f.write_str(text),
            Cell::Bool(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Excel,
}

impl FileFormat {
    pub fn detect(path: &Path) -> Result<Self, ReconcileError> {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        match extension.as_str() {
            "csv" => Ok(FileFormat::Csv),
            "xlsx" | "xlsm" | "xls" => Ok(FileFormat::Excel),
            _ => Err(ReconcileError::UnsupportedFileFormat { extension }),
        }
    }
}

/// Uniform tabular view over an uploaded or reference file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    // 1-based data row (below the header) each entry of `rows` came from
    row_numbers: Vec<usize>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        let row_numbers = (1..=rows.len()).collect();
        Self {
            headers,
            rows,
            row_numbers,
        }
    }

    /// Data row number of `rows[index]` as the user sees it in the source file.
    pub fn row_number(&self, index: usize) -> usize {
        self.row_numbers.get(index).copied().unwrap_or(index + 1)
    }

    /// Parse a CSV stream. The first record is the header row.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, ReconcileError> {
        let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

        let mut headers: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
        if let Some(first) = headers.first_mut() {
            // Excel's "CSV UTF-8" export prefixes a byte-order mark
            *first = first.trim_start_matches('\u{feff}').to_string();
        }

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            let mut row: Vec<Cell> = record.iter().map(Cell::from_csv_field).collect();
            row.resize(headers.len(), Cell::Empty);
            rows.push(row);
        }

        Ok(Self::new(headers, rows))
    }

    /// Read the first worksheet of a workbook. The first row is the header row.
    pub fn from_excel_path(path: &Path) -> Result<Self, ReconcileError> {
        let mut workbook = open_workbook_auto(path)?;
        let range = match workbook.worksheet_range_at(0) {
            Some(range) => range?,
            None => return Ok(Self::default()),
        };

        let mut sheet_rows = range.rows();
        let headers: Vec<String> = match sheet_rows.next() {
            Some(header_row) => header_row.iter().map(|cell| cell.to_string()).collect(),
            None => return Ok(Self::default()),
        };

        // Blank sheet rows are skipped but still counted
        let mut rows = Vec::new();
        let mut row_numbers = Vec::new();
        for (index, row) in sheet_rows.enumerate() {
            if row.iter().all(|cell| matches!(cell, Data::Empty)) {
                continue;
            }
            let mut cells: Vec<Cell> = row.iter().map(Cell::from_excel).collect();
            cells.resize(headers.len(), Cell::Empty);
            rows.push(cells);
            row_numbers.push(index + 1);
        }

        Ok(Self {
            headers,
            rows,
            row_numbers,
        })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    /// Fail with every column from `required` that the header row lacks.
    pub fn require_columns(&self, required: &[&str]) -> Result<(), ReconcileError> {
        let missing: Vec<String> = required
            .iter()
            .filter(|column| self.column_index(column).is_none())
            .map(|column| column.to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ReconcileError::MissingColumns {
                required: required.iter().map(|c| c.to_string()).collect(),
                missing,
            })
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Pick a parser from the file extension and load the file into a [`Table`].
pub fn read_table(path: &Path) -> Result<Table, ReconcileError> {
    let format = FileFormat::detect(path)?;
    debug!("reading {} as {:?}", path.display(), format);

    match format {
        FileFormat::Csv => {
            let file = std::fs::File::open(path)?;
            Table::from_csv_reader(file)
        }
        FileFormat::Excel => Table::from_excel_path(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DuplicatePolicy;
    use crate::normalize::normalize_code;
    use crate::profile::EntityKind;
    use crate::reconcile::Reconciler;
    use rust_xlsxwriter::Workbook;
    use std::path::PathBuf;

    // Header, a numeric code, a blank row, then a bad code on sheet data row 3
    fn write_isd_workbook(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}.xlsx", name, std::process::id()));
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "ISD").unwrap();
        sheet.write_string(0, 1, "ISD Code").unwrap();
        sheet.write_string(1, 0, "Kent ISD").unwrap();
        sheet.write_number(1, 1, 41).unwrap();
        sheet.write_string(3, 0, "Bad ISD").unwrap();
        sheet.write_string(3, 1, "12b").unwrap();
        workbook.save(&path).unwrap();
        path
    }

    #[test]
    fn detects_formats_case_insensitively() {
        assert_eq!(FileFormat::detect(Path::new("ISD_Data.CSV")).unwrap(), FileFormat::Csv);
        assert_eq!(FileFormat::detect(Path::new("data.xlsx")).unwrap(), FileFormat::Excel);

        let err = FileFormat::detect(Path::new("notes.pdf")).unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::UnsupportedFileFormat { ref extension } if extension == "pdf"
        ));
        assert!(FileFormat::detect(Path::new("no_extension")).is_err());
    }

    #[test]
    fn excel_numbers_arrive_as_floats_and_blank_rows_are_skipped() {
        let path = write_isd_workbook("school-map-matcher-read");
        let table = read_table(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(table.headers, vec!["ISD", "ISD Code"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0], vec![Cell::Text("Kent ISD".into()), Cell::Float(41.0)]);
        assert_eq!(normalize_code(&table.rows[0][1], 5).unwrap(), "00041");
        assert_eq!(table.row_number(0), 1);
        assert_eq!(table.row_number(1), 3);
    }

    #[test]
    fn excel_code_errors_name_the_sheet_row() {
        let path = write_isd_workbook("school-map-matcher-rows");
        let table = read_table(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let profile = EntityKind::Isd.profile();
        let result = Reconciler::new(&profile, DuplicatePolicy::Multiply)
            .prepare_user_records(&table);

        match result {
            Err(ReconcileError::MalformedCode { row, raw, .. }) => {
                assert_eq!(row, Some(3));
                assert_eq!(raw, "12b");
            }
            other => panic!("expected MalformedCode, got {other:?}"),
        }
    }

    #[test]
    fn csv_cells_are_text_and_blanks_are_empty() {
        let data = "\u{feff}ISD,ISD Code,Notes\nKent ISD,41,\nWayne RESA,82.0,big\nShort Row,13\n";
        let table = Table::from_csv_reader(data.as_bytes()).unwrap();

        assert_eq!(table.headers, vec!["ISD", "ISD Code", "Notes"]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.rows[0][1], Cell::Text("41".into()));
        assert_eq!(table.rows[0][2], Cell::Empty);
        assert_eq!(table.rows[1][1], Cell::Text("82.0".into()));
        assert_eq!(table.rows[2][2], Cell::Empty);
    }

    #[test]
    fn require_columns_lists_everything_missing() {
        let table = Table::new(vec!["Name".into()], Vec::new());
        let err = table.require_columns(&["School", "School Code"]).unwrap_err();

        match err {
            ReconcileError::MissingColumns { missing, .. } => {
                assert_eq!(missing, vec!["School".to_string(), "School Code".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn blank_detection() {
        assert!(Cell::Empty.is_blank());
        assert!(Cell::Text("  ".into()).is_blank());
        assert!(!Cell::Int(0).is_blank());
        assert_eq!(Cell::Float(41.0).to_string(), "41");
    }
}
