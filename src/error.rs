use thiserror::Error as ThisError;

///
/// ReconcileError
///
/// Every variant is terminal for the current upload. Nothing is written
/// once one of these is raised.
///

#[derive(Debug, ThisError)]
pub enum ReconcileError {
    #[error("malformed code {raw:?}{}: {reason}", row_suffix(.row))]
    MalformedCode {
        raw: String,
        row: Option<usize>,
        reason: String,
    },

    #[error("the uploaded file must contain {} column(s); missing: {}", quote_all(.required), quote_all(.missing))]
    MissingColumns {
        required: Vec<String>,
        missing: Vec<String>,
    },

    #[error("unsupported file format {extension:?}; please upload a CSV or XLSX file")]
    UnsupportedFileFormat { extension: String },

    #[error("reference dataset not found: {location}")]
    ReferenceFileMissing { location: String },

    #[error("reference dataset {location} is invalid: {reason}")]
    InvalidReference { location: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Excel(#[from] calamine::Error),

    #[error(transparent)]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

impl ReconcileError {
    pub fn malformed_code(raw: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedCode {
            raw: raw.into(),
            row: None,
            reason: reason.into(),
        }
    }

    /// Attach the 1-based data row number to a code error.
    #[must_use]
    pub fn at_row(self, row: usize) -> Self {
        match self {
            Self::MalformedCode { raw, reason, .. } => Self::MalformedCode {
                raw,
                row: Some(row),
                reason,
            },
            other => other,
        }
    }
}

fn row_suffix(row: &Option<usize>) -> String {
    row.map(|r| format!(" in row {r}")).unwrap_or_default()
}

fn quote_all(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| format!("'{c}'"))
        .collect::<Vec<_>>()
        .join(" and ")
}
