// Error taxonomy for a report run
//
// Only structural problems are errors. Row-level problems (malformed rows,
// duplicate barcodes, unknown barcodes) are reported as values and never
// abort a run.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for visit-report operations
pub type Result<T> = std::result::Result<T, ReportError>;

#[derive(Error, Debug)]
pub enum ReportError {
    /// Input file does not exist or cannot be opened
    #[error("input file not found: {path}")]
    InputNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Header row lacks a column the loader needs
    #[error("{path}: missing required column '{column}'")]
    MissingColumn { path: PathBuf, column: &'static str },

    /// CSV decoding/encoding failure (unreadable header, bad UTF-8, ...)
    #[error("{path}: CSV error: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{path}: IO error: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReportError {
    /// True when the run failed because of its inputs rather than the machine.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ReportError::InputNotFound { .. } | ReportError::MissingColumn { .. }
        )
    }
}
