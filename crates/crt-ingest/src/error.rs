//! Error types for reading source extracts.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while discovering or reading source files.
#[derive(Debug, Error)]
pub enum IngestError {
    // === File System Errors ===
    /// Directory not found or not readable.
    #[error("directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    /// Failed to read directory entries.
    #[error("failed to read directory {path}: {source}")]
    DirectoryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// CSV file not found.
    #[error("CSV file not found: {path}")]
    FileNotFound { path: PathBuf },

    /// Failed to open or read a file.
    #[error("failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // === File Format Errors ===
    /// File has no header row.
    #[error("CSV file is empty: {path}")]
    EmptyFile { path: PathBuf },

    /// Header row matches none of the declared versions.
    #[error(
        "{path} does not match any {schema} header version (closest {closest}: missing [{}], unexpected [{}])",
        join(.missing),
        join(.unexpected)
    )]
    HeaderMismatch {
        path: PathBuf,
        schema: String,
        closest: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    /// A schema declaration is unusable.
    #[error("invalid schema {schema}: {reason}")]
    InvalidSchema { schema: String, reason: String },

    // === Row Errors ===
    /// A data row has the wrong number of fields.
    #[error("{path} row {row}: expected {expected} fields, found {actual}")]
    RowShape {
        path: PathBuf,
        row: u64,
        expected: usize,
        actual: usize,
    },

    /// A data row could not be parsed (e.g. invalid UTF-8).
    #[error("{path} row {row}: {source}")]
    RowParse {
        path: PathBuf,
        row: u64,
        #[source]
        source: csv::Error,
    },

    /// The CSV parser failed.
    #[error("failed to parse CSV {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl IngestError {
    /// True when the file as a whole cannot be read with its schema.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyFile { .. } | Self::HeaderMismatch { .. } | Self::InvalidSchema { .. }
        )
    }

    /// True when only one data row is affected.
    pub fn is_row_error(&self) -> bool {
        matches!(self, Self::RowShape { .. } | Self::RowParse { .. })
    }
}

fn join(columns: &[String]) -> String {
    columns.join(", ")
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;
