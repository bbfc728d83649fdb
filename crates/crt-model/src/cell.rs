//! Provenance-bearing source cells.
//!
//! A [`Cell`] is one raw value read from a vendor extract together with the
//! file, row and column it came from. Cells are immutable and handed out as
//! `Arc<Cell>`, so every record and audit trail that derives a value from the
//! same source position shares one allocation.
//!
//! Vendor files use two conventions for "no value": a column that the file
//! version does not declare at all (absent) and a declared column whose value
//! is blank (present but empty). Both are kept distinct here because record
//! deletion rules depend on the difference.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{ModelError, Result};
use crate::provenance::SourceRef;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%b-%Y", "%Y%m%d"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%b-%Y %H:%M:%S",
];

/// A source file shared by all cells read from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceFile {
    path: PathBuf,
    version: Box<str>,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, version: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            version: version.into().into_boxed_str(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Format version tag of the header set the file was read with.
    pub fn version(&self) -> &str {
        &self.version
    }
}

/// One raw value with its source coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cell {
    file: Arc<SourceFile>,
    row: u64,
    column: Arc<str>,
    value: Option<Box<str>>,
}

impl Cell {
    /// Creates a cell for a declared column. An empty string is kept as
    /// "present but empty".
    pub fn new(
        file: Arc<SourceFile>,
        row: u64,
        column: Arc<str>,
        value: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            file,
            row,
            column,
            value: Some(value.into().into_boxed_str()),
        })
    }

    /// Creates a cell for a column the file version does not declare.
    pub fn absent(file: Arc<SourceFile>, row: u64, column: Arc<str>) -> Arc<Self> {
        Arc::new(Self {
            file,
            row,
            column,
            value: None,
        })
    }

    pub fn file(&self) -> &SourceFile {
        &self.file
    }

    pub fn row(&self) -> u64 {
        self.row
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// True when the column is not part of the file at all.
    pub fn is_absent(&self) -> bool {
        self.value.is_none()
    }

    /// True when the column is declared but the value is blank.
    pub fn is_empty(&self) -> bool {
        self.value.as_deref().is_some_and(|v| v.trim().is_empty())
    }

    /// True when the column is declared, whether blank or not.
    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    /// True when there is a non-blank value.
    pub fn has_value(&self) -> bool {
        self.value.as_deref().is_some_and(|v| !v.trim().is_empty())
    }

    /// Raw value, `None` when absent.
    pub fn raw(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Trimmed string value. Absent cells read as the empty string.
    pub fn as_str(&self) -> &str {
        self.value.as_deref().map(str::trim).unwrap_or_default()
    }

    pub fn as_i64(&self) -> Result<i64> {
        self.as_str()
            .parse()
            .map_err(|_| self.format_error("integer"))
    }

    pub fn as_f64(&self) -> Result<f64> {
        let value: f64 = self
            .as_str()
            .parse()
            .map_err(|_| self.format_error("number"))?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(self.format_error("number"))
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self.as_str().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Ok(true),
            "false" | "no" | "n" | "0" => Ok(false),
            _ => Err(self.format_error("boolean")),
        }
    }

    pub fn as_date(&self) -> Result<NaiveDate> {
        let text = self.as_str();
        DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
            .ok_or_else(|| self.format_error("date"))
    }

    pub fn as_date_with_format(&self, format: &str) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(self.as_str(), format).map_err(|_| self.format_error("date"))
    }

    pub fn as_datetime(&self) -> Result<NaiveDateTime> {
        let text = self.as_str();
        DATETIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
            .ok_or_else(|| self.format_error("datetime"))
    }

    pub fn opt_str(&self) -> Option<&str> {
        self.has_value().then(|| self.as_str())
    }

    pub fn opt_i64(&self) -> Result<Option<i64>> {
        self.optional(Self::as_i64)
    }

    pub fn opt_f64(&self) -> Result<Option<f64>> {
        self.optional(Self::as_f64)
    }

    pub fn opt_bool(&self) -> Result<Option<bool>> {
        self.optional(Self::as_bool)
    }

    pub fn opt_date(&self) -> Result<Option<NaiveDate>> {
        self.optional(Self::as_date)
    }

    pub fn opt_datetime(&self) -> Result<Option<NaiveDateTime>> {
        self.optional(Self::as_datetime)
    }

    /// Audit coordinates of this cell.
    pub fn source_ref(&self) -> SourceRef {
        SourceRef {
            source: self.file.path.display().to_string(),
            version: self.file.version.to_string(),
            record: self.row,
            column: self.column.to_string(),
        }
    }

    fn optional<T>(&self, read: impl FnOnce(&Self) -> Result<T>) -> Result<Option<T>> {
        if self.has_value() {
            read(self).map(Some)
        } else {
            Ok(None)
        }
    }

    fn format_error(&self, expected: &'static str) -> ModelError {
        ModelError::CellFormat {
            path: self.file.path.clone(),
            row: self.row,
            column: self.column.to_string(),
            raw: self.value.as_deref().unwrap_or_default().to_string(),
            expected,
        }
    }
}
