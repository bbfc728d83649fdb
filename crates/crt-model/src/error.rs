//! Error types for the record model.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading cells or building reference handles.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A raw cell value could not be parsed as the requested type.
    #[error("cannot read {expected} from {path} row {row} column {column}: '{raw}'")]
    CellFormat {
        path: PathBuf,
        row: u64,
        column: String,
        raw: String,
        expected: &'static str,
    },

    /// A reference was built from an empty or blank natural identifier.
    #[error("natural identifier for {kind} must not be blank")]
    InvalidNaturalId { kind: String },

    /// An encoded handle exceeds the configured size limit.
    #[error("encoded reference {kind}/{natural_id} is {size} bytes, limit is {limit}")]
    HandleEncoding {
        kind: String,
        natural_id: String,
        size: usize,
        limit: usize,
    },

    /// Encoded bytes do not describe a valid handle.
    #[error("cannot decode reference handle: {reason}")]
    HandleDecoding { reason: String },

    /// Resource kind name is not part of the closed set.
    #[error("unknown resource kind: {name}")]
    UnknownResourceKind { name: String },

    /// Storage identifier was empty.
    #[error("storage identifier must not be blank")]
    InvalidStorageId,
}

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;
