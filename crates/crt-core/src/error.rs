//! Error types for reference resolution and filing.

use crt_model::{ModelError, SourceRef, describe_sources};
use thiserror::Error;

use crate::store::StoreError;

/// How far an error reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Only the record being mapped or filed is lost.
    Record,
    /// The batch cannot continue.
    Batch,
}

/// Errors raised while building, resolving or filing records.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A reference list was used against its provenance contract.
    #[error("invariant violation: {message}")]
    InvariantViolation { message: String },

    /// Cell parsing or handle encoding failed.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Index past the end of a reference list.
    #[error("reference list index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// A reference that may not be deferred has no target in the batch.
    #[error("unresolved reference {target} in field {field}: {}", describe_sources(.sources))]
    UnresolvedReference {
        target: String,
        field: String,
        sources: Vec<SourceRef>,
    },

    /// Two storage identifiers were claimed for one natural identifier.
    #[error("identifier conflict for {target}: already {existing}, now {proposed}")]
    IdentifierConflict {
        target: String,
        existing: String,
        proposed: String,
    },

    /// The batch context reached its configured identifier limit.
    #[error("batch context exhausted after {limit} identifiers")]
    BatchContextExhausted { limit: usize },

    /// A reference entry was asked to leave a terminal state.
    #[error("reference {field}[{index}] on record {record} cannot move from {from} to {to}")]
    InvalidTransition {
        record: String,
        field: String,
        index: usize,
        from: &'static str,
        to: &'static str,
    },

    /// References were still waiting for targets when the batch closed.
    #[error("{count} reference(s) still pending at batch close, first: {first}")]
    PendingAtClose { count: usize, first: String },

    /// The persistence layer rejected a record or patch.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A field mapper could not build a record from its source cells.
    #[error("mapping failed: {message} ({})", describe_sources(.sources))]
    Mapping {
        message: String,
        sources: Vec<SourceRef>,
    },
}

impl CoreError {
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    pub fn mapping(message: impl Into<String>, sources: Vec<SourceRef>) -> Self {
        Self::Mapping {
            message: message.into(),
            sources,
        }
    }

    /// Scope used by the batch runner when not in strict mode.
    pub fn scope(&self) -> ErrorScope {
        match self {
            Self::IdentifierConflict { .. }
            | Self::BatchContextExhausted { .. }
            | Self::PendingAtClose { .. } => ErrorScope::Batch,
            Self::Store(err) if !err.is_constraint() => ErrorScope::Batch,
            _ => ErrorScope::Record,
        }
    }

    /// True for programming errors that should be fixed rather than retried.
    pub fn is_defect(&self) -> bool {
        matches!(
            self,
            Self::InvariantViolation { .. }
                | Self::IndexOutOfRange { .. }
                | Self::InvalidTransition { .. }
                | Self::Model(ModelError::HandleEncoding { .. })
                | Self::Model(ModelError::HandleDecoding { .. })
        )
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
