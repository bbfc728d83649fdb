//! Record model for clinical extract transforms: provenance-tracked source
//! cells, reference handles and storage identifiers.

pub mod cell;
pub mod error;
pub mod handle;
pub mod ids;
pub mod kind;
pub mod provenance;

pub use cell::{Cell, SourceFile};
pub use error::{ModelError, Result};
pub use handle::ReferenceHandle;
pub use ids::StorageId;
pub use kind::ResourceKind;
pub use provenance::{SourceRef, describe_sources};
