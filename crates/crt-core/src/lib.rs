//! Deferred reference lists and batch-scoped identifier resolution.
//!
//! Field mappers build [`OutputRecord`]s whose reference-valued fields are
//! [`DeferredReferenceList`]s of natural identifiers. The [`Filer`] resolves
//! those against a per-batch [`BatchContext`], commits records through a
//! [`RecordStore`], and patches earlier records once the targets they were
//! waiting for arrive.

pub mod batch;
pub mod context;
pub mod error;
pub mod filer;
pub mod record;
pub mod reference_list;
pub mod resolution;
pub mod store;

pub use batch::BatchSummary;
pub use context::{BatchContext, Lookup};
pub use error::{CoreError, ErrorScope, Result};
pub use filer::{CloseSummary, Filer, FilerOptions, FilingOutcome, PendingAtClose};
pub use record::{FieldValue, OutputRecord, Value};
pub use reference_list::{
    DEFAULT_MAX_HANDLE_BYTES, DeferredReferenceList, FrozenEntry, FrozenReferenceList,
    Provenance, ReferenceListConfig, ReferencePolicy,
};
pub use resolution::{
    EntryState, FiledRecord, PatchLocation, PendingReference, ReferenceEntry, ReferencePatch,
};
pub use store::{MemoryStore, RecordStore, StoreError};
