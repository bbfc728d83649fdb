//! Persistence boundary.
//!
//! The filer hands finished records and later reference patches to a
//! [`RecordStore`]. Stores are shared by all filing threads.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crt_model::StorageId;
use thiserror::Error;

use crate::resolution::{FiledRecord, ReferencePatch};

/// Errors returned by a record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A record with this storage id was already saved.
    #[error("duplicate storage id {storage_id}")]
    DuplicateStorageId { storage_id: String },

    /// A patch names a record the store has never seen.
    #[error("unknown record {storage_id}")]
    UnknownRecord { storage_id: String },

    /// A patch names a reference entry the record does not have.
    #[error("record {storage_id} has no reference {field}[{index}]")]
    UnknownEntry {
        storage_id: String,
        field: String,
        index: usize,
    },

    /// The patch would move an entry out of a terminal state.
    #[error("rejected patch on {storage_id}: {message}")]
    RejectedPatch { storage_id: String, message: String },

    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Constraint violations lose one record; anything else stops the batch.
    pub fn is_constraint(&self) -> bool {
        matches!(
            self,
            Self::DuplicateStorageId { .. }
                | Self::UnknownRecord { .. }
                | Self::UnknownEntry { .. }
                | Self::RejectedPatch { .. }
        )
    }
}

/// Durable storage for filed records.
pub trait RecordStore: Send + Sync {
    /// Saves a new record.
    fn save(&self, record: &FiledRecord) -> Result<(), StoreError>;

    /// Writes a terminal state into a reference entry of a saved record.
    fn apply_patch(&self, patch: &ReferencePatch) -> Result<(), StoreError>;
}

impl<S: RecordStore + ?Sized> RecordStore for Arc<S> {
    fn save(&self, record: &FiledRecord) -> Result<(), StoreError> {
        (**self).save(record)
    }

    fn apply_patch(&self, patch: &ReferencePatch) -> Result<(), StoreError> {
        (**self).apply_patch(patch)
    }
}

/// In-memory store, mainly for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<StorageId, FiledRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, storage_id: &StorageId) -> Option<FiledRecord> {
        self.lock().ok()?.get(storage_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records ordered by storage id.
    pub fn records(&self) -> Vec<FiledRecord> {
        self.lock()
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<StorageId, FiledRecord>>, StoreError> {
        self.records.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl RecordStore for MemoryStore {
    fn save(&self, record: &FiledRecord) -> Result<(), StoreError> {
        let mut records = self.lock()?;
        if records.contains_key(&record.storage_id) {
            return Err(StoreError::DuplicateStorageId {
                storage_id: record.storage_id.to_string(),
            });
        }
        records.insert(record.storage_id.clone(), record.clone());
        Ok(())
    }

    fn apply_patch(&self, patch: &ReferencePatch) -> Result<(), StoreError> {
        let location = &patch.location;
        let mut records = self.lock()?;
        let record = records
            .get_mut(&location.record)
            .ok_or_else(|| StoreError::UnknownRecord {
                storage_id: location.record.to_string(),
            })?;
        let entry = record
            .references
            .get_mut(&*location.field)
            .and_then(|entries| entries.get_mut(location.index))
            .ok_or_else(|| StoreError::UnknownEntry {
                storage_id: location.record.to_string(),
                field: location.field.to_string(),
                index: location.index,
            })?;
        entry
            .transition(location, patch.state.clone())
            .map_err(|err| StoreError::RejectedPatch {
                storage_id: location.record.to_string(),
                message: err.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::{EntryState, PatchLocation, ReferenceEntry};
    use crt_model::{ReferenceHandle, ResourceKind};

    fn record(id: &str) -> FiledRecord {
        let target = ReferenceHandle::new(ResourceKind::Patient, "P1").unwrap();
        FiledRecord {
            kind: ResourceKind::Observation,
            storage_id: StorageId::new(id).unwrap(),
            natural_id: None,
            deleted: false,
            fields: BTreeMap::new(),
            references: BTreeMap::from([(
                "subject".to_string(),
                vec![ReferenceEntry::new(&target, EntryState::Pending, Vec::new())],
            )]),
        }
    }

    fn patch(id: &str, index: usize) -> ReferencePatch {
        ReferencePatch {
            location: PatchLocation {
                record: StorageId::new(id).unwrap(),
                field: Arc::from("subject"),
                index,
            },
            state: EntryState::Resolved {
                storage_id: StorageId::new("S-1").unwrap(),
            },
        }
    }

    #[test]
    fn duplicate_save_is_a_constraint_error() {
        let store = MemoryStore::new();
        store.save(&record("O1")).unwrap();
        let err = store.save(&record("O1")).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateStorageId { .. }));
        assert!(err.is_constraint());
    }

    #[test]
    fn patch_updates_entry_once() {
        let store = MemoryStore::new();
        store.save(&record("O1")).unwrap();
        store.apply_patch(&patch("O1", 0)).unwrap();
        let saved = store.get(&StorageId::new("O1").unwrap()).unwrap();
        assert_eq!(saved.count_in_state("resolved"), 1);

        let err = store.apply_patch(&patch("O1", 0)).unwrap_err();
        assert!(matches!(err, StoreError::RejectedPatch { .. }));
    }

    #[test]
    fn patch_on_unknown_targets_fails() {
        let store = MemoryStore::new();
        store.save(&record("O1")).unwrap();
        assert!(matches!(
            store.apply_patch(&patch("O2", 0)),
            Err(StoreError::UnknownRecord { .. })
        ));
        assert!(matches!(
            store.apply_patch(&patch("O1", 4)),
            Err(StoreError::UnknownEntry { .. })
        ));
    }
}
