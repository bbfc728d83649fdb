//! Resolved reference entries and filed records.

use std::collections::BTreeMap;
use std::sync::Arc;

use crt_model::{ReferenceHandle, ResourceKind, SourceRef, StorageId};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::record::FieldValue;

/// Resolution state of one reference entry.
///
/// `Pending` may move once, to `Resolved` or `Broken`; both are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    Resolved { storage_id: StorageId },
    Broken { reason: String },
}

impl EntryState {
    pub fn name(&self) -> &'static str {
        match self {
            EntryState::Pending => "pending",
            EntryState::Resolved { .. } => "resolved",
            EntryState::Broken { .. } => "broken",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EntryState::Pending)
    }
}

/// A reference on a filed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub kind: ResourceKind,
    pub natural_id: String,
    #[serde(flatten)]
    pub state: EntryState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceRef>,
}

impl ReferenceEntry {
    pub fn new(handle: &ReferenceHandle, state: EntryState, sources: Vec<SourceRef>) -> Self {
        Self {
            kind: handle.kind(),
            natural_id: handle.natural_id().to_string(),
            state,
            sources,
        }
    }

    pub fn target(&self) -> String {
        format!("{}/{}", self.kind, self.natural_id)
    }

    /// Moves a pending entry to a terminal state.
    pub fn transition(&mut self, location: &PatchLocation, next: EntryState) -> Result<()> {
        if self.state.is_terminal() || !next.is_terminal() {
            return Err(CoreError::InvalidTransition {
                record: location.record.to_string(),
                field: location.field.to_string(),
                index: location.index,
                from: self.state.name(),
                to: next.name(),
            });
        }
        self.state = next;
        Ok(())
    }
}

/// A record as handed to the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiledRecord {
    pub kind: ResourceKind,
    pub storage_id: StorageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natural_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    pub fields: BTreeMap<String, FieldValue>,
    pub references: BTreeMap<String, Vec<ReferenceEntry>>,
}

impl FiledRecord {
    pub fn reference(&self, field: &str, index: usize) -> Option<&ReferenceEntry> {
        self.references.get(field)?.get(index)
    }

    pub fn count_in_state(&self, state: &str) -> usize {
        self.references
            .values()
            .flatten()
            .filter(|entry| entry.state.name() == state)
            .count()
    }
}

/// Position of a reference entry on a filed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchLocation {
    pub record: StorageId,
    pub field: Arc<str>,
    pub index: usize,
}

/// Terminal state to write into an already filed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencePatch {
    #[serde(flatten)]
    pub location: PatchLocation,
    pub state: EntryState,
}

/// A reference waiting in the batch context for its target.
#[derive(Debug, Clone)]
pub struct PendingReference {
    pub location: PatchLocation,
    pub sources: Vec<SourceRef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> (ReferenceEntry, PatchLocation) {
        let handle = ReferenceHandle::new(ResourceKind::Patient, "P2").unwrap();
        let location = PatchLocation {
            record: StorageId::new("S-1").unwrap(),
            field: Arc::from("subject"),
            index: 0,
        };
        (ReferenceEntry::new(&handle, EntryState::Pending, Vec::new()), location)
    }

    #[test]
    fn pending_resolves_once() {
        let (mut entry, location) = entry();
        let resolved = EntryState::Resolved {
            storage_id: StorageId::new("S-200").unwrap(),
        };
        entry.transition(&location, resolved.clone()).unwrap();
        assert_eq!(entry.state, resolved);

        let err = entry
            .transition(
                &location,
                EntryState::Broken {
                    reason: "late".to_string(),
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidTransition {
                from: "resolved",
                to: "broken",
                ..
            }
        ));
    }

    #[test]
    fn pending_cannot_move_to_pending() {
        let (mut entry, location) = entry();
        assert!(entry.transition(&location, EntryState::Pending).is_err());
    }

    #[test]
    fn entry_serializes_flat() {
        let (entry, _) = entry();
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["state"], "pending");
        assert_eq!(json["kind"], "Patient");
        assert_eq!(json["natural_id"], "P2");
    }
}
