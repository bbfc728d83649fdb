//! Deferred reference lists.
//!
//! A [`DeferredReferenceList`] records "this output record points at
//! `Kind/naturalId`" before the target has a storage identifier. Batches keep
//! tens of millions of entries alive at once, so entries are packed: every
//! encoded handle is appended to one byte arena and only its end offset is
//! kept per entry.
//!
//! Per-entry provenance is chosen once, at construction:
//!
//! | [`Provenance`] | cells per entry | storage per entry |
//! |---|---|---|
//! | `None` | 0 | offset only |
//! | `Single` | 0 or 1 | offset + one optional `Arc<Cell>` |
//! | `Multi` | 0..N | offset + boxed slice of `Arc<Cell>` |
//!
//! Appends are serialized by a mutex and may come from several worker
//! threads. Reads are meant for after the owning record has been handed to
//! the filer; [`DeferredReferenceList::freeze`] gives a lock-free view for
//! that phase.

use std::sync::{Arc, Mutex, MutexGuard};

use crt_model::{Cell, ReferenceHandle, ResourceKind, SourceRef};

use crate::error::{CoreError, Result};

/// Default upper bound for one encoded handle.
pub const DEFAULT_MAX_HANDLE_BYTES: usize = 512;

/// How many source cells each entry may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    None,
    Single,
    Multi,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::None => "none",
            Provenance::Single => "single",
            Provenance::Multi => "multi",
        }
    }

    fn check(&self, cells: usize) -> Result<()> {
        match (self, cells) {
            (Provenance::None, 0) | (Provenance::Single, 0 | 1) | (Provenance::Multi, _) => Ok(()),
            (Provenance::None, n) => Err(CoreError::invariant(format!(
                "reference list without provenance cannot hold {n} cell(s)"
            ))),
            (Provenance::Single, n) => Err(CoreError::invariant(format!(
                "single-cell reference list cannot hold {n} cells for one entry"
            ))),
        }
    }
}

/// Whether an unresolved reference may wait for its target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferencePolicy {
    /// Keep the entry pending until the target is filed.
    #[default]
    Deferrable,
    /// Fail the owning record when the target is not yet known.
    Required,
}

/// Limits applied on append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceListConfig {
    pub max_handle_bytes: usize,
}

impl Default for ReferenceListConfig {
    fn default() -> Self {
        Self {
            max_handle_bytes: DEFAULT_MAX_HANDLE_BYTES,
        }
    }
}

#[derive(Debug)]
enum CellSlots {
    None,
    Single(Vec<Option<Arc<Cell>>>),
    Multi(Vec<Box<[Arc<Cell>]>>),
}

impl CellSlots {
    fn new(provenance: Provenance) -> Self {
        match provenance {
            Provenance::None => CellSlots::None,
            Provenance::Single => CellSlots::Single(Vec::new()),
            Provenance::Multi => CellSlots::Multi(Vec::new()),
        }
    }

    fn push(&mut self, cells: &[Arc<Cell>]) {
        match self {
            CellSlots::None => {}
            CellSlots::Single(slots) => slots.push(cells.first().cloned()),
            CellSlots::Multi(slots) => slots.push(cells.into()),
        }
    }

    fn get(&self, index: usize) -> &[Arc<Cell>] {
        let cells: Option<&[Arc<Cell>]> = match self {
            CellSlots::None => None,
            CellSlots::Single(slots) => slots
                .get(index)
                .and_then(Option::as_ref)
                .map(std::slice::from_ref),
            CellSlots::Multi(slots) => slots.get(index).map(|cells| &cells[..]),
        };
        cells.unwrap_or_default()
    }

    fn len(&self) -> Option<usize> {
        match self {
            CellSlots::None => None,
            CellSlots::Single(slots) => Some(slots.len()),
            CellSlots::Multi(slots) => Some(slots.len()),
        }
    }
}

#[derive(Debug)]
struct Entries {
    bytes: Vec<u8>,
    ends: Vec<u32>,
    cells: CellSlots,
}

impl Entries {
    fn encoded(&self, index: usize) -> Option<&[u8]> {
        let end = *self.ends.get(index)? as usize;
        let start = match index {
            0 => 0,
            _ => self.ends[index - 1] as usize,
        };
        self.bytes.get(start..end)
    }
}

/// Append-only list of references awaiting resolution.
#[derive(Debug)]
pub struct DeferredReferenceList {
    provenance: Provenance,
    policy: Option<ReferencePolicy>,
    config: ReferenceListConfig,
    entries: Mutex<Entries>,
}

impl DeferredReferenceList {
    pub fn new(provenance: Provenance) -> Self {
        Self::with_config(provenance, ReferenceListConfig::default())
    }

    /// List whose entries carry no source cells.
    pub fn without_provenance() -> Self {
        Self::new(Provenance::None)
    }

    /// List whose entries carry at most one source cell.
    pub fn single_cell() -> Self {
        Self::new(Provenance::Single)
    }

    /// List whose entries carry any number of source cells.
    pub fn multi_cell() -> Self {
        Self::new(Provenance::Multi)
    }

    pub fn with_config(provenance: Provenance, config: ReferenceListConfig) -> Self {
        Self {
            provenance,
            policy: None,
            config,
            entries: Mutex::new(Entries {
                bytes: Vec::new(),
                ends: Vec::new(),
                cells: CellSlots::new(provenance),
            }),
        }
    }

    /// Overrides the filer's default policy for every entry of this list.
    #[must_use]
    pub fn with_policy(mut self, policy: ReferencePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn policy(&self) -> Option<ReferencePolicy> {
        self.policy
    }

    /// Appends one reference with its originating cells.
    ///
    /// Provenance arity and handle size are checked before the lock is
    /// taken; the critical section only copies the new entry.
    pub fn append(&self, handle: &ReferenceHandle, cells: &[Arc<Cell>]) -> Result<()> {
        self.provenance.check(cells.len())?;
        handle.check_size(self.config.max_handle_bytes)?;

        let mut entries = self.lock()?;
        let end = entries.bytes.len() + handle.encoded_len();
        let end = u32::try_from(end)
            .map_err(|_| CoreError::invariant("reference list byte arena exceeds u32 offsets"))?;
        handle.encode_into(&mut entries.bytes);
        entries.ends.push(end);
        entries.cells.push(cells);
        Ok(())
    }

    /// Builds the handle and appends it.
    pub fn append_to(
        &self,
        kind: ResourceKind,
        natural_id: &str,
        cells: &[Arc<Cell>],
    ) -> Result<()> {
        let handle = ReferenceHandle::new(kind, natural_id)?;
        self.append(&handle, cells)
    }

    pub fn len(&self) -> usize {
        self.lock_for_read().ends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Result<ReferenceHandle> {
        let entries = self.lock_for_read();
        let bytes = entries.encoded(index).ok_or(CoreError::IndexOutOfRange {
            index,
            len: entries.ends.len(),
        })?;
        Ok(ReferenceHandle::decode(bytes)?)
    }

    pub fn cells_for(&self, index: usize) -> Result<Vec<Arc<Cell>>> {
        let entries = self.lock_for_read();
        let len = entries.ends.len();
        if index >= len {
            return Err(CoreError::IndexOutOfRange { index, len });
        }
        Ok(entries.cells.get(index).to_vec())
    }

    /// Ends the mutation phase and returns a read-only view.
    pub fn freeze(self) -> Result<FrozenReferenceList> {
        let entries = self
            .entries
            .into_inner()
            .map_err(|_| CoreError::invariant("reference list lock poisoned during append"))?;
        if let Some(cells) = entries.cells.len()
            && cells != entries.ends.len()
        {
            return Err(CoreError::invariant(format!(
                "reference list holds {} entries but {cells} cell slots",
                entries.ends.len()
            )));
        }
        Ok(FrozenReferenceList {
            provenance: self.provenance,
            policy: self.policy,
            entries,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Entries>> {
        self.entries
            .lock()
            .map_err(|_| CoreError::invariant("reference list lock poisoned"))
    }

    // A poisoned list only means another appender panicked mid-call; every
    // completed append is still intact, so reads go ahead.
    fn lock_for_read(&self) -> MutexGuard<'_, Entries> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Read-only reference list after handoff to the filer.
#[derive(Debug)]
pub struct FrozenReferenceList {
    provenance: Provenance,
    policy: Option<ReferencePolicy>,
    entries: Entries,
}

impl FrozenReferenceList {
    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn policy(&self) -> Option<ReferencePolicy> {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.entries.ends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.ends.is_empty()
    }

    pub fn entry(&self, index: usize) -> Option<FrozenEntry<'_>> {
        Some(FrozenEntry {
            index,
            encoded: self.entries.encoded(index)?,
            cells: self.entries.cells.get(index),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = FrozenEntry<'_>> + '_ {
        (0..self.len()).filter_map(|index| self.entry(index))
    }

    /// Bytes held by the packed handle arena.
    pub fn arena_bytes(&self) -> usize {
        self.entries.bytes.len()
    }
}

/// One entry of a frozen list.
#[derive(Debug, Clone, Copy)]
pub struct FrozenEntry<'a> {
    pub index: usize,
    pub encoded: &'a [u8],
    pub cells: &'a [Arc<Cell>],
}

impl FrozenEntry<'_> {
    pub fn handle(&self) -> Result<ReferenceHandle> {
        Ok(ReferenceHandle::decode(self.encoded)?)
    }

    pub fn sources(&self) -> Vec<SourceRef> {
        self.cells.iter().map(|cell| cell.source_ref()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crt_model::{ModelError, SourceFile};

    fn cells(n: usize) -> Vec<Arc<Cell>> {
        let file = SourceFile::new("CareRecord_Consultation.csv", "5.3");
        (0..n)
            .map(|i| Cell::new(Arc::clone(&file), 7, Arc::from(format!("Col{i}")), "X"))
            .collect()
    }

    fn handle(id: &str) -> ReferenceHandle {
        ReferenceHandle::new(ResourceKind::Practitioner, id).unwrap()
    }

    #[test]
    fn no_provenance_rejects_cells() {
        let list = DeferredReferenceList::without_provenance();
        let err = list.append(&handle("U1"), &cells(1)).unwrap_err();
        assert!(matches!(err, CoreError::InvariantViolation { .. }));
        assert!(list.is_empty());
        list.append(&handle("U1"), &[]).unwrap();
        assert_eq!(list.len(), 1);
        assert!(list.cells_for(0).unwrap().is_empty());
    }

    #[test]
    fn single_cell_rejects_two_cells() {
        let list = DeferredReferenceList::single_cell();
        let err = list.append(&handle("U1"), &cells(2)).unwrap_err();
        assert!(matches!(err, CoreError::InvariantViolation { .. }));
        assert!(list.is_empty());

        list.append(&handle("U1"), &cells(1)).unwrap();
        list.append(&handle("U2"), &[]).unwrap();
        assert_eq!(list.cells_for(0).unwrap().len(), 1);
        assert!(list.cells_for(1).unwrap().is_empty());
    }

    #[test]
    fn multi_cell_keeps_all_cells() {
        let list = DeferredReferenceList::multi_cell();
        let source = cells(3);
        list.append(&handle("U1"), &source).unwrap();
        let stored = list.cells_for(0).unwrap();
        assert_eq!(stored.len(), 3);
        assert!(Arc::ptr_eq(&stored[2], &source[2]));
    }

    #[test]
    fn oversized_handle_is_rejected() {
        let list = DeferredReferenceList::with_config(
            Provenance::None,
            ReferenceListConfig {
                max_handle_bytes: 16,
            },
        );
        let err = list
            .append(&handle("a-very-long-natural-id"), &[])
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Model(ModelError::HandleEncoding { .. })
        ));
        assert!(list.is_empty());
    }

    #[test]
    fn get_past_end_is_an_error() {
        let list = DeferredReferenceList::single_cell();
        list.append(&handle("U1"), &[]).unwrap();
        assert!(matches!(
            list.get(1),
            Err(CoreError::IndexOutOfRange { index: 1, len: 1 })
        ));
        assert!(list.cells_for(3).is_err());
    }

    #[test]
    fn frozen_view_matches_live_list() {
        let list = DeferredReferenceList::single_cell().with_policy(ReferencePolicy::Required);
        let source = cells(1);
        list.append(&handle("U1"), &source).unwrap();
        list.append(&handle("U2"), &[]).unwrap();

        let frozen = list.freeze().unwrap();
        assert_eq!(frozen.len(), 2);
        assert_eq!(frozen.policy(), Some(ReferencePolicy::Required));
        let entries: Vec<_> = frozen.iter().collect();
        assert_eq!(entries[0].handle().unwrap(), handle("U1"));
        assert_eq!(entries[0].sources()[0].column, "Col0");
        assert_eq!(entries[1].handle().unwrap(), handle("U2"));
        assert!(entries[1].cells.is_empty());
        assert_eq!(frozen.arena_bytes(), 2 * "Practitioner/U1".len());
    }
}
