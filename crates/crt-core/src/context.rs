//! Batch-scoped identifier context.
//!
//! [`BatchContext`] maps `(kind, natural id)` to the storage id a filed
//! record established, for exactly one batch. It also parks references that
//! were filed before their target: each map slot is either resolved or a list
//! of waiters, and both live under the same shard lock, so a target being
//! filed and a reference starting to wait for it can never miss each other.
//!
//! A context is created per batch and consumed by
//! [`crate::Filer::close_batch`] or [`crate::Filer::abort_batch`]; nothing
//! carries over to the next batch.

use std::sync::atomic::{AtomicUsize, Ordering};

use crt_model::{ReferenceHandle, ResourceKind, StorageId};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::trace;

use crate::error::{CoreError, Result};
use crate::resolution::PendingReference;

#[derive(Debug)]
enum Slot {
    Resolved(StorageId),
    Waiting(Vec<PendingReference>),
}

/// Outcome of looking a reference up while allowing it to wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Resolved(StorageId),
    Waiting,
}

/// Natural-id to storage-id map for one batch.
#[derive(Debug)]
pub struct BatchContext {
    label: String,
    slots: DashMap<ReferenceHandle, Slot>,
    identifiers: AtomicUsize,
    /// Distinct targets held in `slots`, resolved or waiting.
    tracked: AtomicUsize,
    max_identifiers: Option<usize>,
}

impl BatchContext {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            slots: DashMap::new(),
            identifiers: AtomicUsize::new(0),
            tracked: AtomicUsize::new(0),
            max_identifiers: None,
        }
    }

    /// Caps the number of distinct targets the context holds, counting both
    /// recorded identifiers and targets that references are waiting for.
    /// Reaching the cap aborts the batch.
    #[must_use]
    pub fn with_max_identifiers(mut self, limit: usize) -> Self {
        self.max_identifiers = Some(limit);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn identifier_count(&self) -> usize {
        self.identifiers.load(Ordering::Acquire)
    }

    /// Number of references still waiting for a target.
    pub fn pending_count(&self) -> usize {
        self.slots
            .iter()
            .map(|slot| match slot.value() {
                Slot::Waiting(waiters) => waiters.len(),
                Slot::Resolved(_) => 0,
            })
            .sum()
    }

    pub fn lookup(&self, kind: ResourceKind, natural_id: &str) -> Option<StorageId> {
        let handle = ReferenceHandle::new(kind, natural_id).ok()?;
        self.lookup_handle(&handle)
    }

    pub fn lookup_handle(&self, handle: &ReferenceHandle) -> Option<StorageId> {
        match self.slots.get(handle)?.value() {
            Slot::Resolved(id) => Some(id.clone()),
            Slot::Waiting(_) => None,
        }
    }

    /// Records that `natural_id` resolves to `storage_id`.
    ///
    /// Recording the same mapping twice is a no-op; a different storage id
    /// for a known natural id is an [`CoreError::IdentifierConflict`].
    /// Returns the references that were waiting for this identifier; the
    /// caller owns patching them.
    #[must_use = "waiting references must be patched"]
    pub fn record_identifier(
        &self,
        kind: ResourceKind,
        natural_id: &str,
        storage_id: StorageId,
    ) -> Result<Vec<PendingReference>> {
        let handle = ReferenceHandle::new(kind, natural_id)?;
        self.record_handle(handle, storage_id)
    }

    pub(crate) fn record_handle(
        &self,
        handle: ReferenceHandle,
        storage_id: StorageId,
    ) -> Result<Vec<PendingReference>> {
        match self.slots.entry(handle) {
            Entry::Occupied(mut occupied) => {
                if let Slot::Resolved(existing) = occupied.get() {
                    if *existing == storage_id {
                        return Ok(Vec::new());
                    }
                    return Err(CoreError::IdentifierConflict {
                        target: occupied.key().to_string(),
                        existing: existing.to_string(),
                        proposed: storage_id.to_string(),
                    });
                }
                self.identifiers.fetch_add(1, Ordering::AcqRel);
                let waiters = match occupied.insert(Slot::Resolved(storage_id)) {
                    Slot::Waiting(waiters) => waiters,
                    Slot::Resolved(_) => Vec::new(),
                };
                trace!(
                    target_ref = %occupied.key(),
                    waiters = waiters.len(),
                    "identifier released waiting references"
                );
                Ok(waiters)
            }
            Entry::Vacant(vacant) => {
                self.reserve_slot()?;
                self.identifiers.fetch_add(1, Ordering::AcqRel);
                vacant.insert(Slot::Resolved(storage_id));
                Ok(Vec::new())
            }
        }
    }

    /// Resolves `handle`, or parks `waiter` until the target is recorded.
    pub(crate) fn resolve_or_wait(
        &self,
        handle: &ReferenceHandle,
        waiter: PendingReference,
    ) -> Result<Lookup> {
        match self.slots.entry(handle.clone()) {
            Entry::Occupied(mut occupied) => match occupied.get_mut() {
                Slot::Resolved(id) => Ok(Lookup::Resolved(id.clone())),
                Slot::Waiting(waiters) => {
                    waiters.push(waiter);
                    Ok(Lookup::Waiting)
                }
            },
            Entry::Vacant(vacant) => {
                self.reserve_slot()?;
                vacant.insert(Slot::Waiting(vec![waiter]));
                Ok(Lookup::Waiting)
            }
        }
    }

    /// Consumes the context, returning every reference still waiting,
    /// ordered by target.
    pub(crate) fn into_pending(self) -> Vec<(ReferenceHandle, Vec<PendingReference>)> {
        let mut pending: Vec<_> = self
            .slots
            .into_iter()
            .filter_map(|(handle, slot)| match slot {
                Slot::Waiting(waiters) => Some((handle, waiters)),
                Slot::Resolved(_) => None,
            })
            .collect();
        pending.sort_by(|a, b| a.0.cmp(&b.0));
        pending
    }

    fn reserve_slot(&self) -> Result<()> {
        match self.max_identifiers {
            None => {
                self.tracked.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
            Some(limit) => self
                .tracked
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < limit).then_some(n + 1)
                })
                .map(|_| ())
                .map_err(|_| CoreError::BatchContextExhausted { limit }),
        }
    }
}
