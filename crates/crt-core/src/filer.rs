//! Identifier resolution and filing.
//!
//! [`Filer::file`] turns an [`OutputRecord`] into a [`FiledRecord`]: every
//! deferred reference is looked up in the [`BatchContext`] and becomes
//! resolved, pending, or fails the record. Filing runs in this order:
//!
//! 1. plan: look up every entry; a required reference with no target fails
//!    the record before anything is written
//! 2. persist the record, pending entries included
//! 3. record the record's own natural id and collect references that were
//!    waiting for it
//! 4. park this record's pending entries in the context (an entry whose
//!    target was filed concurrently resolves here instead)
//! 5. patch every entry released in steps 3 and 4
//!
//! Waiters always point at records that are already saved, and the context
//! lock is never held while the store is called.

use std::collections::BTreeMap;
use std::sync::Arc;

use crt_model::{ReferenceHandle, StorageId, describe_sources};
use tracing::{debug, debug_span, error, info, trace, warn};

use crate::context::{BatchContext, Lookup};
use crate::error::{CoreError, Result};
use crate::record::OutputRecord;
use crate::reference_list::ReferencePolicy;
use crate::resolution::{
    EntryState, FiledRecord, PatchLocation, PendingReference, ReferenceEntry, ReferencePatch,
};
use crate::store::RecordStore;

/// What happens to references still pending when a batch closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PendingAtClose {
    /// Closing fails with [`CoreError::PendingAtClose`].
    Fail,
    /// Each leftover entry is patched to `Broken` and logged.
    #[default]
    MarkBroken,
    /// Entries stay `Pending` in the store; nothing in this crate revisits
    /// them, so reconciling is left to whoever reads the store.
    LeavePending,
}

/// Filing behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilerOptions {
    /// Policy for lists that do not set their own.
    pub forward_references: ReferencePolicy,
    pub pending_at_close: PendingAtClose,
    /// Abort the batch on any per-record error.
    pub strict: bool,
}

impl Default for FilerOptions {
    fn default() -> Self {
        Self {
            forward_references: ReferencePolicy::Deferrable,
            pending_at_close: PendingAtClose::MarkBroken,
            strict: false,
        }
    }
}

impl FilerOptions {
    /// Any record error aborts, and unresolved references at close fail.
    pub fn strict() -> Self {
        Self {
            forward_references: ReferencePolicy::Deferrable,
            pending_at_close: PendingAtClose::Fail,
            strict: true,
        }
    }

    #[must_use]
    pub fn with_forward_references(mut self, policy: ReferencePolicy) -> Self {
        self.forward_references = policy;
        self
    }

    #[must_use]
    pub fn with_pending_at_close(mut self, policy: PendingAtClose) -> Self {
        self.pending_at_close = policy;
        self
    }

    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// Result of filing one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilingOutcome {
    pub storage_id: StorageId,
    /// Entries of this record resolved during filing.
    pub resolved: usize,
    /// Entries of this record left waiting for a target.
    pub pending: usize,
    /// Patches written, including entries of earlier records released by
    /// this record's identifier.
    pub patched: usize,
}

/// Result of closing a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseSummary {
    pub batch: String,
    /// References still pending when the batch closed.
    pub leftover: usize,
    /// Leftover references patched to `Broken`.
    pub broken: usize,
}

/// Resolves deferred references and commits records to a store.
#[derive(Debug)]
pub struct Filer<S> {
    store: S,
    options: FilerOptions,
}

impl<S: RecordStore> Filer<S> {
    pub fn new(store: S, options: FilerOptions) -> Self {
        Self { store, options }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn options(&self) -> &FilerOptions {
        &self.options
    }

    /// Files one record against the batch context.
    pub fn file(&self, context: &BatchContext, record: OutputRecord) -> Result<FilingOutcome> {
        let parts = record.into_parts();
        let own_id = parts.storage_id;
        let span = debug_span!("file", kind = %parts.kind, storage_id = %own_id);
        let _guard = span.enter();

        if parts.deleted {
            let filed = FiledRecord {
                kind: parts.kind,
                storage_id: own_id.clone(),
                natural_id: parts.identity.map(|h| h.natural_id().to_string()),
                deleted: true,
                fields: BTreeMap::new(),
                references: BTreeMap::new(),
            };
            self.store.save(&filed)?;
            debug!("deletion filed");
            return Ok(FilingOutcome {
                storage_id: own_id,
                resolved: 0,
                pending: 0,
                patched: 0,
            });
        }

        let mut references = BTreeMap::new();
        let mut waiting: Vec<(ReferenceHandle, PendingReference)> = Vec::new();
        let mut resolved = 0;

        for (field, list) in parts.references {
            let list = list.freeze()?;
            let policy = list.policy().unwrap_or(self.options.forward_references);
            let field: Arc<str> = Arc::from(field);
            let mut entries = Vec::with_capacity(list.len());

            for entry in list.iter() {
                let handle = entry.handle()?;
                let sources = entry.sources();
                let target = if parts.identity.as_ref() == Some(&handle) {
                    Some(own_id.clone())
                } else {
                    context.lookup_handle(&handle)
                };
                let state = match target {
                    Some(storage_id) => {
                        resolved += 1;
                        EntryState::Resolved { storage_id }
                    }
                    None if policy == ReferencePolicy::Required => {
                        return Err(CoreError::UnresolvedReference {
                            target: handle.to_string(),
                            field: field.to_string(),
                            sources,
                        });
                    }
                    None => {
                        let pending = PendingReference {
                            location: PatchLocation {
                                record: own_id.clone(),
                                field: Arc::clone(&field),
                                index: entry.index,
                            },
                            sources: sources.clone(),
                        };
                        waiting.push((handle.clone(), pending));
                        EntryState::Pending
                    }
                };
                entries.push(ReferenceEntry::new(&handle, state, sources));
            }
            references.insert(field.to_string(), entries);
        }

        if let Some(identity) = &parts.identity
            && let Some(existing) = context.lookup_handle(identity)
            && existing != own_id
        {
            return Err(CoreError::IdentifierConflict {
                target: identity.to_string(),
                existing: existing.to_string(),
                proposed: own_id.to_string(),
            });
        }

        let filed = FiledRecord {
            kind: parts.kind,
            storage_id: own_id.clone(),
            natural_id: parts.identity.as_ref().map(|h| h.natural_id().to_string()),
            deleted: false,
            fields: parts.fields,
            references,
        };
        self.store.save(&filed)?;

        let mut patches = Vec::new();
        if let Some(identity) = parts.identity {
            let released = context.record_handle(identity, own_id.clone())?;
            patches.extend(released.into_iter().map(|waiter| ReferencePatch {
                location: waiter.location,
                state: EntryState::Resolved {
                    storage_id: own_id.clone(),
                },
            }));
        }

        let mut pending = 0;
        for (handle, waiter) in waiting {
            let location = waiter.location.clone();
            match context.resolve_or_wait(&handle, waiter)? {
                Lookup::Resolved(storage_id) => {
                    resolved += 1;
                    patches.push(ReferencePatch {
                        location,
                        state: EntryState::Resolved { storage_id },
                    });
                }
                Lookup::Waiting => {
                    trace!(target_ref = %handle, field = %location.field, "reference pending");
                    pending += 1;
                }
            }
        }

        let patched = self.apply_patches(&patches)?;
        debug!(resolved, pending, patched, "record filed");
        Ok(FilingOutcome {
            storage_id: own_id,
            resolved,
            pending,
            patched,
        })
    }

    /// Ends a batch, applying the configured policy to leftover references.
    pub fn close_batch(&self, context: BatchContext) -> Result<CloseSummary> {
        let batch = context.label().to_string();
        let identifiers = context.identifier_count();
        let leftover = context.into_pending();
        let count: usize = leftover.iter().map(|(_, waiters)| waiters.len()).sum();

        if count == 0 {
            info!(batch = %batch, identifiers, "batch closed");
            return Ok(CloseSummary {
                batch,
                leftover: 0,
                broken: 0,
            });
        }

        match self.options.pending_at_close {
            PendingAtClose::Fail => {
                let first = leftover
                    .first()
                    .map(|(handle, waiters)| {
                        let sources = waiters
                            .first()
                            .map(|w| describe_sources(&w.sources))
                            .unwrap_or_default();
                        format!("{handle} ({sources})")
                    })
                    .unwrap_or_default();
                error!(batch = %batch, count, first = %first, "references pending at close");
                Err(CoreError::PendingAtClose { count, first })
            }
            PendingAtClose::MarkBroken => {
                let mut patches = Vec::with_capacity(count);
                for (handle, waiters) in leftover {
                    warn!(
                        batch = %batch,
                        target_ref = %handle,
                        referrers = waiters.len(),
                        "target never filed, marking references broken"
                    );
                    let reason = format!("{handle} was not filed in batch {batch}");
                    patches.extend(waiters.into_iter().map(|waiter| ReferencePatch {
                        location: waiter.location,
                        state: EntryState::Broken {
                            reason: reason.clone(),
                        },
                    }));
                }
                let broken = self.apply_patches(&patches)?;
                info!(batch = %batch, identifiers, broken, "batch closed");
                Ok(CloseSummary {
                    batch,
                    leftover: count,
                    broken,
                })
            }
            PendingAtClose::LeavePending => {
                info!(
                    batch = %batch,
                    identifiers,
                    pending = count,
                    "batch closed, references left pending"
                );
                Ok(CloseSummary {
                    batch,
                    leftover: count,
                    broken: 0,
                })
            }
        }
    }

    /// Discards a batch context without touching pending references.
    pub fn abort_batch(&self, context: BatchContext) {
        warn!(
            batch = %context.label(),
            identifiers = context.identifier_count(),
            pending = context.pending_count(),
            "batch aborted, discarding context"
        );
    }

    fn apply_patches(&self, patches: &[ReferencePatch]) -> Result<usize> {
        for patch in patches {
            self.store.apply_patch(patch)?;
        }
        Ok(patches.len())
    }
}
