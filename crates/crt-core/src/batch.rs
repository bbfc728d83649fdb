//! Parallel batch runs.
//!
//! A batch maps source items (rows, row groups) to output records and files
//! them on the current rayon pool. Record-scoped errors are logged with
//! their provenance and the record is skipped; batch-scoped errors, or any
//! error in strict mode, abort the batch and discard its context.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use tracing::{error, info, info_span, warn};

use crate::context::BatchContext;
use crate::error::{CoreError, ErrorScope, Result};
use crate::filer::Filer;
use crate::record::OutputRecord;
use crate::store::RecordStore;

/// Counts for a completed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct BatchSummary {
    pub batch: String,
    pub items: usize,
    pub filed: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub resolved: usize,
    /// Pending entries later patched to a target filed in the same batch.
    pub patched: usize,
    pub leftover: usize,
    pub broken: usize,
}

#[derive(Default)]
struct Counters {
    items: AtomicUsize,
    filed: AtomicUsize,
    deleted: AtomicUsize,
    skipped: AtomicUsize,
    resolved: AtomicUsize,
    patched: AtomicUsize,
}

impl Counters {
    fn bump(counter: &AtomicUsize, by: usize) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::Relaxed)
    }
}

impl<S: RecordStore> Filer<S> {
    /// Maps and files every item, then closes the batch.
    ///
    /// The context is consumed either way: closed on success, discarded on
    /// abort.
    pub fn run_batch<I, F>(
        &self,
        context: BatchContext,
        items: I,
        mapper: F,
    ) -> Result<BatchSummary>
    where
        I: IntoParallelIterator,
        F: Fn(I::Item) -> Result<Vec<OutputRecord>> + Sync + Send,
    {
        let span = info_span!("batch", batch = %context.label());
        let _guard = span.enter();
        let started = Instant::now();
        let counters = Counters::default();

        let run = items.into_par_iter().try_for_each(|item| {
            Counters::bump(&counters.items, 1);
            match mapper(item) {
                Ok(records) => {
                    for record in records {
                        self.file_one(&context, record, &counters)?;
                    }
                    Ok(())
                }
                Err(err) => self.handle_error(err, &counters),
            }
        });

        if let Err(err) = run {
            error!(error = %err, "batch aborted");
            self.abort_batch(context);
            return Err(err);
        }

        let close = self.close_batch(context)?;
        let summary = BatchSummary {
            batch: close.batch,
            items: Counters::get(&counters.items),
            filed: Counters::get(&counters.filed),
            deleted: Counters::get(&counters.deleted),
            skipped: Counters::get(&counters.skipped),
            resolved: Counters::get(&counters.resolved),
            patched: Counters::get(&counters.patched),
            leftover: close.leftover,
            broken: close.broken,
        };
        info!(
            items = summary.items,
            filed = summary.filed,
            skipped = summary.skipped,
            broken = summary.broken,
            duration_ms = started.elapsed().as_millis(),
            "batch complete"
        );
        Ok(summary)
    }

    fn file_one(
        &self,
        context: &BatchContext,
        record: OutputRecord,
        counters: &Counters,
    ) -> Result<()> {
        let deleted = record.is_deleted();
        match self.file(context, record) {
            Ok(outcome) => {
                Counters::bump(&counters.filed, 1);
                if deleted {
                    Counters::bump(&counters.deleted, 1);
                }
                Counters::bump(&counters.resolved, outcome.resolved);
                Counters::bump(&counters.patched, outcome.patched);
                Ok(())
            }
            Err(err) => self.handle_error(err, counters),
        }
    }

    fn handle_error(&self, err: CoreError, counters: &Counters) -> Result<()> {
        if self.options().strict || err.scope() == ErrorScope::Batch {
            return Err(err);
        }
        Counters::bump(&counters.skipped, 1);
        if err.is_defect() {
            error!(error = %err, "record skipped: defect in mapping code");
        } else {
            warn!(error = %err, "record skipped");
        }
        Ok(())
    }
}
