//! Reference list ordering, provenance and concurrent append.

use std::sync::Arc;
use std::thread;

use crt_core::{
    BatchContext, DeferredReferenceList, EntryState, Filer, FilerOptions, MemoryStore,
    OutputRecord, Provenance,
};
use crt_model::{Cell, ReferenceHandle, ResourceKind, SourceFile};
use proptest::prelude::*;
use rayon::prelude::*;

fn cell(row: u64) -> Arc<Cell> {
    Cell::new(
        SourceFile::new("Admin_Location.csv", "5.1"),
        row,
        Arc::from("LocationGuid"),
        format!("L{row}"),
    )
}

fn list_for(provenance: Provenance) -> DeferredReferenceList {
    DeferredReferenceList::new(provenance)
}

fn provenance_strategy() -> impl Strategy<Value = Provenance> {
    prop_oneof![
        Just(Provenance::None),
        Just(Provenance::Single),
        Just(Provenance::Multi),
    ]
}

proptest! {
    #[test]
    fn entries_keep_append_order(
        provenance in provenance_strategy(),
        ids in prop::collection::vec("[A-Z0-9]{1,12}", 0..64),
    ) {
        let list = list_for(provenance);
        for (row, id) in ids.iter().enumerate() {
            let cells: Vec<Arc<Cell>> = match provenance {
                Provenance::None => Vec::new(),
                Provenance::Single => vec![cell(row as u64)],
                Provenance::Multi => (0..row % 3).map(|n| cell((row * 10 + n) as u64)).collect(),
            };
            list.append_to(ResourceKind::Location, id, &cells).unwrap();
        }

        prop_assert_eq!(list.len(), ids.len());
        for (i, id) in ids.iter().enumerate() {
            prop_assert_eq!(list.get(i).unwrap(), ReferenceHandle::new(ResourceKind::Location, id).unwrap());
            let cells = list.cells_for(i).unwrap();
            match provenance {
                Provenance::None => prop_assert!(cells.is_empty()),
                Provenance::Single => prop_assert_eq!(cells[0].row(), i as u64),
                Provenance::Multi => prop_assert_eq!(cells.len(), i % 3),
            }
        }

        let frozen = list.freeze().unwrap();
        prop_assert_eq!(frozen.len(), ids.len());
        for (entry, id) in frozen.iter().zip(&ids) {
            let handle = entry.handle().unwrap();
            prop_assert_eq!(handle.natural_id(), id.as_str());
        }
    }
}

#[test]
fn concurrent_appends_are_each_observed_once() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 500;

    let list = DeferredReferenceList::single_cell();
    thread::scope(|scope| {
        for t in 0..THREADS {
            let list = &list;
            scope.spawn(move || {
                for i in 0..PER_THREAD {
                    let row = (t * PER_THREAD + i) as u64;
                    list.append_to(ResourceKind::Practitioner, &format!("U{row}"), &[cell(row)])
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(list.len(), THREADS * PER_THREAD);
    let frozen = list.freeze().unwrap();
    let mut seen = vec![false; THREADS * PER_THREAD];
    for entry in frozen.iter() {
        let handle = entry.handle().unwrap();
        let row: usize = handle.natural_id()[1..].parse().unwrap();
        assert!(!seen[row], "entry U{row} appended twice");
        seen[row] = true;
        assert_eq!(entry.cells[0].row(), row as u64);
    }
    assert!(seen.iter().all(|s| *s));
}

#[test]
fn parallel_filing_resolves_every_forward_reference() {
    const PATIENTS: usize = 200;

    let filer = Filer::new(MemoryStore::new(), FilerOptions::default());
    let context = BatchContext::new("parallel");

    // Observations and patients interleaved so both orders occur.
    let items: Vec<(bool, usize)> = (0..PATIENTS)
        .flat_map(|n| [(false, n), (true, n)])
        .collect();
    items.into_par_iter().for_each(|(is_patient, n)| {
        let record = if is_patient {
            OutputRecord::identified(ResourceKind::Patient, &format!("P{n}")).unwrap()
        } else {
            let mut record =
                OutputRecord::identified(ResourceKind::Observation, &format!("O{n}")).unwrap();
            record
                .references_mut("subject", Provenance::None)
                .append_to(ResourceKind::Patient, &format!("P{n}"), &[])
                .unwrap();
            record
        };
        filer.file(&context, record).unwrap();
    });

    assert_eq!(context.pending_count(), 0);
    let summary = filer.close_batch(context).unwrap();
    assert_eq!(summary.leftover, 0);

    let records = filer.store().records();
    assert_eq!(records.len(), PATIENTS * 2);
    for record in records.iter().filter(|r| r.kind == ResourceKind::Observation) {
        let entry = record.reference("subject", 0).unwrap();
        assert!(matches!(entry.state, EntryState::Resolved { .. }));
    }
}
