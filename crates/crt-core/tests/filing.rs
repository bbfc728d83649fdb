//! Filing and resolution scenarios.

use std::sync::Arc;

use crt_core::{
    BatchContext, CoreError, EntryState, Filer, FilerOptions, MemoryStore, OutputRecord,
    PendingAtClose, Provenance, ReferencePolicy, Value,
};
use crt_model::{Cell, ResourceKind, SourceFile, StorageId};

fn sid(value: &str) -> StorageId {
    StorageId::new(value).unwrap()
}

fn patient_cell(row: u64, value: &str) -> Arc<Cell> {
    Cell::new(
        SourceFile::new("CareRecord_Observation.csv", "5.3"),
        row,
        Arc::from("PatientGuid"),
        value,
    )
}

fn observation(natural_id: &str, patient: &str, row: u64) -> OutputRecord {
    let mut record = OutputRecord::identified(ResourceKind::Observation, natural_id).unwrap();
    let cell = patient_cell(row, patient);
    record.set_field("code", Value::Text("1234".to_string()), &[]);
    record
        .references_mut("subject", Provenance::Single)
        .append_to(ResourceKind::Patient, cell.as_str(), &[Arc::clone(&cell)])
        .unwrap();
    record
}

#[test]
fn resolves_known_target() {
    let filer = Filer::new(MemoryStore::new(), FilerOptions::default());
    let context = BatchContext::new("batch-1");
    let _ = context
        .record_identifier(ResourceKind::Patient, "P1", sid("S-100"))
        .unwrap();

    let outcome = filer.file(&context, observation("O1", "P1", 2)).unwrap();
    assert_eq!(outcome.resolved, 1);
    assert_eq!(outcome.pending, 0);

    let saved = filer.store().get(&outcome.storage_id).unwrap();
    let entry = saved.reference("subject", 0).unwrap();
    assert_eq!(
        entry.state,
        EntryState::Resolved {
            storage_id: sid("S-100")
        }
    );
    assert_eq!(entry.sources[0].record, 2);
    assert_eq!(entry.sources[0].column, "PatientGuid");
}

#[test]
fn required_reference_without_target_fails_with_cell() {
    let filer = Filer::new(
        MemoryStore::new(),
        FilerOptions::default().with_forward_references(ReferencePolicy::Required),
    );
    let context = BatchContext::new("batch-1");
    let _ = context
        .record_identifier(ResourceKind::Patient, "P1", sid("S-100"))
        .unwrap();

    let err = filer.file(&context, observation("O2", "P2", 7)).unwrap_err();
    match &err {
        CoreError::UnresolvedReference {
            target,
            field,
            sources,
        } => {
            assert_eq!(target, "Patient/P2");
            assert_eq!(field, "subject");
            assert_eq!(sources.len(), 1);
            assert_eq!(sources[0].source, "CareRecord_Observation.csv");
            assert_eq!(sources[0].record, 7);
            assert_eq!(sources[0].column, "PatientGuid");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(filer.store().is_empty());
    assert_eq!(context.pending_count(), 0);
}

#[test]
fn list_policy_overrides_filer_default() {
    let filer = Filer::new(MemoryStore::new(), FilerOptions::default());
    let context = BatchContext::new("batch-1");
    let mut record = OutputRecord::identified(ResourceKind::Observation, "O3").unwrap();
    let list = crt_core::DeferredReferenceList::without_provenance()
        .with_policy(ReferencePolicy::Required);
    list.append_to(ResourceKind::Practitioner, "U1", &[]).unwrap();
    record.attach_references("performer", list);

    let err = filer.file(&context, record).unwrap_err();
    assert!(matches!(err, CoreError::UnresolvedReference { .. }));
}

#[test]
fn forward_reference_is_patched_when_target_arrives() {
    let filer = Filer::new(MemoryStore::new(), FilerOptions::default());
    let context = BatchContext::new("batch-1");

    let a = filer.file(&context, observation("A", "P2", 3)).unwrap();
    assert_eq!(a.pending, 1);
    let saved = filer.store().get(&a.storage_id).unwrap();
    assert_eq!(saved.reference("subject", 0).unwrap().state, EntryState::Pending);

    let b = OutputRecord::with_storage_id(ResourceKind::Patient, "P2", sid("S-200")).unwrap();
    let outcome = filer.file(&context, b).unwrap();
    assert_eq!(outcome.patched, 1);

    let patched = filer.store().get(&a.storage_id).unwrap();
    assert_eq!(
        patched.reference("subject", 0).unwrap().state,
        EntryState::Resolved {
            storage_id: sid("S-200")
        }
    );
    assert_eq!(filer.store().len(), 2);

    let summary = filer.close_batch(context).unwrap();
    assert_eq!(summary.leftover, 0);
}

#[test]
fn several_records_wait_for_one_target() {
    let filer = Filer::new(MemoryStore::new(), FilerOptions::default());
    let context = BatchContext::new("batch-1");
    for (i, id) in ["A", "B", "C"].iter().enumerate() {
        filer
            .file(&context, observation(id, "P5", i as u64 + 1))
            .unwrap();
    }
    assert_eq!(context.pending_count(), 3);

    let target = OutputRecord::identified(ResourceKind::Patient, "P5").unwrap();
    let outcome = filer.file(&context, target).unwrap();
    assert_eq!(outcome.patched, 3);
    assert_eq!(context.pending_count(), 0);
}

#[test]
fn pending_at_close_marks_broken_by_default() {
    let filer = Filer::new(MemoryStore::new(), FilerOptions::default());
    let context = BatchContext::new("batch-1");
    let a = filer.file(&context, observation("A", "P404", 1)).unwrap();

    let summary = filer.close_batch(context).unwrap();
    assert_eq!(summary.leftover, 1);
    assert_eq!(summary.broken, 1);

    let saved = filer.store().get(&a.storage_id).unwrap();
    match &saved.reference("subject", 0).unwrap().state {
        EntryState::Broken { reason } => assert!(reason.contains("Patient/P404")),
        other => panic!("unexpected state {other:?}"),
    }
}

#[test]
fn pending_at_close_can_fail_the_batch() {
    let filer = Filer::new(
        MemoryStore::new(),
        FilerOptions::default().with_pending_at_close(PendingAtClose::Fail),
    );
    let context = BatchContext::new("batch-1");
    filer.file(&context, observation("A", "P404", 9)).unwrap();

    let err = filer.close_batch(context).unwrap_err();
    match err {
        CoreError::PendingAtClose { count, first } => {
            assert_eq!(count, 1);
            assert!(first.contains("Patient/P404"));
            assert!(first.contains("row 9"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn aborted_batch_does_not_leak_into_next() {
    let filer = Filer::new(MemoryStore::new(), FilerOptions::default());
    let first = BatchContext::new("batch-1");
    filer.file(&first, observation("A", "P7", 1)).unwrap();
    let _ = first
        .record_identifier(ResourceKind::Patient, "P8", sid("S-8"))
        .unwrap();
    filer.abort_batch(first);

    let second = BatchContext::new("batch-2");
    assert_eq!(second.lookup(ResourceKind::Patient, "P8"), None);
    assert_eq!(second.pending_count(), 0);

    let target = OutputRecord::identified(ResourceKind::Patient, "P7").unwrap();
    let outcome = filer.file(&second, target).unwrap();
    assert_eq!(outcome.patched, 0);
}

#[test]
fn run_batch_skips_record_errors_unless_strict() {
    let rows = vec![("O1", "P1"), ("O2", ""), ("P1", "")];
    let mapper = |(id, patient): (&str, &str)| -> crt_core::Result<Vec<OutputRecord>> {
        if id.starts_with('P') {
            return Ok(vec![OutputRecord::identified(ResourceKind::Patient, id)?]);
        }
        let mut record = OutputRecord::identified(ResourceKind::Observation, id)?;
        let cell = patient_cell(1, patient);
        record
            .references_mut("subject", Provenance::Single)
            .append_to(ResourceKind::Patient, cell.as_str(), &[Arc::clone(&cell)])?;
        Ok(vec![record])
    };

    let lenient = Filer::new(MemoryStore::new(), FilerOptions::default());
    let summary = lenient
        .run_batch(BatchContext::new("lenient"), rows.clone(), mapper)
        .unwrap();
    assert_eq!(summary.items, 3);
    assert_eq!(summary.filed, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.broken, 0);

    let strict = Filer::new(MemoryStore::new(), FilerOptions::strict());
    let err = strict
        .run_batch(BatchContext::new("strict"), rows, mapper)
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Model(crt_model::ModelError::InvalidNaturalId { .. })
    ));
}

#[test]
fn run_batch_aborts_on_identifier_conflict() {
    let filer = Filer::new(MemoryStore::new(), FilerOptions::default());
    let records = vec![sid("S-1"), sid("S-2")];
    let err = filer
        .run_batch(BatchContext::new("conflict"), records, |storage_id| {
            Ok(vec![OutputRecord::with_storage_id(
                ResourceKind::Patient,
                "SAME",
                storage_id,
            )?])
        })
        .unwrap_err();
    assert!(matches!(err, CoreError::IdentifierConflict { .. }));
}
