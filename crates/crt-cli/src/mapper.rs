//! Generic row mapper driven by [`FileMapping`].

use std::sync::Arc;

use crt_core::{CoreError, DeferredReferenceList, OutputRecord, Provenance, Value};
use crt_ingest::Row;
use crt_model::{Cell, ReferenceHandle, StorageId};
use tracing::trace;

use crate::config::{FieldMapping, FileMapping, ReferenceMapping, ValueType};
use crate::logging::redact_value;

/// Builds the output record for one row.
pub fn map_row(mapping: &FileMapping, row: &Row) -> crt_core::Result<Vec<OutputRecord>> {
    let mut record = match &mapping.identity {
        Some(column) => {
            let id = cell(row, column)?;
            let Some(natural_id) = id.opt_str() else {
                return Err(CoreError::mapping(
                    if id.is_absent() {
                        "identity column missing from this file version"
                    } else {
                        "identity is blank"
                    },
                    vec![id.source_ref()],
                ));
            };
            trace!(row = row.number(), natural_id = redact_value(natural_id), "mapping row");
            if is_deletion(mapping, row)? {
                return Ok(vec![OutputRecord::deletion(mapping.kind, natural_id)?]);
            }
            OutputRecord::identified(mapping.kind, natural_id)?
        }
        None => OutputRecord::anonymous(mapping.kind, row_storage_id(mapping, row)?),
    };

    for field in &mapping.fields {
        let cell = cell(row, &field.column)?;
        if let Some(value) = read_value(field, &cell)? {
            record.set_field(field.name.as_str(), value, std::slice::from_ref(&cell));
        }
    }
    for reference in &mapping.references {
        let list = build_references(reference, row)?;
        if !list.is_empty() {
            record.attach_references(reference.field.as_str(), list);
        }
    }
    Ok(vec![record])
}

fn cell(row: &Row, column: &str) -> crt_core::Result<Arc<Cell>> {
    row.cell(column).ok_or_else(|| {
        CoreError::invariant(format!(
            "column {column} is not part of the schema for {}",
            row.file().path().display()
        ))
    })
}

/// An absent or blank deletion flag means the row is live.
fn is_deletion(mapping: &FileMapping, row: &Row) -> crt_core::Result<bool> {
    match &mapping.deleted {
        Some(column) => Ok(cell(row, column)?.opt_bool()?.unwrap_or(false)),
        None => Ok(false),
    }
}

/// Anonymous records get an id derived from their source position, so
/// re-running a batch over the same files reproduces it.
fn row_storage_id(mapping: &FileMapping, row: &Row) -> crt_core::Result<StorageId> {
    let position = format!("{}#{}", row.file().path().display(), row.number());
    let handle = ReferenceHandle::new(mapping.kind, position)?;
    Ok(StorageId::derive(&handle))
}

fn read_value(field: &FieldMapping, cell: &Cell) -> crt_core::Result<Option<Value>> {
    let value = match field.value_type {
        ValueType::Text => cell.opt_str().map(|s| Value::Text(s.to_string())),
        ValueType::Integer => cell.opt_i64()?.map(Value::Integer),
        ValueType::Number => cell.opt_f64()?.map(Value::Number),
        ValueType::Boolean => cell.opt_bool()?.map(Value::Boolean),
        ValueType::Date => match &field.format {
            Some(format) if cell.has_value() => {
                Some(Value::Date(cell.as_date_with_format(format)?))
            }
            Some(_) => None,
            None => cell.opt_date()?.map(Value::Date),
        },
        ValueType::DateTime => cell.opt_datetime()?.map(Value::DateTime),
    };
    Ok(value)
}

fn build_references(
    reference: &ReferenceMapping,
    row: &Row,
) -> crt_core::Result<DeferredReferenceList> {
    let mut list = DeferredReferenceList::new(reference.provenance);
    if let Some(policy) = reference.policy {
        list = list.with_policy(policy);
    }
    let context = reference
        .context_columns
        .iter()
        .map(|column| cell(row, column))
        .collect::<crt_core::Result<Vec<_>>>()?;

    for column in &reference.columns {
        let id = cell(row, column)?;
        let Some(natural_id) = id.opt_str() else {
            continue;
        };
        match reference.provenance {
            Provenance::None => list.append_to(reference.target, natural_id, &[])?,
            Provenance::Single => {
                list.append_to(reference.target, natural_id, std::slice::from_ref(&id))?;
            }
            Provenance::Multi => {
                let mut cells = vec![Arc::clone(&id)];
                cells.extend(context.iter().filter(|c| c.is_present()).cloned());
                list.append_to(reference.target, natural_id, &cells)?;
            }
        }
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use crt_core::ReferencePolicy;
    use crt_ingest::{CsvRowSource, FileSchema};
    use crt_model::ResourceKind;

    use super::*;

    fn mapping() -> FileMapping {
        FileMapping {
            schema: FileSchema::new("CareRecord_Observation")
                .with_version("5.0", &["ObservationGuid", "PatientGuid", "Value", "Code"])
                .with_version(
                    "5.3",
                    &["ObservationGuid", "PatientGuid", "Value", "Code", "Deleted"],
                ),
            kind: ResourceKind::Observation,
            identity: Some("ObservationGuid".to_string()),
            deleted: Some("Deleted".to_string()),
            fields: vec![FieldMapping {
                name: "value".to_string(),
                column: "Value".to_string(),
                value_type: ValueType::Number,
                format: None,
            }],
            references: vec![ReferenceMapping {
                field: "subject".to_string(),
                target: ResourceKind::Patient,
                columns: vec!["PatientGuid".to_string()],
                provenance: Provenance::Multi,
                policy: Some(ReferencePolicy::Required),
                context_columns: vec!["Code".to_string()],
            }],
        }
    }

    fn rows(text: &str) -> Vec<Row> {
        let mapping = mapping();
        CsvRowSource::from_reader(
            Path::new("CareRecord_Observation.csv"),
            text.as_bytes(),
            &mapping.schema,
        )
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
    }

    #[test]
    fn maps_fields_and_references_with_cells() {
        let rows = rows("ObservationGuid,PatientGuid,Value,Code\nO1,P1,4.5,C9\n");
        let records = map_row(&mapping(), &rows[0]).unwrap();
        let record = &records[0];
        assert_eq!(record.identity().unwrap().natural_id(), "O1");
        assert_eq!(record.field("value").unwrap().value, Value::Number(4.5));

        let subject = &record.references()["subject"];
        assert_eq!(subject.policy(), Some(ReferencePolicy::Required));
        assert_eq!(subject.get(0).unwrap().natural_id(), "P1");
        let cells = subject.cells_for(0).unwrap();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[1].column(), "Code");
    }

    #[test]
    fn references_hold_the_rows_own_cells() {
        let rows = rows("ObservationGuid,PatientGuid,Value,Code\nO1,P1,4.5,C9\n");
        let records = map_row(&mapping(), &rows[0]).unwrap();
        let cells = records[0].references()["subject"].cells_for(0).unwrap();
        assert!(Arc::ptr_eq(&cells[0], &rows[0].cell("PatientGuid").unwrap()));
        assert!(Arc::ptr_eq(&cells[1], &rows[0].cell("Code").unwrap()));
    }

    #[test]
    fn blank_values_leave_fields_and_references_out() {
        let rows = rows("ObservationGuid,PatientGuid,Value,Code\nO1,,,\n");
        let records = map_row(&mapping(), &rows[0]).unwrap();
        assert!(records[0].field("value").is_none());
        assert!(records[0].references().is_empty());
    }

    #[test]
    fn deletion_flag_only_exists_in_newer_files() {
        let rows = rows("ObservationGuid,PatientGuid,Value,Code,Deleted\nO1,P1,1,C,true\n");
        let records = map_row(&mapping(), &rows[0]).unwrap();
        assert!(records[0].is_deleted());
    }

    #[test]
    fn blank_identity_is_a_mapping_error_naming_the_cell() {
        let rows = rows("ObservationGuid,PatientGuid,Value,Code\n ,P1,1,C\n");
        match map_row(&mapping(), &rows[0]).unwrap_err() {
            CoreError::Mapping { sources, .. } => {
                assert_eq!(sources[0].column, "ObservationGuid");
                assert_eq!(sources[0].record, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_number_is_a_cell_format_error() {
        let rows = rows("ObservationGuid,PatientGuid,Value,Code\nO1,P1,abc,C\n");
        let err = map_row(&mapping(), &rows[0]).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Model(crt_model::ModelError::CellFormat { .. })
        ));
    }
}
