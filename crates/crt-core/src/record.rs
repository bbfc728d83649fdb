//! Output records under construction.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use crt_model::{Cell, ReferenceHandle, ResourceKind, SourceRef, StorageId};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::reference_list::{DeferredReferenceList, Provenance};

/// A mapped field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Text(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

/// A field value together with the cells it was read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceRef>,
}

/// A record being built by a field mapper.
///
/// Owned by the thread that builds it until [`crate::Filer::file`] takes it.
#[derive(Debug)]
pub struct OutputRecord {
    kind: ResourceKind,
    storage_id: StorageId,
    identity: Option<ReferenceHandle>,
    deleted: bool,
    fields: BTreeMap<String, FieldValue>,
    references: BTreeMap<String, DeferredReferenceList>,
}

impl OutputRecord {
    /// Record identified by a natural id. The storage id is derived from it.
    pub fn identified(kind: ResourceKind, natural_id: &str) -> Result<Self> {
        let identity = ReferenceHandle::new(kind, natural_id)?;
        let storage_id = StorageId::derive(&identity);
        Ok(Self::build(kind, storage_id, Some(identity)))
    }

    /// Record identified by a natural id with a storage id chosen by the caller.
    pub fn with_storage_id(
        kind: ResourceKind,
        natural_id: &str,
        storage_id: StorageId,
    ) -> Result<Self> {
        let identity = ReferenceHandle::new(kind, natural_id)?;
        Ok(Self::build(kind, storage_id, Some(identity)))
    }

    /// Record that nothing else references by natural id.
    pub fn anonymous(kind: ResourceKind, storage_id: StorageId) -> Self {
        Self::build(kind, storage_id, None)
    }

    /// Marks the record behind `natural_id` as deleted.
    pub fn deletion(kind: ResourceKind, natural_id: &str) -> Result<Self> {
        let mut record = Self::identified(kind, natural_id)?;
        record.deleted = true;
        Ok(record)
    }

    fn build(kind: ResourceKind, storage_id: StorageId, identity: Option<ReferenceHandle>) -> Self {
        Self {
            kind,
            storage_id,
            identity,
            deleted: false,
            fields: BTreeMap::new(),
            references: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn storage_id(&self) -> &StorageId {
        &self.storage_id
    }

    /// The natural id this record establishes when filed.
    pub fn identity(&self) -> Option<&ReferenceHandle> {
        self.identity.as_ref()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value, cells: &[Arc<Cell>]) {
        self.fields.insert(
            name.into(),
            FieldValue {
                value,
                sources: cells.iter().map(|cell| cell.source_ref()).collect(),
            },
        );
    }

    /// Copies a cell as text; blank and absent cells are skipped.
    pub fn copy_text(&mut self, name: impl Into<String>, cell: &Arc<Cell>) {
        if let Some(text) = cell.opt_str() {
            let text = text.to_string();
            self.set_field(name, Value::Text(text), std::slice::from_ref(cell));
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Returns the reference list for `field`, creating it with `provenance`
    /// on first use.
    pub fn references_mut(
        &mut self,
        field: &str,
        provenance: Provenance,
    ) -> &mut DeferredReferenceList {
        self.references
            .entry(field.to_string())
            .or_insert_with(|| DeferredReferenceList::new(provenance))
    }

    /// Attaches a prepared list, replacing any list already under `field`.
    pub fn attach_references(&mut self, field: impl Into<String>, list: DeferredReferenceList) {
        self.references.insert(field.into(), list);
    }

    pub fn references(&self) -> &BTreeMap<String, DeferredReferenceList> {
        &self.references
    }

    pub(crate) fn into_parts(self) -> RecordParts {
        RecordParts {
            kind: self.kind,
            storage_id: self.storage_id,
            identity: self.identity,
            deleted: self.deleted,
            fields: self.fields,
            references: self.references,
        }
    }
}

pub(crate) struct RecordParts {
    pub kind: ResourceKind,
    pub storage_id: StorageId,
    pub identity: Option<ReferenceHandle>,
    pub deleted: bool,
    pub fields: BTreeMap<String, FieldValue>,
    pub references: BTreeMap<String, DeferredReferenceList>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crt_model::SourceFile;

    #[test]
    fn identified_record_derives_storage_id() {
        let record = OutputRecord::identified(ResourceKind::Patient, "P1").unwrap();
        let handle = ReferenceHandle::new(ResourceKind::Patient, "P1").unwrap();
        assert_eq!(record.storage_id(), &StorageId::derive(&handle));
        assert_eq!(record.identity(), Some(&handle));
    }

    #[test]
    fn copy_text_skips_blank_cells() {
        let file = SourceFile::new("Admin_Patient.csv", "5.0");
        let blank = Cell::new(Arc::clone(&file), 1, Arc::from("Title"), " ");
        let given = Cell::new(file, 1, Arc::from("GivenName"), "Ann");

        let mut record = OutputRecord::identified(ResourceKind::Patient, "P1").unwrap();
        record.copy_text("title", &blank);
        record.copy_text("given", &given);

        assert!(record.field("title").is_none());
        let given = record.field("given").unwrap();
        assert_eq!(given.value, Value::Text("Ann".to_string()));
        assert_eq!(given.sources[0].column, "GivenName");
    }

    #[test]
    fn references_mut_reuses_list() {
        let mut record = OutputRecord::identified(ResourceKind::Encounter, "E1").unwrap();
        record
            .references_mut("participant", Provenance::Single)
            .append_to(ResourceKind::Practitioner, "U1", &[])
            .unwrap();
        record
            .references_mut("participant", Provenance::Single)
            .append_to(ResourceKind::Practitioner, "U2", &[])
            .unwrap();
        assert_eq!(record.references()["participant"].len(), 2);
    }
}
