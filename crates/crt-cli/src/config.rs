//! JSON mapping configuration.
//!
//! A mapping names, per source file type, the header versions to accept and
//! how each row becomes an output record:
//!
//! ```json
//! {
//!   "batch": "emis-2024-01",
//!   "files": [{
//!     "schema": { "name": "CareRecord_Observation",
//!                 "versions": [{ "tag": "5.0", "headers": ["ObservationGuid", "PatientGuid", "Value"] }] },
//!     "kind": "Observation",
//!     "identity": "ObservationGuid",
//!     "fields": [{ "name": "value", "column": "Value", "type": "number" }],
//!     "references": [{ "field": "subject", "target": "Patient", "columns": ["PatientGuid"],
//!                      "provenance": "single", "policy": "required" }]
//!   }]
//! }
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use crt_core::{Provenance, ReferencePolicy};
use crt_ingest::FileSchema;
use crt_model::ResourceKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingConfig {
    /// Batch label for logs and the summary (default: input folder name).
    #[serde(default)]
    pub batch: Option<String>,
    pub files: Vec<FileMapping>,
}

/// How rows of one file type become records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileMapping {
    pub schema: FileSchema,
    pub kind: ResourceKind,
    /// Column holding the natural id. Records without one are anonymous.
    #[serde(default)]
    pub identity: Option<String>,
    /// Boolean column marking the row as a deletion.
    #[serde(default)]
    pub deleted: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldMapping>,
    #[serde(default)]
    pub references: Vec<ReferenceMapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldMapping {
    pub name: String,
    pub column: String,
    #[serde(rename = "type", default)]
    pub value_type: ValueType,
    /// Explicit chrono format for `date` fields.
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[default]
    Text,
    Integer,
    Number,
    Boolean,
    Date,
    DateTime,
}

/// A reference-valued field. Each non-blank id column adds one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReferenceMapping {
    pub field: String,
    pub target: ResourceKind,
    pub columns: Vec<String>,
    #[serde(default = "default_provenance")]
    pub provenance: Provenance,
    /// Overrides `--forward-refs` for this field.
    #[serde(default)]
    pub policy: Option<ReferencePolicy>,
    /// Extra cells cited by every entry; `multi` provenance only.
    #[serde(default)]
    pub context_columns: Vec<String>,
}

fn default_provenance() -> Provenance {
    Provenance::Single
}

impl MappingConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read mapping {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("parse mapping {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid mapping {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.files.is_empty() {
            bail!("no files declared");
        }
        let mut names = BTreeSet::new();
        for file in &self.files {
            if !names.insert(file.schema.name.to_ascii_lowercase()) {
                bail!("file type {} declared twice", file.schema.name);
            }
            file.validate()
                .with_context(|| format!("file type {}", file.schema.name))?;
        }
        Ok(())
    }

    pub fn schemas(&self) -> Vec<FileSchema> {
        self.files.iter().map(|file| file.schema.clone()).collect()
    }

    pub fn mapping_for(&self, schema: &str) -> Option<&FileMapping> {
        self.files.iter().find(|file| file.schema.name == schema)
    }
}

impl FileMapping {
    fn validate(&self) -> Result<()> {
        self.schema.validate()?;
        let declared: BTreeSet<&str> = self
            .schema
            .versions
            .iter()
            .flat_map(|version| version.headers.iter().map(String::as_str))
            .collect();
        let check = |column: &str| -> Result<()> {
            if declared.contains(column) {
                Ok(())
            } else {
                bail!("column {column} is not declared by any header version")
            }
        };

        if let Some(column) = &self.identity {
            check(column)?;
        }
        if let Some(column) = &self.deleted {
            check(column)?;
            if self.identity.is_none() {
                bail!("deleted column {column} needs an identity column");
            }
        }
        for field in &self.fields {
            check(&field.column)?;
            if field.format.is_some() && field.value_type != ValueType::Date {
                bail!("field {}: format is only used by date fields", field.name);
            }
        }
        for reference in &self.references {
            if reference.columns.is_empty() {
                bail!("reference {} has no id columns", reference.field);
            }
            for column in reference.columns.iter().chain(&reference.context_columns) {
                check(column)?;
            }
            if !reference.context_columns.is_empty() && reference.provenance != Provenance::Multi
            {
                bail!(
                    "reference {}: context columns need multi provenance",
                    reference.field
                );
            }
        }
        Ok(())
    }
}
