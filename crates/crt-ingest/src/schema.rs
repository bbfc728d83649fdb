//! Declared header sets for source file types.
//!
//! Vendors revise their extract formats; each revision is a
//! [`HeaderVersion`] with its own ordered header list. A file is read with
//! the version whose headers match its header row exactly.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

/// One revision of a file type's header row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderVersion {
    pub tag: String,
    pub headers: Vec<String>,
}

/// A source file type and the header versions it may appear in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSchema {
    /// File type name, matched against file names (e.g. `Admin_Patient`).
    pub name: String,
    pub versions: Vec<HeaderVersion>,
}

impl FileSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            versions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_version(mut self, tag: impl Into<String>, headers: &[&str]) -> Self {
        self.versions.push(HeaderVersion {
            tag: tag.into(),
            headers: headers.iter().map(|h| (*h).to_string()).collect(),
        });
        self
    }

    /// Checks that the schema has versions and no version repeats a header.
    pub fn validate(&self) -> Result<()> {
        if self.versions.is_empty() {
            return Err(self.invalid("no header versions declared"));
        }
        let mut tags = BTreeSet::new();
        for version in &self.versions {
            if !tags.insert(version.tag.as_str()) {
                return Err(self.invalid(format!("duplicate version tag {}", version.tag)));
            }
            let mut seen = BTreeSet::new();
            for header in &version.headers {
                if header.trim().is_empty() {
                    return Err(self.invalid(format!("empty header in version {}", version.tag)));
                }
                if !seen.insert(header.as_str()) {
                    return Err(self.invalid(format!(
                        "duplicate header {header} in version {}",
                        version.tag
                    )));
                }
            }
        }
        Ok(())
    }

    /// True when the file stem contains the schema name (case-insensitive).
    pub fn matches_file(&self, path: &Path) -> bool {
        path.file_stem()
            .and_then(|stem| stem.to_str())
            .is_some_and(|stem| {
                stem.to_ascii_lowercase()
                    .contains(&self.name.to_ascii_lowercase())
            })
    }

    /// Picks the version whose headers equal `found`, in order.
    pub fn detect_version(&self, path: &Path, found: &[String]) -> Result<ColumnIndex> {
        if let Some(version) = self
            .versions
            .iter()
            .find(|version| version.headers.iter().eq(found.iter()))
        {
            return Ok(ColumnIndex::new(self, version));
        }

        let found_set: BTreeSet<&str> = found.iter().map(String::as_str).collect();
        let closest = self
            .versions
            .iter()
            .max_by_key(|version| {
                version
                    .headers
                    .iter()
                    .filter(|h| found_set.contains(h.as_str()))
                    .count()
            })
            .ok_or_else(|| self.invalid("no header versions declared"))?;
        let declared: BTreeSet<&str> = closest.headers.iter().map(String::as_str).collect();

        Err(IngestError::HeaderMismatch {
            path: PathBuf::from(path),
            schema: self.name.clone(),
            closest: closest.tag.clone(),
            missing: closest
                .headers
                .iter()
                .filter(|h| !found_set.contains(h.as_str()))
                .cloned()
                .collect(),
            unexpected: found
                .iter()
                .filter(|h| !declared.contains(h.as_str()))
                .cloned()
                .collect(),
        })
    }

    fn invalid(&self, reason: impl Into<String>) -> IngestError {
        IngestError::InvalidSchema {
            schema: self.name.clone(),
            reason: reason.into(),
        }
    }
}

/// Column layout of one file, resolved against its schema.
///
/// Columns declared by other versions of the schema are known but absent:
/// rows report them as absent cells rather than as unknown columns. Every
/// known column has a slot; the detected version's columns come first, in
/// file order.
#[derive(Debug)]
pub struct ColumnIndex {
    version: String,
    known: Vec<Arc<str>>,
    declared: usize,
    slots: HashMap<Arc<str>, usize>,
}

impl ColumnIndex {
    fn new(schema: &FileSchema, version: &HeaderVersion) -> Self {
        let mut known: Vec<Arc<str>> = version
            .headers
            .iter()
            .map(|h| Arc::from(h.as_str()))
            .collect();
        let declared = known.len();
        for other in &schema.versions {
            for header in &other.headers {
                if !known.iter().any(|k| **k == **header) {
                    known.push(Arc::from(header.as_str()));
                }
            }
        }
        let slots = known
            .iter()
            .enumerate()
            .map(|(slot, name)| (Arc::clone(name), slot))
            .collect();
        Self {
            version: version.tag.clone(),
            known,
            declared,
            slots,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Headers of the detected version, in file order.
    pub fn declared(&self) -> &[Arc<str>] {
        &self.known[..self.declared]
    }

    /// Declared columns followed by the columns only other versions declare.
    pub fn known(&self) -> &[Arc<str>] {
        &self.known
    }

    /// Slot of a known column in [`ColumnIndex::known`].
    pub fn slot(&self, column: &str) -> Option<usize> {
        self.slots.get(column).copied()
    }

    /// `Some(Some(i))` for a declared column, `Some(None)` for a column only
    /// other versions declare, `None` for a column the schema never names.
    pub fn lookup(&self, column: &str) -> Option<(&Arc<str>, Option<usize>)> {
        let slot = self.slot(column)?;
        Some((&self.known[slot], (slot < self.declared).then_some(slot)))
    }
}
