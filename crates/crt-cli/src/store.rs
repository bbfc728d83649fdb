//! Append-only JSON-lines record store.
//!
//! Every saved record and every later reference patch becomes one line, in
//! the order the filer issued them. [`replay`] folds a log back into final
//! records.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crt_core::{FiledRecord, RecordStore, ReferencePatch, StoreError};
use crt_model::StorageId;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogLine<'a> {
    Save { record: &'a FiledRecord },
    Patch { patch: &'a ReferencePatch },
}

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum OwnedLogLine {
    Save { record: FiledRecord },
    Patch { patch: ReferencePatch },
}

/// Per record, whether each reference entry is already terminal.
type EntryStates = BTreeMap<String, Vec<bool>>;

struct Inner {
    writer: BufWriter<File>,
    records: HashMap<StorageId, EntryStates>,
    lines: usize,
}

/// Writes records and patches to one JSON-lines file.
pub struct JsonLinesStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl JsonLinesStore {
    /// Creates (or truncates) the output file.
    pub fn create(path: &Path) -> Result<Self, StoreError> {
        let file = File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner {
                writer: BufWriter::new(file),
                records: HashMap::new(),
                lines: 0,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes buffered lines and returns how many were written.
    pub fn finish(&self) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        inner.writer.flush()?;
        Ok(inner.lines)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl Inner {
    fn write(&mut self, line: &LogLine<'_>) -> Result<(), StoreError> {
        serde_json::to_writer(&mut self.writer, line)?;
        self.writer.write_all(b"\n")?;
        self.lines += 1;
        Ok(())
    }
}

impl RecordStore for JsonLinesStore {
    fn save(&self, record: &FiledRecord) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.records.contains_key(&record.storage_id) {
            return Err(StoreError::DuplicateStorageId {
                storage_id: record.storage_id.to_string(),
            });
        }
        inner.write(&LogLine::Save { record })?;
        let states = record
            .references
            .iter()
            .map(|(field, entries)| {
                let terminal = entries.iter().map(|e| e.state.is_terminal()).collect();
                (field.clone(), terminal)
            })
            .collect();
        inner.records.insert(record.storage_id.clone(), states);
        Ok(())
    }

    fn apply_patch(&self, patch: &ReferencePatch) -> Result<(), StoreError> {
        let location = &patch.location;
        let mut inner = self.lock()?;
        let terminal = inner
            .records
            .get_mut(&location.record)
            .ok_or_else(|| StoreError::UnknownRecord {
                storage_id: location.record.to_string(),
            })?
            .get_mut(&*location.field)
            .and_then(|entries| entries.get_mut(location.index))
            .ok_or_else(|| StoreError::UnknownEntry {
                storage_id: location.record.to_string(),
                field: location.field.to_string(),
                index: location.index,
            })?;
        if *terminal {
            return Err(StoreError::RejectedPatch {
                storage_id: location.record.to_string(),
                message: format!("{}[{}] is already final", location.field, location.index),
            });
        }
        *terminal = true;
        inner.write(&LogLine::Patch { patch })
    }
}

/// Reads a log and applies its patches, returning records in save order.
pub fn replay(path: &Path) -> Result<Vec<FiledRecord>, StoreError> {
    let reader = BufReader::new(File::open(path)?);
    let mut records: Vec<FiledRecord> = Vec::new();
    let mut positions: HashMap<StorageId, usize> = HashMap::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line)? {
            OwnedLogLine::Save { record } => {
                positions.insert(record.storage_id.clone(), records.len());
                records.push(record);
            }
            OwnedLogLine::Patch { patch } => {
                let location = &patch.location;
                let record = positions
                    .get(&location.record)
                    .and_then(|i| records.get_mut(*i))
                    .ok_or_else(|| StoreError::UnknownRecord {
                        storage_id: location.record.to_string(),
                    })?;
                let entry = record
                    .references
                    .get_mut(&*location.field)
                    .and_then(|entries| entries.get_mut(location.index))
                    .ok_or_else(|| StoreError::UnknownEntry {
                        storage_id: location.record.to_string(),
                        field: location.field.to_string(),
                        index: location.index,
                    })?;
                entry
                    .transition(location, patch.state.clone())
                    .map_err(|err| StoreError::RejectedPatch {
                        storage_id: location.record.to_string(),
                        message: err.to_string(),
                    })?;
            }
        }
    }
    Ok(records)
}
