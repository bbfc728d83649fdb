//! File discovery for extract folders.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{IngestError, Result};
use crate::schema::FileSchema;

/// Lists all CSV files in a directory.
///
/// Returns files sorted by filename.
pub fn list_csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(IngestError::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }

    let entries = std::fs::read_dir(dir).map_err(|e| IngestError::DirectoryRead {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut files = Vec::new();
    for entry_result in entries {
        let entry = entry_result.map_err(|e| IngestError::DirectoryRead {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if is_csv {
            files.push(path);
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Pairs each file with the first schema whose name it contains.
///
/// Schemas are tried longest name first so `Admin_PatientAddress` wins over
/// `Admin_Patient`. Files matching no schema are logged and skipped.
pub fn match_files<'a>(
    files: &[PathBuf],
    schemas: &'a [FileSchema],
) -> Vec<(PathBuf, &'a FileSchema)> {
    let mut ordered: Vec<&FileSchema> = schemas.iter().collect();
    ordered.sort_by(|a, b| b.name.len().cmp(&a.name.len()));

    let mut matched = Vec::new();
    for path in files {
        match ordered.iter().find(|schema| schema.matches_file(path)) {
            Some(schema) => matched.push((path.clone(), *schema)),
            None => warn!(path = %path.display(), "no schema matches file, skipping"),
        }
    }
    matched
}
