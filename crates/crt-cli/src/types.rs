use std::path::PathBuf;

use crt_core::{BatchSummary, FilerOptions};

/// Inputs of one `crt run`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mapping: PathBuf,
    pub input_dir: PathBuf,
    pub output: Option<PathBuf>,
    pub filer: FilerOptions,
    pub threads: Option<usize>,
}

/// One source file read during the run.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    pub schema: String,
    pub version: String,
    pub rows: usize,
    pub row_errors: usize,
}

/// A file that could not be read with its schema.
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub output: PathBuf,
    pub lines_written: usize,
    pub files: Vec<FileReport>,
    pub skipped_files: Vec<SkippedFile>,
    pub summary: BatchSummary,
}
