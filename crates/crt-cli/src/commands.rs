use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use crt_core::{BatchContext, CoreError, Filer, OutputRecord};
use crt_ingest::{CsvRowSource, IngestError, Row, list_csv_files, match_files};
use crt_model::ResourceKind;
use rayon::iter::ParallelBridge;
use tracing::{info, info_span, warn};

use crate::config::{FileMapping, MappingConfig};
use crate::mapper::map_row;
use crate::store::JsonLinesStore;
use crate::types::{FileReport, RunOptions, RunResult, SkippedFile};

const DEFAULT_OUTPUT: &str = "records.jsonl";

/// Resource kinds with whether they are administrative.
pub fn kinds() -> Vec<(ResourceKind, bool)> {
    ResourceKind::ALL
        .iter()
        .map(|kind| (*kind, kind.is_administrative()))
        .collect()
}

/// Reads every matched extract and files it as one batch.
pub fn run(options: &RunOptions) -> Result<RunResult> {
    let config = MappingConfig::load(&options.mapping)?;
    let label = config
        .batch
        .clone()
        .unwrap_or_else(|| derive_batch_label(&options.input_dir));
    let span = info_span!("run", batch = %label);
    let _guard = span.enter();

    let schemas = config.schemas();
    let files = list_csv_files(&options.input_dir)
        .with_context(|| format!("scan {}", options.input_dir.display()))?;
    let matched = match_files(&files, &schemas);

    let mut sources = Vec::new();
    let mut progress = Vec::new();
    let mut skipped_files = Vec::new();
    for (path, schema) in matched {
        let Some(mapping) = config.mapping_for(&schema.name) else {
            continue;
        };
        let source = match CsvRowSource::open(&path, schema) {
            Ok(source) => source,
            Err(err) if err.is_format_error() && !options.filer.strict => {
                warn!(path = %path.display(), error = %err, "file skipped");
                skipped_files.push(SkippedFile {
                    path,
                    reason: err.to_string(),
                });
                continue;
            }
            Err(err) => return Err(err).with_context(|| format!("open {}", path.display())),
        };
        progress.push(FileProgress::new(path, &schema.name, source.version()));
        sources.push((mapping, source));
    }
    info!(
        file_count = sources.len(),
        skipped_files = skipped_files.len(),
        "sources opened"
    );

    let output = options
        .output
        .clone()
        .unwrap_or_else(|| options.input_dir.join(DEFAULT_OUTPUT));
    let store = JsonLinesStore::create(&output)
        .with_context(|| format!("create {}", output.display()))?;
    let filer = Filer::new(store, options.filer);

    let mut pool = rayon::ThreadPoolBuilder::new();
    if let Some(threads) = options.threads {
        pool = pool.num_threads(threads);
    }
    let pool = pool.build().context("build worker pool")?;

    // Rows are pulled one at a time from the open files and handed to the
    // pool as they are read.
    let rows = sources
        .into_iter()
        .zip(&progress)
        .flat_map(|((mapping, source), file)| {
            source.map(move |row| {
                file.count(&row);
                (mapping, row)
            })
        })
        .par_bridge();

    let context = BatchContext::new(label);
    let summary = pool
        .install(|| filer.run_batch(context, rows, map_item))
        .context("batch aborted")?;
    let lines_written = filer
        .store()
        .finish()
        .with_context(|| format!("flush {}", output.display()))?;

    Ok(RunResult {
        output,
        lines_written,
        files: progress.into_iter().map(FileProgress::into_report).collect(),
        skipped_files,
        summary,
    })
}

/// Row counts for one open file, updated as the pool pulls its rows.
struct FileProgress {
    path: PathBuf,
    schema: String,
    version: String,
    rows: AtomicUsize,
    row_errors: AtomicUsize,
}

impl FileProgress {
    fn new(path: PathBuf, schema: &str, version: &str) -> Self {
        Self {
            path,
            schema: schema.to_string(),
            version: version.to_string(),
            rows: AtomicUsize::new(0),
            row_errors: AtomicUsize::new(0),
        }
    }

    fn count(&self, row: &Result<Row, IngestError>) {
        self.rows.fetch_add(1, Ordering::Relaxed);
        if row.is_err() {
            self.row_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn into_report(self) -> FileReport {
        FileReport {
            path: self.path,
            schema: self.schema,
            version: self.version,
            rows: self.rows.into_inner(),
            row_errors: self.row_errors.into_inner(),
        }
    }
}

fn map_item(
    (mapping, row): (&FileMapping, Result<Row, IngestError>),
) -> crt_core::Result<Vec<OutputRecord>> {
    let row = row.map_err(|err| CoreError::mapping(err.to_string(), Vec::new()))?;
    map_row(mapping, &row)
}

fn derive_batch_label(input_dir: &Path) -> String {
    input_dir
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| input_dir.display().to_string())
}
