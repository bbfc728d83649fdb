//! Row-by-row reading of vendor CSV extracts.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use csv::{Reader, ReaderBuilder, StringRecord};
use crt_model::{Cell, SourceFile};
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::schema::{ColumnIndex, FileSchema};

/// One data row.
///
/// Cells are built once when the row is read, one per known column, and
/// handed out by reference: every caller asking for the same column gets the
/// same allocation.
#[derive(Debug, Clone)]
pub struct Row {
    file: Arc<SourceFile>,
    number: u64,
    index: Arc<ColumnIndex>,
    cells: Box<[Arc<Cell>]>,
}

impl Row {
    fn build(
        file: &Arc<SourceFile>,
        number: u64,
        index: &Arc<ColumnIndex>,
        values: &StringRecord,
    ) -> Self {
        let cells = index
            .known()
            .iter()
            .enumerate()
            .map(|(slot, name)| {
                let file = Arc::clone(file);
                let name = Arc::clone(name);
                match values.get(slot) {
                    Some(value) => Cell::new(file, number, name, value),
                    None => Cell::absent(file, number, name),
                }
            })
            .collect();
        Self {
            file: Arc::clone(file),
            number,
            index: Arc::clone(index),
            cells,
        }
    }

    /// 1-based data row number; the header row is not counted.
    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn file(&self) -> &Arc<SourceFile> {
        &self.file
    }

    /// Cell for `column`. Columns declared only by other header versions
    /// come back absent; `None` means the schema never names the column.
    pub fn cell(&self, column: &str) -> Option<Arc<Cell>> {
        let slot = self.index.slot(column)?;
        self.cells.get(slot).map(Arc::clone)
    }

    /// All declared cells in file order.
    pub fn cells(&self) -> &[Arc<Cell>] {
        &self.cells[..self.index.declared().len()]
    }
}

/// Iterator over the data rows of one file.
pub struct CsvRowSource<R = File> {
    path: PathBuf,
    file: Arc<SourceFile>,
    index: Arc<ColumnIndex>,
    reader: Reader<R>,
    record: StringRecord,
    next_row: u64,
    done: bool,
}

impl CsvRowSource<File> {
    pub fn open(path: &Path, schema: &FileSchema) -> Result<Self> {
        if !path.is_file() {
            return Err(IngestError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let file = File::open(path).map_err(|source| IngestError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(path, file, schema)
    }
}

impl<R: Read> CsvRowSource<R> {
    /// Reads the header row and detects the file's version. `path` labels
    /// cells and errors.
    pub fn from_reader(path: &Path, input: R, schema: &FileSchema) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(input);

        let headers: Vec<String> = reader
            .headers()
            .map_err(|source| IngestError::Csv {
                path: path.to_path_buf(),
                source,
            })?
            .iter()
            .map(|h| h.trim_matches('\u{feff}').trim().to_string())
            .collect();
        if headers.iter().all(String::is_empty) {
            return Err(IngestError::EmptyFile {
                path: path.to_path_buf(),
            });
        }

        let index = schema.detect_version(path, &headers)?;
        debug!(
            path = %path.display(),
            schema = %schema.name,
            version = index.version(),
            "header version detected"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file: SourceFile::new(path, index.version()),
            index: Arc::new(index),
            reader,
            record: StringRecord::new(),
            next_row: 1,
            done: false,
        })
    }

    pub fn version(&self) -> &str {
        self.index.version()
    }

    pub fn headers(&self) -> &[Arc<str>] {
        self.index.declared()
    }

    pub fn source_file(&self) -> &Arc<SourceFile> {
        &self.file
    }
}

impl<R: Read> Iterator for CsvRowSource<R> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        // The parser consumes a record even when it fails, so the number is
        // taken before reading to keep later rows aligned.
        let number = self.next_row;
        match self.reader.read_record(&mut self.record) {
            Ok(false) => {
                self.done = true;
                None
            }
            Err(source) => {
                self.next_row += 1;
                if source.is_io_error() {
                    self.done = true;
                }
                Some(Err(IngestError::RowParse {
                    path: self.path.clone(),
                    row: number,
                    source,
                }))
            }
            Ok(true) => {
                self.next_row += 1;
                let expected = self.index.declared().len();
                if self.record.len() != expected {
                    return Some(Err(IngestError::RowShape {
                        path: self.path.clone(),
                        row: number,
                        expected,
                        actual: self.record.len(),
                    }));
                }
                Some(Ok(Row::build(&self.file, number, &self.index, &self.record)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> FileSchema {
        FileSchema::new("Admin_Patient")
            .with_version("5.0", &["PatientGuid", "Surname"])
            .with_version("5.3", &["PatientGuid", "Surname", "NhsNumber"])
    }

    fn source(text: &str) -> Result<CsvRowSource<&[u8]>> {
        CsvRowSource::from_reader(Path::new("Admin_Patient.csv"), text.as_bytes(), &schema())
    }

    #[test]
    fn reads_rows_with_coordinates() {
        let mut rows = source("\u{feff}PatientGuid,Surname\nP1,Smith\nP2,\n").unwrap();
        let first = rows.next().unwrap().unwrap();
        let cell = first.cell("PatientGuid").unwrap();
        assert_eq!(cell.as_str(), "P1");
        assert_eq!(cell.row(), 1);
        assert_eq!(cell.file().version(), "5.0");

        let second = rows.next().unwrap().unwrap();
        assert!(second.cell("Surname").unwrap().is_empty());
        assert!(second.cell("NhsNumber").unwrap().is_absent());
        assert!(second.cell("Unknown").is_none());
        assert!(rows.next().is_none());
    }

    #[test]
    fn short_row_is_a_row_error() {
        let mut rows = source("PatientGuid,Surname\nP1\nP2,Jones\n").unwrap();
        let err = rows.next().unwrap().unwrap_err();
        assert!(err.is_row_error());
        assert!(matches!(err, IngestError::RowShape { row: 1, actual: 1, .. }));
        assert_eq!(rows.next().unwrap().unwrap().number(), 2);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(source(""), Err(IngestError::EmptyFile { .. })));
    }

    #[test]
    fn unparsable_row_keeps_later_row_numbers() {
        let mut input = b"PatientGuid,Surname\nP1,".to_vec();
        input.extend_from_slice(&[0xff, 0xfe]);
        input.extend_from_slice(b"\nP2,Jones\n");
        let mut rows = CsvRowSource::from_reader(
            Path::new("Admin_Patient.csv"),
            input.as_slice(),
            &schema(),
        )
        .unwrap();

        let err = rows.next().unwrap().unwrap_err();
        assert!(err.is_row_error());
        assert!(matches!(err, IngestError::RowParse { row: 1, .. }));
        let row = rows.next().unwrap().unwrap();
        assert_eq!(row.number(), 2);
        assert_eq!(row.cell("PatientGuid").unwrap().row(), 2);
        assert!(rows.next().is_none());
    }

    #[test]
    fn cells_are_built_once_per_row_and_column() {
        let mut rows = source("PatientGuid,Surname\nP1,Smith\n").unwrap();
        let row = rows.next().unwrap().unwrap();
        let first = row.cell("PatientGuid").unwrap();
        let again = row.cell("PatientGuid").unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert!(Arc::ptr_eq(&first, &row.cells()[0]));
        assert!(Arc::ptr_eq(
            &row.cell("NhsNumber").unwrap(),
            &row.cell("NhsNumber").unwrap()
        ));

        let copy = row.clone();
        assert!(Arc::ptr_eq(&first, &copy.cell("PatientGuid").unwrap()));
    }

    #[test]
    fn cells_share_one_source_file() {
        let mut rows = source("PatientGuid,Surname,NhsNumber\nP1,Smith,123\n").unwrap();
        let row = rows.next().unwrap().unwrap();
        let cells = row.cells();
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[2].column(), "NhsNumber");
        assert!(std::ptr::eq(cells[0].file(), cells[1].file()));
    }
}
