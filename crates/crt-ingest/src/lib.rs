//! Discovery and versioned reading of vendor CSV extracts.
//!
//! Each data row is exposed as provenance-tracked [`crt_model::Cell`]s so
//! that values carried into output records can always be traced back to
//! their source position.

pub mod discovery;
pub mod error;
pub mod reader;
pub mod schema;

pub use discovery::{list_csv_files, match_files};
pub use error::{IngestError, Result};
pub use reader::{CsvRowSource, Row};
pub use schema::{ColumnIndex, FileSchema, HeaderVersion};
