#![deny(unsafe_code)]

/// Serializable coordinates of a source cell, kept in audit trails.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct SourceRef {
    /// Path of the source file as it was opened.
    pub source: String,
    /// Format version tag of the source file.
    pub version: String,
    /// Record number within the parsed input (1-based, excluding header).
    pub record: u64,
    /// Column name as declared by the header set.
    pub column: String,
}

impl std::fmt::Display for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} row {} column {}", self.source, self.record, self.column)
    }
}

/// Renders a list of source coordinates for log and error messages.
pub fn describe_sources(sources: &[SourceRef]) -> String {
    if sources.is_empty() {
        return "no source cells".to_string();
    }
    sources
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
