//! Record model, existing-key snapshot and error taxonomy for profile-sync.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "psync-core";

/// Fixed column layout of one site variant. Must match the sink's column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    columns: Vec<String>,
    identifier_column: String,
}

impl RecordSchema {
    pub fn new(columns: &[&str], identifier_column: &str) -> Self {
        debug_assert!(
            columns.contains(&identifier_column),
            "identifier column {identifier_column} missing from schema"
        );
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            identifier_column: identifier_column.to_string(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn identifier_column(&self) -> &str {
        &self.identifier_column
    }

    /// Zero-based position of the identifier column.
    pub fn identifier_index(&self) -> usize {
        self.columns
            .iter()
            .position(|c| *c == self.identifier_column)
            .unwrap_or_default()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("profile record identifier must not be empty")]
    EmptyIdentifier,
}

/// One listing entry as scraped during the current run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    identifier: String,
    fields: BTreeMap<String, String>,
}

impl ProfileRecord {
    pub fn new(
        identifier: impl Into<String>,
        fields: BTreeMap<String, String>,
    ) -> Result<Self, RecordError> {
        let identifier = identifier.into().trim().to_string();
        if identifier.is_empty() {
            return Err(RecordError::EmptyIdentifier);
        }
        Ok(Self { identifier, fields })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn field(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Consumes the record and returns a copy carrying `extra` on top of the
    /// existing fields. The identifier never changes.
    pub fn with_fields<I>(self, extra: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut fields = self.fields;
        fields.extend(extra);
        Self {
            identifier: self.identifier,
            fields,
        }
    }

    /// Renders the record in schema column order; absent columns are empty strings.
    pub fn to_row(&self, schema: &RecordSchema) -> Vec<String> {
        schema
            .columns()
            .iter()
            .map(|column| {
                if let Some(value) = self.fields.get(column) {
                    return value.clone();
                }
                if column == schema.identifier_column() {
                    return self.identifier.clone();
                }
                String::new()
            })
            .collect()
    }
}

/// Identifiers already present in a sink when the run started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistingKeySet {
    keys: HashSet<String>,
}

impl ExistingKeySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the set from raw sink cells. Blank cells are ignored.
    pub fn from_cells<I, S>(cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        cells
            .into_iter()
            .map(|cell| cell.as_ref().trim().to_string())
            .filter(|cell| !cell.is_empty())
            .collect()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.keys.contains(identifier)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys held by every set. `None` when no set was supplied.
    pub fn intersection<I>(sets: I) -> Option<Self>
    where
        I: IntoIterator<Item = ExistingKeySet>,
    {
        sets.into_iter().reduce(|acc, next| Self {
            keys: acc.keys.intersection(&next.keys).cloned().collect(),
        })
    }
}

impl FromIterator<String> for ExistingKeySet {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

/// New records of one run, in listing order, unique by identifier.
#[derive(Debug, Clone, Default)]
pub struct SyncBatch {
    records: Vec<ProfileRecord>,
    seen: HashSet<String>,
}

impl SyncBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `record` unless its identifier is already in the batch.
    pub fn push(&mut self, record: ProfileRecord) -> bool {
        if !self.seen.insert(record.identifier().to_string()) {
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn records(&self) -> &[ProfileRecord] {
        &self.records
    }

    pub fn identifiers(&self) -> Vec<&str> {
        self.records.iter().map(ProfileRecord::identifier).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Read-only view of the records a sink holding `keys` still lacks.
    pub fn missing_from(&self, keys: Option<&ExistingKeySet>) -> Vec<&ProfileRecord> {
        self.records
            .iter()
            .filter(|r| keys.map_or(true, |k| !k.contains(r.identifier())))
            .collect()
    }
}

/// How the spreadsheet interprets appended cells. `Raw` stores scraped text
/// verbatim; `UserEntered` lets the sheet parse formulas, dates and numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SheetInput {
    #[default]
    Raw,
    UserEntered,
}

impl SheetInput {
    /// Value of the `valueInputOption` query parameter.
    pub fn as_str(self) -> &'static str {
        match self {
            SheetInput::Raw => "RAW",
            SheetInput::UserEntered => "USER_ENTERED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    DetailFetchFailed,
    PartialExtraction,
    SkippedCard,
}

/// Non-fatal, per-candidate problem surfaced at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn push(
        &mut self,
        kind: DiagnosticKind,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.entries.push(Diagnostic {
            kind,
            subject: subject.into(),
            message: message.into(),
        });
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.entries.iter().filter(|d| d.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }
}

/// Run-level failures. Each maps to a distinct process exit code.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("sink {sink} unavailable: {source:#}")]
    SinkUnavailable {
        sink: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("listing fetch failed for {url}: {source:#}")]
    ListingFetchFailed {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("sink {sink} write failed after {written}/{total} rows: {source:#}")]
    SinkWriteFailed {
        sink: String,
        written: usize,
        total: usize,
        #[source]
        source: anyhow::Error,
    },
}

impl SyncError {
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::Config(_) => 2,
            SyncError::SinkUnavailable { .. } => 3,
            SyncError::ListingFetchFailed { .. } => 4,
            SyncError::SinkWriteFailed { .. } => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> ProfileRecord {
        let mut fields = BTreeMap::new();
        fields.insert("url".to_string(), id.to_string());
        ProfileRecord::new(id, fields).unwrap()
    }

    #[test]
    fn empty_identifier_is_rejected() {
        assert_eq!(
            ProfileRecord::new("   ", BTreeMap::new()),
            Err(RecordError::EmptyIdentifier)
        );
    }

    #[test]
    fn row_follows_schema_order_with_empty_defaults() {
        let schema = RecordSchema::new(&["name", "image", "url", "comment"], "url");
        let rec = record("https://example.test/p/1")
            .with_fields([("name".to_string(), "Aki".to_string())]);
        assert_eq!(
            rec.to_row(&schema),
            vec![
                "Aki".to_string(),
                String::new(),
                "https://example.test/p/1".to_string(),
                String::new()
            ]
        );
        assert_eq!(schema.identifier_index(), 2);
    }

    #[test]
    fn with_fields_keeps_identifier() {
        let rec = record("a").with_fields([("url".to_string(), "b".to_string())]);
        assert_eq!(rec.identifier(), "a");
        assert_eq!(rec.field("url"), Some("b"));
    }

    #[test]
    fn key_set_ignores_blank_cells() {
        let keys = ExistingKeySet::from_cells(["a", "", "  ", " b "]);
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("b"));
    }

    #[test]
    fn intersection_keeps_only_shared_keys() {
        let sheet = ExistingKeySet::from_cells(["a", "b", "c"]);
        let mirror = ExistingKeySet::from_cells(["b", "c", "d"]);
        let both = ExistingKeySet::intersection([sheet, mirror]).unwrap();
        assert!(both.contains("b") && both.contains("c"));
        assert!(!both.contains("a") && !both.contains("d"));
        assert!(ExistingKeySet::intersection(Vec::new()).is_none());
    }

    #[test]
    fn batch_rejects_repeated_identifier() {
        let mut batch = SyncBatch::new();
        assert!(batch.push(record("a")));
        assert!(!batch.push(record("a")));
        assert!(batch.push(record("b")));
        assert_eq!(batch.identifiers(), vec!["a", "b"]);
    }

    #[test]
    fn missing_from_filters_against_sink_keys() {
        let mut batch = SyncBatch::new();
        batch.push(record("a"));
        batch.push(record("b"));
        let keys = ExistingKeySet::from_cells(["a"]);
        let rows = batch.missing_from(Some(&keys));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].identifier(), "b");
        assert_eq!(batch.missing_from(None).len(), 2);
    }

    #[test]
    fn diagnostics_are_counted_by_kind() {
        let mut diags = Diagnostics::default();
        diags.push(DiagnosticKind::DetailFetchFailed, "b", "timeout");
        diags.push(DiagnosticKind::PartialExtraction, "c", "no fields");
        assert_eq!(diags.count(DiagnosticKind::DetailFetchFailed), 1);
        assert_eq!(diags.len(), 2);
        let json = serde_json::to_value(&diags).unwrap();
        assert_eq!(json["entries"][0]["kind"], "detail_fetch_failed");
    }

    #[test]
    fn exit_codes_are_distinct_and_non_zero() {
        let codes = [
            SyncError::Config("x".into()).exit_code(),
            SyncError::SinkUnavailable {
                sink: "s".into(),
                source: anyhow::anyhow!("x"),
            }
            .exit_code(),
            SyncError::ListingFetchFailed {
                url: "u".into(),
                source: anyhow::anyhow!("x"),
            }
            .exit_code(),
            SyncError::SinkWriteFailed {
                sink: "s".into(),
                written: 0,
                total: 1,
                source: anyhow::anyhow!("x"),
            }
            .exit_code(),
        ];
        assert!(codes.iter().all(|c| *c != 0));
        let unique: HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
    }

    #[test]
    fn sheet_input_defaults_to_raw() {
        assert_eq!(SheetInput::default(), SheetInput::Raw);
        assert_eq!(SheetInput::Raw.as_str(), "RAW");
        assert_eq!(SheetInput::UserEntered.as_str(), "USER_ENTERED");
    }
}
