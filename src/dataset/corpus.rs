//! Labeled corpus records and the file formats they are read from.

use crate::error::DatasetError;
use crate::message::Category;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// One row of a labeled corpus. Every field is optional on the wire so a
/// missing column is counted instead of failing the whole file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusRecord {
    #[serde(default, alias = "sender")]
    pub email: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

impl CorpusRecord {
    pub fn new(subject: &str, body: &str, label: &str) -> Self {
        Self {
            email: None,
            subject: Some(subject.to_string()),
            body: Some(body.to_string()),
            date: None,
            label: Some(label.to_string()),
        }
    }

    pub fn with_sender(mut self, sender: &str) -> Self {
        self.email = Some(sender.to_string());
        self
    }

    pub fn with_date(mut self, date: &str) -> Self {
        self.date = Some(date.to_string());
        self
    }

    /// Category of this record, or why it has none.
    pub fn category(&self) -> Result<Category, SkipReason> {
        match self.label.as_deref().map(str::trim) {
            None | Some("") => Err(SkipReason::Unlabeled),
            Some(label) => Category::from_label(label)
                .ok_or_else(|| SkipReason::UnrecognizedLabel(label.to_string())),
        }
    }
}

/// Why a record did not become a training example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    Unlabeled,
    UnrecognizedLabel(String),
    Malformed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Unlabeled => write!(f, "missing label"),
            SkipReason::UnrecognizedLabel(label) => write!(f, "unrecognized label `{label}`"),
            SkipReason::Malformed(reason) => write!(f, "malformed record: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordIssue {
    /// Zero-based position of the record in its source.
    pub index: usize,
    pub reason: SkipReason,
}

/// Records of one corpus plus the rows that could not even be parsed.
/// Every record keeps its zero-based position in the source, so issues
/// found later point at the right row.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    records: Vec<(usize, CorpusRecord)>,
    pub unparsed: Vec<RecordIssue>,
}

impl Corpus {
    pub fn from_records(records: Vec<CorpusRecord>) -> Self {
        Self {
            records: records.into_iter().enumerate().collect(),
            unparsed: Vec::new(),
        }
    }

    pub fn push_record(&mut self, position: usize, record: CorpusRecord) {
        self.records.push((position, record));
    }

    pub fn push_unparsed(&mut self, index: usize, reason: SkipReason) {
        self.unparsed.push(RecordIssue { index, reason });
    }

    /// Parsed records in source order.
    pub fn records(&self) -> impl Iterator<Item = &CorpusRecord> {
        self.records.iter().map(|(_, record)| record)
    }

    /// Parsed records with their source positions.
    pub fn positioned(&self) -> impl Iterator<Item = (usize, &CorpusRecord)> {
        self.records.iter().map(|(position, record)| (*position, record))
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn into_records(self) -> Vec<CorpusRecord> {
        self.records.into_iter().map(|(_, record)| record).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len() + self.unparsed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build a corpus from the elements of a parsed document. An element
    /// that does not decode as a record is kept as an issue at its position.
    fn from_elements<T, E, F>(elements: Vec<T>, decode: F) -> Self
    where
        F: Fn(T) -> Result<CorpusRecord, E>,
        E: fmt::Display,
    {
        let mut corpus = Corpus::default();
        for (index, element) in elements.into_iter().enumerate() {
            match decode(element) {
                Ok(record) => corpus.push_record(index, record),
                Err(e) => {
                    log::debug!("Skipping corpus element {}: {}", index, e);
                    corpus.push_unparsed(index, SkipReason::Malformed(e.to_string()));
                }
            }
        }
        corpus
    }
}

/// Read a corpus file. The format follows the extension: JSON Lines
/// (`.jsonl`, `.ndjson`), a JSON array (`.json`) or a YAML sequence
/// (`.yaml`, `.yml`). Only a document that is not a sequence at all fails;
/// single bad elements are recorded and skipped.
pub fn load_corpus<P: AsRef<Path>>(path: P) -> Result<Corpus, DatasetError> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    let content = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: display.clone(),
        source,
    })?;
    let parse_error = |reason: String| DatasetError::Parse {
        path: display.clone(),
        reason,
    };

    let corpus = match extension.as_str() {
        "jsonl" | "ndjson" => parse_json_lines(&content),
        "json" => {
            let elements: Vec<serde_json::Value> =
                serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?;
            Corpus::from_elements(elements, serde_json::from_value::<CorpusRecord>)
        }
        "yaml" | "yml" => {
            let elements: Vec<serde_yaml::Value> =
                serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))?;
            Corpus::from_elements(elements, serde_yaml::from_value::<CorpusRecord>)
        }
        other => return Err(DatasetError::UnsupportedFormat(other.to_string())),
    };

    log::info!(
        "Loaded corpus {} with {} records ({} unparseable)",
        display,
        corpus.record_count(),
        corpus.unparsed.len()
    );
    Ok(corpus)
}

/// One JSON object per line. Blank lines are ignored, broken lines are
/// recorded and skipped.
pub fn parse_json_lines(content: &str) -> Corpus {
    let rows: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    Corpus::from_elements(rows, |line| serde_json::from_str::<CorpusRecord>(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_record_category() {
        assert_eq!(
            CorpusRecord::new("a", "b", "spam").category(),
            Ok(Category::Spam)
        );
        assert_eq!(
            CorpusRecord::new("a", "b", "  ").category(),
            Err(SkipReason::Unlabeled)
        );
        assert_eq!(
            CorpusRecord::new("a", "b", "promo").category(),
            Err(SkipReason::UnrecognizedLabel("promo".to_string()))
        );
    }

    #[test]
    fn test_json_lines_skip_broken_rows() {
        let content = r#"{"email":"a@x.com","subject":"hi","body":"there","label":"ham"}

{"subject": broken
{"sender":"b@y.edu","subject":"exam","label":"university notice"}
"#;
        let corpus = parse_json_lines(content);
        assert_eq!(corpus.record_count(), 2);
        assert_eq!(corpus.unparsed.len(), 1);
        assert_eq!(corpus.unparsed[0].index, 1);
        let (position, record) = corpus.positioned().nth(1).unwrap();
        assert_eq!(position, 2);
        assert_eq!(record.email.as_deref(), Some("b@y.edu"));
        assert_eq!(corpus.len(), 3);
    }

    #[test]
    fn test_load_yaml_corpus() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "- subject: Free money\n  body: click now\n  label: spam\n\
             - subject: Lunch\n  label: ham"
        )
        .unwrap();

        let corpus = load_corpus(file.path()).unwrap();
        assert_eq!(corpus.record_count(), 2);
        assert_eq!(corpus.records().nth(1).unwrap().body, None);
    }

    #[test]
    fn test_json_array_skips_bad_elements() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        let content = concat!(
            r#"[{"subject":"Free money","label":"spam"},"#,
            r#"{"subject":42,"label":"ham"},"#,
            r#"{"subject":"Lunch","label":"ham"}]"#,
        );
        file.write_all(content.as_bytes()).unwrap();

        let corpus = load_corpus(file.path()).unwrap();
        assert_eq!(corpus.record_count(), 2);
        assert_eq!(corpus.unparsed.len(), 1);
        assert_eq!(corpus.unparsed[0].index, 1);
        assert!(matches!(corpus.unparsed[0].reason, SkipReason::Malformed(_)));
        let positions: Vec<usize> = corpus.positioned().map(|(p, _)| p).collect();
        assert_eq!(positions, vec![0, 2]);
    }

    #[test]
    fn test_yaml_sequence_skips_bad_elements() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        let content = concat!(
            "- subject: Free money\n  label: spam\n",
            "- subject: [not, a, string]\n  label: ham\n",
            "- subject: Lunch\n  label: ham\n",
        );
        file.write_all(content.as_bytes()).unwrap();

        let corpus = load_corpus(file.path()).unwrap();
        assert_eq!(corpus.record_count(), 2);
        assert_eq!(corpus.unparsed.len(), 1);
        assert_eq!(corpus.unparsed[0].index, 1);
    }

    #[test]
    fn test_non_sequence_document_is_a_parse_error() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(br#"{"subject":"Free money","label":"spam"}"#)
            .unwrap();
        let err = load_corpus(file.path()).unwrap_err();
        assert!(matches!(err, DatasetError::Parse { .. }));
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        let err = load_corpus(file.path()).unwrap_err();
        assert!(matches!(err, DatasetError::UnsupportedFormat(ext) if ext == "csv"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_corpus("/nonexistent/corpus.jsonl").unwrap_err();
        assert!(matches!(err, DatasetError::Io { .. }));
    }
}
