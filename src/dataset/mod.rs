//! Turns a labeled corpus into training examples.

pub mod corpus;
pub mod insight;

pub use corpus::{load_corpus, Corpus, CorpusRecord, RecordIssue, SkipReason};

use crate::error::DatasetError;
use crate::features::{FeatureExtractor, FeatureVector};
use crate::message::Category;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

/// At most this many skipped records are kept as examples in the statistics.
const MAX_ISSUE_EXAMPLES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledExample {
    pub features: FeatureVector,
    pub label: Category,
}

/// Distinct terms of a training run. Frozen once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vocabulary {
    terms: BTreeSet<String>,
}

impl Vocabulary {
    pub fn from_examples(examples: &[LabeledExample]) -> Self {
        let terms = examples
            .iter()
            .flat_map(|example| example.features.terms().map(str::to_string))
            .collect();
        Self { terms }
    }

    pub fn contains(&self, term: &str) -> bool {
        self.terms.contains(term)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(String::as_str)
    }
}

impl FromIterator<String> for Vocabulary {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            terms: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusStatistics {
    pub total_records: usize,
    pub per_category: BTreeMap<Category, usize>,
    pub skipped_unlabeled: usize,
    pub skipped_unrecognized: usize,
    pub skipped_malformed: usize,
    pub issue_examples: Vec<RecordIssue>,
    /// Records with an absent or empty field, keyed by field name.
    pub missing_fields: BTreeMap<String, usize>,
    pub earliest: Option<NaiveDateTime>,
    pub latest: Option<NaiveDateTime>,
}

impl CorpusStatistics {
    pub fn usable(&self) -> usize {
        self.per_category.values().sum()
    }

    pub fn skipped(&self) -> usize {
        self.skipped_unlabeled + self.skipped_unrecognized + self.skipped_malformed
    }

    fn record_issue(&mut self, issue: RecordIssue) {
        match issue.reason {
            SkipReason::Unlabeled => self.skipped_unlabeled += 1,
            SkipReason::UnrecognizedLabel(_) => self.skipped_unrecognized += 1,
            SkipReason::Malformed(_) => self.skipped_malformed += 1,
        }
        if self.issue_examples.len() < MAX_ISSUE_EXAMPLES {
            self.issue_examples.push(issue);
        }
    }

    fn record_missing_fields(&mut self, record: &CorpusRecord) {
        let fields = [
            ("email", &record.email),
            ("subject", &record.subject),
            ("body", &record.body),
            ("date", &record.date),
            ("label", &record.label),
        ];
        for (name, value) in fields {
            if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
                *self.missing_fields.entry(name.to_string()).or_insert(0) += 1;
            }
        }
    }

    fn record_date(&mut self, date: Option<&str>) {
        let Some(parsed) = date.and_then(parse_record_date) else {
            return;
        };
        self.earliest = Some(self.earliest.map_or(parsed, |d| d.min(parsed)));
        self.latest = Some(self.latest.map_or(parsed, |d| d.max(parsed)));
    }

    /// Human readable report for the admin view.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Training Dataset Summary:");
        let _ = writeln!(out, "- Total records: {}", self.total_records);
        let date_range = match (self.earliest, self.latest) {
            (Some(from), Some(to)) => format!(
                "from {} to {}",
                from.format("%Y-%m-%d"),
                to.format("%Y-%m-%d")
            ),
            _ => "unknown date range".to_string(),
        };
        let _ = writeln!(out, "- Date range: {date_range}");
        let _ = writeln!(out, "- Label distribution:");
        for category in Category::ALL {
            let count = self.per_category.get(&category).copied().unwrap_or(0);
            let percentage = if self.total_records > 0 {
                count as f64 / self.total_records as f64 * 100.0
            } else {
                0.0
            };
            let _ = writeln!(out, "  - {category}: {count} ({percentage:.1}%)");
        }
        if self.skipped() > 0 {
            let _ = writeln!(
                out,
                "- Skipped records: {} (unlabeled {}, unrecognized label {}, malformed {})",
                self.skipped(),
                self.skipped_unlabeled,
                self.skipped_unrecognized,
                self.skipped_malformed
            );
            for issue in &self.issue_examples {
                let _ = writeln!(out, "  - record {}: {}", issue.index, issue.reason);
            }
        }
        let missing: Vec<&str> = self
            .missing_fields
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(field, _)| field.as_str())
            .collect();
        if !missing.is_empty() {
            let _ = writeln!(out, "- Fields with missing values: {}", missing.join(", "));
        }
        out
    }
}

fn parse_record_date(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    for format in ["%m/%d/%Y %H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }
    for format in ["%m/%d/%Y", "%Y-%m-%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Output of one vectorization run.
#[derive(Debug, Clone)]
pub struct VectorizedCorpus {
    pub examples: Vec<LabeledExample>,
    pub vocabulary: Vocabulary,
    pub statistics: CorpusStatistics,
}

pub struct DatasetProcessor {
    extractor: FeatureExtractor,
}

impl DatasetProcessor {
    pub fn new(extractor: FeatureExtractor) -> Self {
        Self { extractor }
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    /// Vectorize every labeled record. Problem records are skipped and
    /// reported in the statistics rather than aborting the run.
    pub fn load_and_vectorize(&self, corpus: &Corpus) -> Result<VectorizedCorpus, DatasetError> {
        let mut statistics = CorpusStatistics {
            total_records: corpus.len(),
            ..CorpusStatistics::default()
        };
        for issue in &corpus.unparsed {
            statistics.record_issue(issue.clone());
        }

        let mut examples = Vec::with_capacity(corpus.record_count());
        for (index, record) in corpus.positioned() {
            statistics.record_missing_fields(record);
            statistics.record_date(record.date.as_deref());

            let label = match record.category() {
                Ok(label) => label,
                Err(reason) => {
                    statistics.record_issue(RecordIssue { index, reason });
                    continue;
                }
            };

            let id = format!("record-{index}");
            let features = match self.extractor.extract_parts(
                &id,
                record.subject.as_deref().unwrap_or_default(),
                record.body.as_deref().unwrap_or_default(),
            ) {
                Ok(features) => features,
                Err(e) => {
                    statistics.record_issue(RecordIssue {
                        index,
                        reason: SkipReason::Malformed(e.to_string()),
                    });
                    continue;
                }
            };

            *statistics.per_category.entry(label).or_insert(0) += 1;
            examples.push(LabeledExample { features, label });
        }

        if statistics.skipped() > 0 {
            log::warn!(
                "Skipped {} of {} corpus records (unlabeled {}, unrecognized {}, malformed {})",
                statistics.skipped(),
                statistics.total_records,
                statistics.skipped_unlabeled,
                statistics.skipped_unrecognized,
                statistics.skipped_malformed
            );
        }

        if examples.is_empty() {
            return Err(DatasetError::EmptyCorpus {
                skipped: statistics.skipped(),
            });
        }
        if statistics.per_category.len() < 2 {
            // per_category is non-empty because examples is non-empty
            if let Some(only) = statistics.per_category.keys().next() {
                return Err(DatasetError::SingleCategory(*only));
            }
        }

        let vocabulary = Vocabulary::from_examples(&examples);
        log::info!(
            "Vectorized {} examples, vocabulary of {} terms, distribution {:?}",
            examples.len(),
            vocabulary.len(),
            statistics.per_category
        );

        Ok(VectorizedCorpus {
            examples,
            vocabulary,
            statistics,
        })
    }
}
