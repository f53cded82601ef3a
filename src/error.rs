//! Error types for the triage engine.
//!
//! Each stage of the pipeline has its own error so callers can tell a bad
//! record (skip it) from a bad corpus (abort the run) from a sequencing bug
//! (no model yet). They all convert into [`Error`].

use crate::message::Category;
use thiserror::Error;

/// Raised when a message payload is not usable text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    /// The field carries binary content (NUL or control characters).
    #[error("message {message_id}: field `{field}` is not a text payload")]
    NonTextPayload { message_id: String, field: String },
}

/// The corpus cannot be used for a training run.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("corpus is empty after filtering ({skipped} records skipped)")]
    EmptyCorpus { skipped: usize },

    #[error("corpus contains a single category ({0}); at least two are required")]
    SingleCategory(Category),

    #[error("failed to read corpus {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse corpus {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("unsupported corpus format: {0} (expected .jsonl, .ndjson, .json, .yaml or .yml)")]
    UnsupportedFormat(String),
}

/// Training was refused; the previously active model keeps serving.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrainingError {
    #[error("{found} training examples supplied, at least {required} required")]
    InsufficientExamples { found: usize, required: usize },

    #[error("training examples cover {found} category, at least 2 required")]
    SingleCategory { found: usize },

    #[error("vocabulary is empty")]
    EmptyVocabulary,

    #[error("smoothing pseudo-count must be positive and finite, got {0}")]
    InvalidSmoothing(f64),
}

/// A prediction was requested before any model was trained or loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no classifier model is active; train or load one first")]
pub struct UntrainedModelError;

/// A serialized model could not be decoded.
#[derive(Debug, Error)]
pub enum ModelFormatError {
    #[error("unknown model format tag `{0}`")]
    UnknownFormat(String),

    #[error("unsupported model format version {found} (this build reads version {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("malformed model payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("inconsistent model: {0}")]
    Inconsistent(String),

    #[error("model file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A rule could not be added to a rule set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("duplicate {kind} rule `{pattern}` for user {owner}")]
    Duplicate {
        owner: String,
        kind: String,
        pattern: String,
    },

    #[error("invalid rule pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("rule owned by {found} cannot be added to the rule set of {expected}")]
    ForeignOwner { expected: String, found: String },

    #[error("no {kind} rule `{pattern}` for user {owner}")]
    NotFound {
        owner: String,
        kind: String,
        pattern: String,
    },
}

/// Configuration values out of range.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Training(#[from] TrainingError),

    #[error(transparent)]
    Untrained(#[from] UntrainedModelError),

    #[error(transparent)]
    ModelFormat(#[from] ModelFormatError),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
