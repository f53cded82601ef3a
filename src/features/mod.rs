pub mod tokenizer;

pub use tokenizer::{Tokenizer, TokenizerConfig};

use crate::error::ExtractionError;
use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Term weights of one message.
///
/// Ordered so that iteration (and therefore floating point summation during
/// prediction) is identical on every run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    terms: BTreeMap<String, f64>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, term: &str, weight: f64) {
        *self.terms.entry(term.to_string()).or_insert(0.0) += weight;
    }

    pub fn get(&self, term: &str) -> Option<f64> {
        self.terms.get(term).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.terms.iter().map(|(term, weight)| (term.as_str(), *weight))
    }

    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.terms.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.terms.values().sum()
    }
}

impl FromIterator<(String, f64)> for FeatureVector {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        let mut vector = FeatureVector::new();
        for (term, weight) in iter {
            vector.add(&term, weight);
        }
        vector
    }
}

/// Turns subject and body text into a weighted term-frequency vector.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    tokenizer: Tokenizer,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(TokenizerConfig::default())
    }
}

impl FeatureExtractor {
    pub fn new(config: TokenizerConfig) -> Self {
        Self {
            tokenizer: Tokenizer::new(config),
        }
    }

    pub fn config(&self) -> &TokenizerConfig {
        self.tokenizer.config()
    }

    pub fn tokenize(&self, text: &str) -> Vec<String> {
        self.tokenizer.tokenize(text)
    }

    pub fn extract(&self, message: &Message) -> Result<FeatureVector, ExtractionError> {
        self.extract_parts(&message.id, &message.subject, &message.body)
    }

    /// Same as [`extract`](Self::extract) for callers that hold the text
    /// without a full [`Message`], e.g. corpus records.
    pub fn extract_parts(
        &self,
        id: &str,
        subject: &str,
        body: &str,
    ) -> Result<FeatureVector, ExtractionError> {
        ensure_text(id, "subject", subject)?;
        ensure_text(id, "body", body)?;

        let config = self.tokenizer.config();
        let mut vector = FeatureVector::new();
        for token in self.tokenizer.tokenize(subject) {
            vector.add(&token, config.subject_weight);
        }
        for token in self.tokenizer.tokenize(body) {
            vector.add(&token, config.body_weight);
        }
        Ok(vector)
    }
}

// Control characters other than whitespace only show up in binary payloads.
fn ensure_text(id: &str, field: &str, text: &str) -> Result<(), ExtractionError> {
    if text.chars().any(|c| c.is_control() && !c.is_whitespace()) {
        return Err(ExtractionError::NonTextPayload {
            message_id: id.to_string(),
            field: field.to_string(),
        });
    }
    Ok(())
}
