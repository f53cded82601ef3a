use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const DEFAULT_STOP_WORDS: &[&str] = &[
    "am", "an", "and", "are", "as", "at", "be", "been", "but", "by", "do", "for", "from", "had",
    "has", "have", "he", "her", "his", "if", "in", "into", "is", "it", "its", "me", "my", "of",
    "on", "or", "our", "she", "so", "that", "the", "their", "them", "then", "there", "these",
    "they", "this", "to", "us", "was", "we", "were", "will", "with", "you", "your",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    /// Tokens shorter than this many characters are dropped.
    pub min_token_length: usize,
    pub stop_words: BTreeSet<String>,
    /// Weight added per subject token.
    pub subject_weight: f64,
    /// Weight added per body token.
    pub body_weight: f64,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            min_token_length: 2,
            stop_words: DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect(),
            subject_weight: 2.0,
            body_weight: 1.0,
        }
    }
}

/// Splits text into normalized terms.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    config: TokenizerConfig,
}

impl Tokenizer {
    pub fn new(config: TokenizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TokenizerConfig {
        &self.config
    }

    /// Lowercase, turn every non-alphanumeric character into a separator and
    /// collapse runs of whitespace.
    pub fn normalize(text: &str) -> String {
        let spaced: String = text
            .chars()
            .flat_map(char::to_lowercase)
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();
        spaced.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    pub fn tokenize(&self, text: &str) -> Vec<String> {
        Self::normalize(text)
            .split(' ')
            .filter(|token| token.chars().count() >= self.config.min_token_length)
            .filter(|token| !self.config.stop_words.contains(*token))
            .map(str::to_string)
            .collect()
    }
}
