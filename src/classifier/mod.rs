//! Multinomial naive Bayes classifier over term-frequency features.
//!
//! Training produces an immutable [`ClassifierModel`]; the live model is held
//! by [`ClassifierService`], which swaps it wholesale on retrain.

pub mod model;
pub mod persistence;
pub mod service;

pub use model::{CategoryModel, ClassifierModel, ModelMetadata};
pub use persistence::{deserialize, load, save, serialize, FORMAT_TAG, FORMAT_VERSION};
pub use service::ClassifierService;

use crate::dataset::{LabeledExample, Vocabulary};
use crate::error::TrainingError;
use crate::features::TokenizerConfig;
use crate::message::Category;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Additive (Laplace) pseudo-count applied to every term/category pair.
    pub smoothing: f64,
    pub min_training_examples: usize,
    /// Use uniform priors instead of class frequencies.
    pub balance_priors: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            smoothing: 1.0,
            min_training_examples: 10,
            balance_priors: false,
        }
    }
}

/// Where a classification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultSource {
    #[serde(rename = "model")]
    Model,
    #[serde(rename = "rule")]
    Rule,
    #[serde(rename = "model+rule")]
    ModelAndRule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: Category,
    /// Probability of `category`, in [0, 1].
    pub confidence: f64,
    /// Probability per category; sums to 1. Categories absent from training are 0.
    pub probabilities: BTreeMap<Category, f64>,
    pub source: ResultSource,
    /// Terms of the message that pushed it most towards `category`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indicative_terms: Vec<String>,
}

impl ClassificationResult {
    pub fn probability(&self, category: Category) -> f64 {
        self.probabilities.get(&category).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Classifier {
    config: ClassifierConfig,
    tokenizer: TokenizerConfig,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            tokenizer: TokenizerConfig::default(),
        }
    }

    /// Tokenizer settings recorded in every model this classifier trains, so
    /// a loaded model vectorizes messages the way its corpus was vectorized.
    pub fn with_tokenizer(mut self, tokenizer: TokenizerConfig) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn tokenizer_config(&self) -> &TokenizerConfig {
        &self.tokenizer
    }

    pub fn train(
        &self,
        examples: &[LabeledExample],
        vocabulary: &Vocabulary,
    ) -> Result<ClassifierModel, TrainingError> {
        let alpha = self.config.smoothing;
        if !(alpha.is_finite() && alpha > 0.0) {
            return Err(TrainingError::InvalidSmoothing(alpha));
        }
        if examples.len() < self.config.min_training_examples {
            return Err(TrainingError::InsufficientExamples {
                found: examples.len(),
                required: self.config.min_training_examples,
            });
        }

        let mut examples_per_category: BTreeMap<Category, usize> = BTreeMap::new();
        for example in examples {
            *examples_per_category.entry(example.label).or_insert(0) += 1;
        }
        if examples_per_category.len() < 2 {
            return Err(TrainingError::SingleCategory {
                found: examples_per_category.len(),
            });
        }
        if vocabulary.is_empty() {
            return Err(TrainingError::EmptyVocabulary);
        }

        // Weighted term counts per category, restricted to the vocabulary.
        let mut term_counts: BTreeMap<Category, BTreeMap<&str, f64>> = BTreeMap::new();
        let mut totals: BTreeMap<Category, f64> = BTreeMap::new();
        for example in examples {
            let counts = term_counts.entry(example.label).or_default();
            let total = totals.entry(example.label).or_insert(0.0);
            for (term, weight) in example.features.iter() {
                if vocabulary.contains(term) {
                    *counts.entry(term).or_insert(0.0) += weight;
                    *total += weight;
                }
            }
        }

        let vocabulary_size = vocabulary.len() as f64;
        let trained_categories = examples_per_category.len() as f64;
        let example_count = examples.len() as f64;

        let mut categories = BTreeMap::new();
        for (&category, &count) in &examples_per_category {
            let counts = term_counts.get(&category);
            let total = totals.get(&category).copied().unwrap_or(0.0);
            let denominator = total + alpha * vocabulary_size;

            let term_log_probs = vocabulary
                .iter()
                .map(|term| {
                    let observed = counts.and_then(|c| c.get(term)).copied().unwrap_or(0.0);
                    (term.to_string(), ((observed + alpha) / denominator).ln())
                })
                .collect();

            let prior = if self.config.balance_priors {
                1.0 / trained_categories
            } else {
                count as f64 / example_count
            };

            categories.insert(
                category,
                CategoryModel {
                    log_prior: prior.ln(),
                    term_log_probs,
                },
            );
        }

        let metadata = ModelMetadata {
            vocabulary_size: vocabulary.len(),
            examples_per_category,
            trained_at: Utc::now(),
            smoothing: alpha,
            balanced_priors: self.config.balance_priors,
            format_version: FORMAT_VERSION,
        };

        log::info!(
            "Trained model on {} examples, {} terms, categories {:?}",
            examples.len(),
            vocabulary.len(),
            metadata.examples_per_category
        );

        Ok(ClassifierModel::from_parts(
            vocabulary.clone(),
            categories,
            self.tokenizer.clone(),
            metadata,
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::features::FeatureExtractor;
    use crate::message::Message;

    /// Small three-category corpus shared by the classifier tests.
    pub(crate) fn training_set() -> (Vec<LabeledExample>, Vocabulary) {
        let extractor = FeatureExtractor::default();
        let rows = [
            ("free money now", "claim your free cash prize", Category::Spam),
            ("you won the lottery", "claim your prize money today", Category::Spam),
            ("cheap loans", "free money with no credit check", Category::Spam),
            ("winner winner", "free gift card click now", Category::Spam),
            ("exam schedule posted", "the final exam schedule is on the portal", Category::Notice),
            ("registration deadline", "course registration closes friday", Category::Notice),
            ("tuition payment due", "check the university portal for tuition", Category::Notice),
            ("library hours change", "the library will close early for exams", Category::Notice),
            ("lunch tomorrow?", "want to grab lunch tomorrow", Category::Ham),
            ("weekend plans", "dinner this weekend with friends", Category::Ham),
            ("study group", "meet at the cafe to study together", Category::Ham),
            ("photos from the trip", "here are the photos from our hike", Category::Ham),
        ];
        let examples: Vec<LabeledExample> = rows
            .iter()
            .enumerate()
            .map(|(i, (subject, body, label))| LabeledExample {
                features: extractor
                    .extract(&Message::new(format!("t{i}"), "x@y.edu", *subject, *body))
                    .unwrap(),
                label: *label,
            })
            .collect();
        let vocabulary = Vocabulary::from_examples(&examples);
        (examples, vocabulary)
    }

    pub(crate) fn trained_model() -> ClassifierModel {
        let (examples, vocabulary) = training_set();
        Classifier::default().train(&examples, &vocabulary).unwrap()
    }

    #[test]
    fn test_minimum_data_guard() {
        let (examples, vocabulary) = training_set();
        let classifier = Classifier::default();

        let err = classifier.train(&examples[..9], &vocabulary).unwrap_err();
        assert_eq!(
            err,
            TrainingError::InsufficientExamples {
                found: 9,
                required: 10
            }
        );

        // spam and notice only
        let two_categories: Vec<LabeledExample> = examples[..8]
            .iter()
            .chain(examples[..2].iter())
            .cloned()
            .collect();
        assert_eq!(two_categories.len(), 10);
        let model = classifier.train(&two_categories, &vocabulary).unwrap();
        assert_eq!(model.metadata().examples_per_category.len(), 2);
    }

    #[test]
    fn test_single_category_is_rejected() {
        let (examples, vocabulary) = training_set();
        let spam_only: Vec<LabeledExample> = examples
            .iter()
            .filter(|e| e.label == Category::Spam)
            .cycle()
            .take(10)
            .cloned()
            .collect();
        let err = Classifier::default()
            .train(&spam_only, &vocabulary)
            .unwrap_err();
        assert_eq!(err, TrainingError::SingleCategory { found: 1 });
    }

    #[test]
    fn test_invalid_smoothing_is_rejected() {
        let (examples, vocabulary) = training_set();
        let classifier = Classifier::new(ClassifierConfig {
            smoothing: 0.0,
            ..ClassifierConfig::default()
        });
        assert_eq!(
            classifier.train(&examples, &vocabulary).unwrap_err(),
            TrainingError::InvalidSmoothing(0.0)
        );
    }

    #[test]
    fn test_empty_vocabulary_is_rejected() {
        let (examples, _) = training_set();
        let err = Classifier::default()
            .train(&examples, &Vocabulary::default())
            .unwrap_err();
        assert_eq!(err, TrainingError::EmptyVocabulary);
    }

    #[test]
    fn test_smoothed_probabilities_are_normalized() {
        let model = trained_model();
        for category in [Category::Spam, Category::Ham, Category::Notice] {
            let category_model = model.category_model(category).unwrap();
            let total: f64 = category_model
                .term_log_probs
                .values()
                .map(|lp| lp.exp())
                .sum();
            assert!((total - 1.0).abs() < 1e-9, "{category}: {total}");
            assert!(category_model
                .term_log_probs
                .values()
                .all(|lp| lp.is_finite() && *lp < 0.0));
        }
    }

    #[test]
    fn test_priors_follow_class_frequency() {
        let (mut examples, _) = training_set();
        examples.truncate(10); // 4 spam, 4 notice, 2 ham
        let vocabulary = Vocabulary::from_examples(&examples);
        let model = Classifier::default().train(&examples, &vocabulary).unwrap();

        let prior = |c| model.category_model(c).unwrap().log_prior.exp();
        assert!((prior(Category::Spam) - 0.4).abs() < 1e-12);
        assert!((prior(Category::Ham) - 0.2).abs() < 1e-12);

        let balanced = Classifier::new(ClassifierConfig {
            balance_priors: true,
            ..ClassifierConfig::default()
        })
        .train(&examples, &vocabulary)
        .unwrap();
        let ham = balanced.category_model(Category::Ham).unwrap().log_prior.exp();
        assert!((ham - 1.0 / 3.0).abs() < 1e-12);
    }
}
