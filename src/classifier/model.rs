use super::{ClassificationResult, ResultSource};
use crate::dataset::Vocabulary;
use crate::features::{FeatureVector, TokenizerConfig};
use crate::message::Category;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How many indicative terms a prediction reports.
const INDICATIVE_TERMS: usize = 5;

/// Trained parameters of one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryModel {
    pub log_prior: f64,
    /// `ln P(term | category)` for every vocabulary term.
    pub term_log_probs: BTreeMap<String, f64>,
}

impl CategoryModel {
    /// Log-prior plus the weighted log-likelihood of the in-vocabulary terms.
    fn score(&self, features: &FeatureVector) -> f64 {
        features
            .iter()
            .filter_map(|(term, weight)| self.term_log_probs.get(term).map(|lp| weight * lp))
            .fold(self.log_prior, |acc, x| acc + x)
    }
}

/// Facts about a model for the reporting view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub vocabulary_size: usize,
    pub examples_per_category: BTreeMap<Category, usize>,
    pub trained_at: DateTime<Utc>,
    pub smoothing: f64,
    pub balanced_priors: bool,
    pub format_version: u32,
}

/// An immutable trained model. Retraining builds a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierModel {
    vocabulary: Vocabulary,
    categories: BTreeMap<Category, CategoryModel>,
    tokenizer: TokenizerConfig,
    metadata: ModelMetadata,
}

impl ClassifierModel {
    pub(crate) fn from_parts(
        vocabulary: Vocabulary,
        categories: BTreeMap<Category, CategoryModel>,
        tokenizer: TokenizerConfig,
        metadata: ModelMetadata,
    ) -> Self {
        Self {
            vocabulary,
            categories,
            tokenizer,
            metadata,
        }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn tokenizer_config(&self) -> &TokenizerConfig {
        &self.tokenizer
    }

    /// Categories the model was trained on.
    pub fn categories(&self) -> impl Iterator<Item = Category> + '_ {
        self.categories.keys().copied()
    }

    pub fn category_model(&self, category: Category) -> Option<&CategoryModel> {
        self.categories.get(&category)
    }

    /// Unnormalized log score per trained category.
    pub fn log_scores(&self, features: &FeatureVector) -> BTreeMap<Category, f64> {
        self.categories
            .iter()
            .map(|(category, model)| (*category, model.score(features)))
            .collect()
    }

    /// Most likely category with softmax-normalized probabilities.
    ///
    /// Out-of-vocabulary terms are ignored, so a message with no known term
    /// is classified by the priors alone. Equal top scores are resolved by
    /// [`Category::precedence`].
    pub fn predict(&self, features: &FeatureVector) -> ClassificationResult {
        let scores = self.log_scores(features);

        let (category, best) = scores.iter().fold(
            (Category::Spam, f64::NEG_INFINITY),
            |(best_category, best_score), (&category, &score)| {
                let better = score > best_score
                    || (score == best_score && category.precedence() > best_category.precedence());
                if better {
                    (category, score)
                } else {
                    (best_category, best_score)
                }
            },
        );

        let exps: BTreeMap<Category, f64> = scores
            .iter()
            .map(|(category, score)| (*category, (score - best).exp()))
            .collect();
        let normalizer: f64 = exps.values().sum();

        let probabilities: BTreeMap<Category, f64> = Category::ALL
            .iter()
            .map(|category| {
                let p = exps.get(category).map_or(0.0, |e| e / normalizer);
                (*category, p)
            })
            .collect();
        let confidence = probabilities
            .get(&category)
            .copied()
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);

        log::debug!(
            "Predicted {} with confidence {:.3} over {} known terms",
            category,
            confidence,
            features.terms().filter(|t| self.vocabulary.contains(t)).count()
        );

        ClassificationResult {
            category,
            confidence,
            probabilities,
            source: ResultSource::Model,
            indicative_terms: self
                .indicative_terms(features, category, INDICATIVE_TERMS)
                .into_iter()
                .map(|(term, _)| term)
                .collect(),
        }
    }

    /// Known terms of one message that pushed it towards `category`, ranked
    /// by weight times log-likelihood ratio against the closest competitor.
    /// Only positive contributions are returned.
    pub fn indicative_terms(
        &self,
        features: &FeatureVector,
        category: Category,
        n: usize,
    ) -> Vec<(String, f64)> {
        let Some(target) = self.categories.get(&category) else {
            return Vec::new();
        };

        let mut ranked: Vec<(String, f64)> = features
            .iter()
            .filter_map(|(term, weight)| {
                let lp = *target.term_log_probs.get(term)?;
                let competitor = self.competitor_log_prob(category, term)?;
                let contribution = weight * (lp - competitor);
                (contribution > 0.0).then(|| (term.to_string(), contribution))
            })
            .collect();

        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }

    fn competitor_log_prob(&self, category: Category, term: &str) -> Option<f64> {
        self.categories
            .iter()
            .filter(|(other, _)| **other != category)
            .filter_map(|(_, model)| model.term_log_probs.get(term).copied())
            .reduce(f64::max)
    }

    /// Terms that most distinguish `category` from the other trained
    /// categories, by log-likelihood ratio against the closest competitor.
    pub fn top_terms(&self, category: Category, n: usize) -> Vec<(String, f64)> {
        let Some(target) = self.categories.get(&category) else {
            return Vec::new();
        };

        let mut ranked: Vec<(String, f64)> = target
            .term_log_probs
            .iter()
            .map(|(term, lp)| {
                let competitor = self
                    .competitor_log_prob(category, term)
                    .unwrap_or(f64::NEG_INFINITY);
                (term.clone(), lp - competitor)
            })
            .collect();

        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }

    /// Structural checks for models that did not come from `train`.
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.categories.len() < 2 {
            return Err(format!(
                "model has {} categories, at least 2 required",
                self.categories.len()
            ));
        }
        if self.vocabulary.is_empty() {
            return Err("model vocabulary is empty".to_string());
        }
        for (category, model) in &self.categories {
            if !(model.log_prior.is_finite() && model.log_prior <= 0.0) {
                return Err(format!("{category}: invalid log prior {}", model.log_prior));
            }
            if model.term_log_probs.len() != self.vocabulary.len()
                || !self.vocabulary.iter().all(|t| model.term_log_probs.contains_key(t))
            {
                return Err(format!("{category}: term table does not match vocabulary"));
            }
            if let Some((term, lp)) = model
                .term_log_probs
                .iter()
                .find(|(_, lp)| !(lp.is_finite() && **lp <= 0.0))
            {
                return Err(format!("{category}: invalid log probability {lp} for `{term}`"));
            }
        }
        if self.metadata.vocabulary_size != self.vocabulary.len() {
            return Err("metadata vocabulary size does not match vocabulary".to_string());
        }
        Ok(())
    }
}
