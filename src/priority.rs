//! Priority Resolver
//!
//! Merges the classifier output with the rule verdict into the final
//! category, priority level and the reasons behind them.

use crate::classifier::{ClassificationResult, ResultSource};
use crate::error::ConfigError;
use crate::message::Category;
use crate::rules::{RuleMatch, RuleVerdict};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    /// Classifications below this confidence are demoted one tier.
    pub confidence_threshold: f64,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
        }
    }
}

impl PriorityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError(format!(
                "priority.confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        Ok(())
    }
}

/// Attention rank, 1 (most urgent) to 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriorityLevel(u8);

impl PriorityLevel {
    pub const HIGHEST: PriorityLevel = PriorityLevel(1);
    pub const LOWEST: PriorityLevel = PriorityLevel(4);

    /// Base level of a confident classification.
    pub fn for_category(category: Category) -> Self {
        match category {
            Category::Notice => PriorityLevel(1),
            Category::Ham => PriorityLevel(2),
            Category::Spam => PriorityLevel(3),
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// One tier less urgent, saturating at [`PriorityLevel::LOWEST`].
    pub fn demoted(self) -> Self {
        PriorityLevel((self.0 + 1).min(Self::LOWEST.0))
    }

    pub fn all() -> impl Iterator<Item = PriorityLevel> {
        (Self::HIGHEST.0..=Self::LOWEST.0).map(PriorityLevel)
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityDecision {
    pub category: Category,
    pub priority_level: PriorityLevel,
    /// Ordered reasons, never empty.
    pub rationale: Vec<String>,
    pub source: ResultSource,
    /// Classifier probability of the final category.
    pub confidence: f64,
    /// Set when low confidence pushed the level down a tier.
    pub demoted: bool,
}

impl PriorityDecision {
    pub fn is_override(&self) -> bool {
        self.source != ResultSource::Model
    }
}

#[derive(Debug, Clone, Default)]
pub struct PriorityResolver {
    config: PriorityConfig,
}

impl PriorityResolver {
    pub fn new(config: PriorityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PriorityConfig {
        &self.config
    }

    /// Final decision for one message. Deterministic in its inputs.
    pub fn resolve(
        &self,
        classification: &ClassificationResult,
        verdict: &RuleVerdict,
    ) -> PriorityDecision {
        let decision = match verdict {
            RuleVerdict::OverrideAllow(rule_match) => {
                // a whitelist never downgrades an institutional notice
                let category = if classification.category == Category::Notice {
                    Category::Notice
                } else {
                    Category::Ham
                };
                self.override_decision(
                    classification,
                    rule_match,
                    category,
                    PriorityLevel::HIGHEST,
                    "whitelist match",
                )
            }
            RuleVerdict::OverrideBlock(rule_match) => self.override_decision(
                classification,
                rule_match,
                Category::Spam,
                PriorityLevel::LOWEST,
                "blacklist match",
            ),
            RuleVerdict::NoOverride => self.model_decision(classification),
        };

        log::debug!(
            "Resolved {} at level {} from {:?}",
            decision.category,
            decision.priority_level,
            decision.source
        );
        decision
    }

    fn model_decision(&self, classification: &ClassificationResult) -> PriorityDecision {
        let base = PriorityLevel::for_category(classification.category);
        let mut rationale = vec![model_reason(classification)];
        rationale.extend(indicative_reason(classification));

        let demoted = classification.confidence < self.config.confidence_threshold;
        let priority_level = if demoted {
            let level = base.demoted();
            rationale.push(format!(
                "low confidence {:.2} below threshold {:.2}: demoted from level {} to {} for review",
                classification.confidence, self.config.confidence_threshold, base, level
            ));
            level
        } else {
            base
        };

        PriorityDecision {
            category: classification.category,
            priority_level,
            rationale,
            source: ResultSource::Model,
            confidence: classification.confidence,
            demoted,
        }
    }

    fn override_decision(
        &self,
        classification: &ClassificationResult,
        rule_match: &RuleMatch,
        category: Category,
        priority_level: PriorityLevel,
        label: &str,
    ) -> PriorityDecision {
        let mut rationale = vec![format!("{label}: {}", rule_match.winner)];
        rationale.extend(
            rule_match
                .matched
                .iter()
                .skip(1)
                .map(|rule| format!("also matched {rule}")),
        );
        rationale.extend(
            rule_match
                .overridden
                .iter()
                .map(|rule| format!("overridden {rule}")),
        );
        rationale.push(model_reason(classification));
        rationale.extend(indicative_reason(classification));

        let source = if classification.category == category {
            ResultSource::ModelAndRule
        } else {
            ResultSource::Rule
        };

        PriorityDecision {
            category,
            priority_level,
            rationale,
            source,
            confidence: classification.probability(category),
            demoted: false,
        }
    }
}

fn model_reason(classification: &ClassificationResult) -> String {
    format!(
        "model verdict {} with confidence {:.2}",
        classification.category, classification.confidence
    )
}

fn indicative_reason(classification: &ClassificationResult) -> Option<String> {
    if classification.indicative_terms.is_empty() {
        return None;
    }
    Some(format!(
        "indicative terms: {}",
        classification.indicative_terms.join(", ")
    ))
}
