pub mod classifier;
pub mod config;
pub mod dataset;
pub mod domain_utils;
pub mod engine;
pub mod error;
pub mod features;
pub mod message;
pub mod priority;
pub mod rules;
pub mod statistics;

pub use classifier::{ClassificationResult, ClassifierService, ModelMetadata, ResultSource};
pub use config::{load_config_or_default, EngineConfig};
pub use engine::TriageEngine;
pub use error::{Error, Result};
pub use message::{Category, Message};
pub use priority::{PriorityDecision, PriorityLevel, PriorityResolver};
pub use rules::{Rule, RuleEffect, RuleKind, RuleSet, RuleStore, RuleVerdict};
pub use statistics::{StatisticsSnapshot, TriageStatistics};
