use crate::classifier::ClassifierConfig;
use crate::error::ConfigError;
use crate::features::TokenizerConfig;
use crate::priority::PriorityConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Where the trained model is written and loaded from.
    pub model_path: String,
    /// Corpus used by `--train` when none is given on the command line.
    pub corpus_path: Option<String>,
    /// Optional per-user rules file.
    pub rules_path: Option<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            model_path: "/var/lib/inbox-triage/model.json".to_string(),
            corpus_path: None,
            rules_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tokenizer: TokenizerConfig,
    pub classifier: ClassifierConfig,
    pub priority: PriorityConfig,
    pub paths: PathsConfig,
}

impl EngineConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {path}"))?;
        let config: EngineConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration file: {path}"))?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {path}"))?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write configuration file: {path}"))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tokenizer.min_token_length == 0 {
            return Err(ConfigError(
                "tokenizer.min_token_length must be at least 1".to_string(),
            ));
        }
        for (name, weight) in [
            ("tokenizer.subject_weight", self.tokenizer.subject_weight),
            ("tokenizer.body_weight", self.tokenizer.body_weight),
        ] {
            if !(weight.is_finite() && weight >= 0.0) {
                return Err(ConfigError(format!(
                    "{name} must be a non-negative number, got {weight}"
                )));
            }
        }
        if self.tokenizer.subject_weight == 0.0 && self.tokenizer.body_weight == 0.0 {
            return Err(ConfigError(
                "tokenizer subject_weight and body_weight cannot both be zero".to_string(),
            ));
        }

        let smoothing = self.classifier.smoothing;
        if !(smoothing.is_finite() && smoothing > 0.0) {
            return Err(ConfigError(format!(
                "classifier.smoothing must be positive, got {smoothing}"
            )));
        }
        if self.classifier.min_training_examples == 0 {
            return Err(ConfigError(
                "classifier.min_training_examples must be at least 1".to_string(),
            ));
        }

        self.priority.validate()?;

        if self.paths.model_path.trim().is_empty() {
            return Err(ConfigError("paths.model_path must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Load `path` if it exists, otherwise fall back to the defaults.
pub fn load_config_or_default(path: &str) -> anyhow::Result<EngineConfig> {
    if Path::new(path).exists() {
        EngineConfig::from_file(path)
    } else {
        log::warn!("Configuration file '{path}' not found, using default configuration");
        Ok(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_yaml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("triage.yaml");
        let path = path.to_str().unwrap();

        let mut config = EngineConfig::default();
        config.priority.confidence_threshold = 0.75;
        config.classifier.balance_priors = true;
        config.paths.corpus_path = Some("/data/emails.jsonl".to_string());
        config.to_file(path).unwrap();

        let loaded = EngineConfig::from_file(path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "priority:\n  confidence_threshold: 0.5\n";
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.priority.confidence_threshold, 0.5);
        assert_eq!(config.classifier, ClassifierConfig::default());
        assert_eq!(config.tokenizer, TokenizerConfig::default());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = EngineConfig::default();
        config.classifier.smoothing = 0.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.priority.confidence_threshold = -0.1;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.tokenizer.subject_weight = 0.0;
        config.tokenizer.body_weight = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "classifier:\n  smoothing: -1.0\n").unwrap();
        let err = EngineConfig::from_file(path.to_str().unwrap()).unwrap_err();
        assert!(format!("{err:#}").contains("classifier.smoothing"));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        let config = load_config_or_default(path.to_str().unwrap()).unwrap();
        assert_eq!(config, EngineConfig::default());
    }
}
