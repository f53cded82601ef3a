//! Triage engine
//!
//! Wires feature extraction, the live classifier, the rule engine and the
//! priority resolver into the request path:
//!
//! ```text
//! message ─► features ─► classifier ─┐
//!        └─► rules ──────────────────┴─► priority resolver ─► decision
//! ```

use crate::classifier::{Classifier, ClassifierModel, ClassifierService, ModelMetadata};
use crate::config::EngineConfig;
use crate::dataset::{load_corpus, Corpus, CorpusRecord, CorpusStatistics, DatasetProcessor};
use crate::error::{ExtractionError, Result, UntrainedModelError};
use crate::features::{FeatureExtractor, FeatureVector};
use crate::message::Message;
use crate::priority::{PriorityDecision, PriorityResolver};
use crate::rules::{RuleEngine, RuleSet};
use crate::statistics::TriageStatistics;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub struct TriageEngine {
    extractor: FeatureExtractor,
    classifier: Arc<ClassifierService>,
    resolver: PriorityResolver,
    statistics: TriageStatistics,
    /// Labeled records behind the last model this engine trained.
    training_records: Mutex<Vec<CorpusRecord>>,
}

impl TriageEngine {
    /// Engine without a model. Train or load one before classifying.
    pub fn from_config(config: &EngineConfig) -> Self {
        let classifier = Classifier::new(config.classifier.clone())
            .with_tokenizer(config.tokenizer.clone());
        Self::with_service(config, Arc::new(ClassifierService::new(classifier)))
    }

    /// Engine sharing an existing classifier service, e.g. with a background
    /// retrain job.
    pub fn with_service(config: &EngineConfig, classifier: Arc<ClassifierService>) -> Self {
        Self {
            extractor: FeatureExtractor::new(config.tokenizer.clone()),
            classifier,
            resolver: PriorityResolver::new(config.priority.clone()),
            statistics: TriageStatistics::new(),
            training_records: Mutex::new(Vec::new()),
        }
    }

    pub fn classifier(&self) -> &Arc<ClassifierService> {
        &self.classifier
    }

    pub fn statistics(&self) -> &TriageStatistics {
        &self.statistics
    }

    pub fn model_metadata(&self) -> Option<ModelMetadata> {
        self.classifier.metadata()
    }

    /// Number of labeled records the current training set holds.
    pub fn training_record_count(&self) -> usize {
        self.lock_training_records().len()
    }

    /// Priority decision for one message against a snapshot of the user's
    /// rules. The model snapshot is taken once, so a concurrent retrain
    /// cannot mix two models into one decision.
    pub fn classify(&self, message: &Message, rules: &RuleSet) -> Result<PriorityDecision> {
        let Some(model) = self.classifier.current() else {
            self.statistics.record_untrained_request();
            return Err(UntrainedModelError.into());
        };

        let features = match self.extract(message, &model) {
            Ok(features) => features,
            Err(e) => {
                self.statistics.record_extraction_failure();
                log::warn!("Cannot classify message {}: {e}", message.id);
                return Err(e.into());
            }
        };

        let classification = model.predict(&features);
        let verdict = RuleEngine::evaluate(message, rules);
        let decision = self.resolver.resolve(&classification, &verdict);
        self.statistics.record(&decision);

        log::debug!(
            "Message {} from {}: {} at level {} ({})",
            message.id,
            message.sender,
            decision.category,
            decision.priority_level,
            decision.rationale.join("; ")
        );
        Ok(decision)
    }

    /// One result per message, in input order. A failing message does not
    /// stop the batch.
    pub fn classify_batch(
        &self,
        messages: &[Message],
        rules: &RuleSet,
    ) -> Vec<Result<PriorityDecision>> {
        messages
            .iter()
            .map(|message| self.classify(message, rules))
            .collect()
    }

    /// Train on in-memory records and activate the model. On error the
    /// previous model keeps serving.
    pub fn train_from_records(
        &self,
        records: Vec<CorpusRecord>,
    ) -> Result<(Arc<ClassifierModel>, CorpusStatistics)> {
        let mut retained = self.lock_training_records();
        self.train_corpus(Corpus::from_records(records), &mut retained)
    }

    pub fn train_from_path<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<(Arc<ClassifierModel>, CorpusStatistics)> {
        let corpus = load_corpus(&path)?;
        log::info!(
            "Loaded {} corpus records from {}",
            corpus.len(),
            path.as_ref().display()
        );
        let mut retained = self.lock_training_records();
        self.train_corpus(corpus, &mut retained)
    }

    /// Merge newly labeled records into the current training set and
    /// retrain. On error both the model and the training set stay as they
    /// were.
    pub fn add_training_records(
        &self,
        records: Vec<CorpusRecord>,
    ) -> Result<(Arc<ClassifierModel>, CorpusStatistics)> {
        let mut retained = self.lock_training_records();
        let added = records.len();
        let mut merged = Vec::with_capacity(retained.len() + added);
        merged.extend(retained.iter().cloned());
        merged.extend(records);
        log::info!(
            "Retraining with {} new records on top of {} retained",
            added,
            retained.len()
        );
        self.train_corpus(Corpus::from_records(merged), &mut retained)
    }

    pub fn load_model<P: AsRef<Path>>(&self, path: P) -> Result<Arc<ClassifierModel>> {
        let model = self.classifier.load_from(path)?;
        // the records behind the loaded model are unknown
        self.lock_training_records().clear();
        if model.tokenizer_config() != self.extractor.config() {
            log::info!("Loaded model carries its own tokenizer settings; using those");
        }
        Ok(model)
    }

    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.classifier.save_to(path)
    }

    /// The caller holds the training-set lock for the whole run, so
    /// concurrent merges cannot drop each other's records.
    fn train_corpus(
        &self,
        corpus: Corpus,
        retained: &mut Vec<CorpusRecord>,
    ) -> Result<(Arc<ClassifierModel>, CorpusStatistics)> {
        let processor = DatasetProcessor::new(self.training_extractor());
        let vectorized = processor.load_and_vectorize(&corpus)?;
        let model = self
            .classifier
            .retrain(&vectorized.examples, &vectorized.vocabulary)?;
        *retained = corpus
            .into_records()
            .into_iter()
            .filter(|record| record.category().is_ok())
            .collect();
        Ok((model, vectorized.statistics))
    }

    fn lock_training_records(&self) -> MutexGuard<'_, Vec<CorpusRecord>> {
        self.training_records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Training vectorizes with the settings the classifier stamps into the
    /// model.
    fn training_extractor(&self) -> FeatureExtractor {
        let tokenizer = self.classifier.classifier().tokenizer_config();
        if tokenizer == self.extractor.config() {
            self.extractor.clone()
        } else {
            FeatureExtractor::new(tokenizer.clone())
        }
    }

    /// Messages are vectorized with the tokenizer settings the model was
    /// trained with.
    fn extract(
        &self,
        message: &Message,
        model: &ClassifierModel,
    ) -> std::result::Result<FeatureVector, ExtractionError> {
        if model.tokenizer_config() == self.extractor.config() {
            self.extractor.extract(message)
        } else {
            FeatureExtractor::new(model.tokenizer_config().clone()).extract(message)
        }
    }
}
