use super::{persistence, ClassificationResult, Classifier, ClassifierModel, ModelMetadata};
use crate::dataset::{LabeledExample, VectorizedCorpus, Vocabulary};
use crate::error::{ModelFormatError, TrainingError, UntrainedModelError};
use crate::features::FeatureVector;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::JoinHandle;

/// Owner of the live model.
///
/// Predictions take a cheap `Arc` clone of the current model and run without
/// holding any lock. Training happens outside the lock; only the final
/// pointer swap takes the write lock, so a retrain never blocks predictions
/// for longer than that swap and a failed retrain leaves the old model
/// serving.
pub struct ClassifierService {
    classifier: Classifier,
    active: RwLock<Option<Arc<ClassifierModel>>>,
}

impl ClassifierService {
    pub fn new(classifier: Classifier) -> Self {
        Self {
            classifier,
            active: RwLock::new(None),
        }
    }

    pub fn with_model(classifier: Classifier, model: ClassifierModel) -> Self {
        Self {
            classifier,
            active: RwLock::new(Some(Arc::new(model))),
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Snapshot of the active model.
    pub fn current(&self) -> Option<Arc<ClassifierModel>> {
        // The guarded value is a single pointer, it cannot be left half-written.
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_trained(&self) -> bool {
        self.current().is_some()
    }

    pub fn metadata(&self) -> Option<ModelMetadata> {
        self.current().map(|model| model.metadata().clone())
    }

    pub fn predict(
        &self,
        features: &FeatureVector,
    ) -> Result<ClassificationResult, UntrainedModelError> {
        let model = self.current().ok_or(UntrainedModelError)?;
        Ok(model.predict(features))
    }

    /// Replace the active model and return it.
    pub fn install(&self, model: ClassifierModel) -> Arc<ClassifierModel> {
        let model = Arc::new(model);
        let previous = {
            let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
            active.replace(Arc::clone(&model))
        };
        match previous {
            Some(old) => log::info!(
                "Replaced model trained {} with model trained {} ({} terms)",
                old.metadata().trained_at,
                model.metadata().trained_at,
                model.metadata().vocabulary_size
            ),
            None => log::info!(
                "Activated model trained {} ({} terms)",
                model.metadata().trained_at,
                model.metadata().vocabulary_size
            ),
        }
        model
    }

    /// Train a new model and make it active. On error the current model is
    /// left untouched.
    pub fn retrain(
        &self,
        examples: &[LabeledExample],
        vocabulary: &Vocabulary,
    ) -> Result<Arc<ClassifierModel>, TrainingError> {
        match self.classifier.train(examples, vocabulary) {
            Ok(model) => Ok(self.install(model)),
            Err(e) => {
                log::warn!("Retrain failed, keeping the active model: {e}");
                Err(e)
            }
        }
    }

    /// Retrain on a worker thread. Callers that serve requests never join the
    /// handle; they keep predicting against the current model meanwhile.
    pub fn spawn_retrain(
        self: &Arc<Self>,
        corpus: VectorizedCorpus,
    ) -> JoinHandle<Result<Arc<ClassifierModel>, TrainingError>> {
        let service = Arc::clone(self);
        std::thread::spawn(move || service.retrain(&corpus.examples, &corpus.vocabulary))
    }

    pub fn load_from<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<Arc<ClassifierModel>, ModelFormatError> {
        let model = persistence::load(path)?;
        Ok(self.install(model))
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> crate::error::Result<()> {
        let model = self.current().ok_or(UntrainedModelError)?;
        persistence::save(&model, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::tests::training_set;
    use crate::dataset::CorpusStatistics;
    use crate::error::Error;

    fn vectorized() -> VectorizedCorpus {
        let (examples, vocabulary) = training_set();
        VectorizedCorpus {
            examples,
            vocabulary,
            statistics: CorpusStatistics::default(),
        }
    }

    #[test]
    fn test_predict_before_training_fails() {
        let service = ClassifierService::new(Classifier::default());
        assert!(!service.is_trained());
        assert_eq!(
            service.predict(&FeatureVector::new()).unwrap_err(),
            UntrainedModelError
        );
        assert!(matches!(
            service.save_to("/tmp/never-written.json"),
            Err(Error::Untrained(_))
        ));
    }

    #[test]
    fn test_failed_retrain_keeps_previous_model() {
        let (examples, vocabulary) = training_set();
        let service = ClassifierService::new(Classifier::default());
        let first = service.retrain(&examples, &vocabulary).unwrap();

        let err = service.retrain(&examples[..3], &vocabulary).unwrap_err();
        assert!(matches!(err, TrainingError::InsufficientExamples { .. }));

        let current = service.current().unwrap();
        assert!(Arc::ptr_eq(&first, &current));
    }

    #[test]
    fn test_retrain_swaps_whole_model() {
        let (examples, vocabulary) = training_set();
        let service = ClassifierService::new(Classifier::default());
        let first = service.retrain(&examples, &vocabulary).unwrap();
        let held = service.current().unwrap();

        let second = service.retrain(&examples, &vocabulary).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        // a reader holding the old snapshot still sees the complete old model
        assert!(Arc::ptr_eq(&held, &first));
        assert_eq!(held.vocabulary().len(), vocabulary.len());
    }

    #[test]
    fn test_background_retrain_while_predicting() {
        let (examples, vocabulary) = training_set();
        let service = Arc::new(ClassifierService::new(Classifier::default()));
        service.retrain(&examples, &vocabulary).unwrap();

        let handle = service.spawn_retrain(vectorized());
        let features: FeatureVector = [("free".to_string(), 2.0)].into_iter().collect();
        for _ in 0..50 {
            let result = service.predict(&features).unwrap();
            let total: f64 = result.probabilities.values().sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
        let new_model = handle.join().unwrap().unwrap();
        assert!(Arc::ptr_eq(&new_model, &service.current().unwrap()));
    }

    #[test]
    fn test_save_and_load_through_service() {
        let (examples, vocabulary) = training_set();
        let service = ClassifierService::new(Classifier::default());
        service.retrain(&examples, &vocabulary).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        service.save_to(&path).unwrap();

        let restored = ClassifierService::new(Classifier::default());
        restored.load_from(&path).unwrap();
        assert_eq!(restored.metadata(), service.metadata());
    }
}
