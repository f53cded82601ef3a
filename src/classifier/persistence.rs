//! Versioned on-disk form of a [`ClassifierModel`].
//!
//! The blob is a JSON envelope `{format, version, model}`. The tag and
//! version are checked before the payload is decoded, so a model written by
//! an incompatible build fails loudly instead of loading half-right.

use super::ClassifierModel;
use crate::error::ModelFormatError;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const FORMAT_TAG: &str = "inbox-triage/naive-bayes";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    format: &'a str,
    version: u32,
    model: &'a ClassifierModel,
}

#[derive(Deserialize)]
struct Envelope {
    format: String,
    version: u32,
    model: serde_json::Value,
}

pub fn serialize(model: &ClassifierModel) -> Result<Vec<u8>, ModelFormatError> {
    let envelope = EnvelopeRef {
        format: FORMAT_TAG,
        version: FORMAT_VERSION,
        model,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

pub fn deserialize(bytes: &[u8]) -> Result<ClassifierModel, ModelFormatError> {
    let envelope: Envelope = serde_json::from_slice(bytes)?;
    if envelope.format != FORMAT_TAG {
        return Err(ModelFormatError::UnknownFormat(envelope.format));
    }
    if envelope.version != FORMAT_VERSION {
        return Err(ModelFormatError::UnsupportedVersion {
            found: envelope.version,
            supported: FORMAT_VERSION,
        });
    }
    let model: ClassifierModel = serde_json::from_value(envelope.model)?;
    model.validate().map_err(ModelFormatError::Inconsistent)?;
    Ok(model)
}

pub fn save<P: AsRef<Path>>(model: &ClassifierModel, path: P) -> Result<(), ModelFormatError> {
    let bytes = serialize(model)?;
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(&path, bytes)?;
    log::info!("Saved model to {}", path.as_ref().display());
    Ok(())
}

pub fn load<P: AsRef<Path>>(path: P) -> Result<ClassifierModel, ModelFormatError> {
    let bytes = std::fs::read(&path)?;
    let model = deserialize(&bytes)?;
    log::info!(
        "Loaded model from {} ({} terms, trained {})",
        path.as_ref().display(),
        model.metadata().vocabulary_size,
        model.metadata().trained_at
    );
    Ok(model)
}
