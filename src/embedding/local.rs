//! Local embedding model wrapper for fastembed.

use std::path::PathBuf;
use std::sync::Mutex;

use fastembed::{InitOptions, TextEmbedding};

use super::{EmbeddingProvider, EmbeddingVector, check_batch_len};
use crate::error::EmbeddingError;

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct LocalEmbedder {
    model: Mutex<TextEmbedding>,
    model_name: String,
}

impl LocalEmbedder {
    /// Load (downloading on first use) the named model into `cache_dir/models`.
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
        let model_enum = parse_model_name(model_name)?;

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {e}"))
        })?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(false);

        let model =
            TextEmbedding::try_new(options).map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
        })
    }
}

impl EmbeddingProvider for LocalEmbedder {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::RequestFailed(format!("Failed to acquire model lock: {e}"))
        })?;

        let raw = model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::RequestFailed(e.to_string()))?;
        check_batch_len(texts.len(), raw.len())?;

        Ok(raw.into_iter().map(EmbeddingVector::normalized).collect())
    }
}

/// Parse model name string to fastembed enum.
fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
    match name.to_lowercase().as_str() {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "paraphrase-multilingual-minilm-l12-v2" | "paraphrase-ml-minilm-l12-v2" => {
            Ok(fastembed::EmbeddingModel::ParaphraseMLMiniLML12V2)
        }
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        _ => Err(EmbeddingError::InvalidModel(format!(
            "Unknown model: {name}. Supported models: all-MiniLM-L6-v2, \
             paraphrase-multilingual-MiniLM-L12-v2, multilingual-e5-small, \
             multilingual-e5-base, bge-small-en-v1.5, bge-base-en-v1.5"
        ))),
    }
}
