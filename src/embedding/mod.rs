//! Embedding providers.
//!
//! A provider turns a batch of normalized texts into unit-length vectors, so
//! the inner product of two vectors is their cosine similarity.
//!
//! - [`HttpEmbedder`]: OpenAI-compatible `/embeddings` endpoint
//! - [`LocalEmbedder`]: local fastembed model (`fastembed` feature)

pub mod http;
#[cfg(feature = "fastembed")]
pub mod local;

pub use http::HttpEmbedder;
#[cfg(feature = "fastembed")]
pub use local::LocalEmbedder;

use std::sync::Arc;

use secrecy::SecretString;

use crate::config::{EmbeddingBackend, MlConfig};
use crate::error::EmbeddingError;

/// A unit-normalized embedding vector.
///
/// Constructed only through [`EmbeddingVector::normalized`], never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector(Vec<f32>);

impl EmbeddingVector {
    /// Scale `values` to unit Euclidean length.
    ///
    /// An all-zero vector stays all-zero; it then has zero similarity to
    /// everything.
    pub fn normalized(mut values: Vec<f32>) -> Self {
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut values {
                *v /= norm;
            }
        }
        Self(values)
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Inner product; equals cosine similarity for unit vectors.
    pub fn inner(&self, other: &EmbeddingVector) -> f32 {
        self.0.iter().zip(&other.0).map(|(a, b)| a * b).sum()
    }
}

/// Converts texts to embedding vectors.
///
/// Implementations return exactly one vector per text, in input order.
pub trait EmbeddingProvider: Send + Sync {
    /// Model name, for logging.
    fn name(&self) -> &str;

    /// Embed a batch of texts.
    fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbeddingError>;
}

/// Verify a provider answered with one vector per text.
pub fn check_batch_len(expected: usize, got: usize) -> Result<(), EmbeddingError> {
    if expected == got {
        Ok(())
    } else {
        Err(EmbeddingError::LengthMismatch { expected, got })
    }
}

/// Create the embedding provider selected in configuration.
pub fn create_provider(
    config: &MlConfig,
    api_key: Option<SecretString>,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match config.backend {
        EmbeddingBackend::Http => {
            let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                EmbeddingError::InitFailed("no embedding endpoint configured".into())
            })?;
            let provider = HttpEmbedder::new(endpoint, &config.model, api_key)?;
            tracing::info!("Using HTTP embeddings (model: {}, endpoint: {endpoint})", config.model);
            Ok(Arc::new(provider))
        }
        EmbeddingBackend::Fastembed => create_local_provider(config),
    }
}

#[cfg(feature = "fastembed")]
fn create_local_provider(config: &MlConfig) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    let cache_dir = std::env::var("MAIL_RECEPTIONIST_MODEL_DIR")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("mail-receptionist"));
    let provider = LocalEmbedder::new(&config.model, cache_dir)?;
    tracing::info!("Using local embeddings (model: {})", config.model);
    Ok(Arc::new(provider))
}

#[cfg(not(feature = "fastembed"))]
fn create_local_provider(config: &MlConfig) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    Err(EmbeddingError::InitFailed(format!(
        "model {} needs the fastembed backend, which this build does not include",
        config.model
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_has_unit_length() {
        let v = EmbeddingVector::normalized(vec![3.0, 4.0]);
        assert!((v.inner(&v) - 1.0).abs() < 1e-6);
        assert_eq!(v.as_slice(), &[0.6, 0.8]);
    }

    #[test]
    fn zero_vector_stays_zero() {
        let v = EmbeddingVector::normalized(vec![0.0, 0.0, 0.0]);
        assert_eq!(v.as_slice(), &[0.0, 0.0, 0.0]);
        let other = EmbeddingVector::normalized(vec![1.0, 0.0, 0.0]);
        assert_eq!(v.inner(&other), 0.0);
    }

    #[test]
    fn inner_is_cosine() {
        let a = EmbeddingVector::normalized(vec![1.0, 0.0]);
        let b = EmbeddingVector::normalized(vec![1.0, 1.0]);
        assert!((a.inner(&b) - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn batch_len_mismatch() {
        assert!(check_batch_len(2, 2).is_ok());
        assert!(matches!(
            check_batch_len(3, 1),
            Err(EmbeddingError::LengthMismatch { expected: 3, got: 1 })
        ));
    }
}
