//! Positive and negative exemplar vectors.
//!
//! Mailbox-derived vectors come first, then the optional built-in set.

use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::embedding::EmbeddingVector;
use crate::error::{ConfigError, EmbeddingError, Error};

#[derive(Debug, Clone, Default)]
pub struct ExemplarSet {
    pub positive: Vec<EmbeddingVector>,
    pub negative: Vec<EmbeddingVector>,
}

impl ExemplarSet {
    pub fn new(positive: Vec<EmbeddingVector>, negative: Vec<EmbeddingVector>) -> Self {
        Self { positive, negative }
    }

    /// Concatenate mailbox-derived vectors with an optional built-in set.
    ///
    /// Fails when neither source provides a positive example, or when the
    /// vectors disagree on dimension.
    pub fn assemble(
        mailbox_positive: Vec<EmbeddingVector>,
        mailbox_negative: Vec<EmbeddingVector>,
        builtin: Option<BuiltinVectors>,
    ) -> Result<Self, Error> {
        let mut set = Self::new(mailbox_positive, mailbox_negative);
        if let Some(builtin) = builtin {
            set.positive.extend(builtin.positive);
            set.negative.extend(builtin.negative);
        }

        if set.positive.is_empty() {
            return Err(missing_positives().into());
        }
        if set.negative.is_empty() {
            warn!("No negative examples; nothing can override a positive match");
        }

        let expected = set.positive[0].dimension();
        if let Some(odd) = set
            .positive
            .iter()
            .chain(&set.negative)
            .find(|v| v.dimension() != expected)
        {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                got: odd.dimension(),
            }
            .into());
        }

        info!(
            positive = set.positive.len(),
            negative = set.negative.len(),
            "Assembled exemplar set"
        );
        Ok(set)
    }

    pub fn dimension(&self) -> Option<usize> {
        self.positive.first().map(EmbeddingVector::dimension)
    }

    /// Fail unless every vector in `vectors` has the exemplars' dimension.
    pub fn check_dimension(&self, vectors: &[EmbeddingVector]) -> Result<(), EmbeddingError> {
        let Some(expected) = self.dimension() else {
            return Ok(());
        };
        match vectors.iter().find(|v| v.dimension() != expected) {
            Some(odd) => Err(EmbeddingError::DimensionMismatch {
                expected,
                got: odd.dimension(),
            }),
            None => Ok(()),
        }
    }
}

pub(crate) fn missing_positives() -> ConfigError {
    ConfigError::invalid(
        "no positive examples: the example folder is empty and no built-in vectors are enabled",
    )
}

/// Precomputed exemplar vectors shipped with an installation.
#[derive(Debug, Clone, Default)]
pub struct BuiltinVectors {
    pub positive: Vec<EmbeddingVector>,
    pub negative: Vec<EmbeddingVector>,
}

#[derive(Deserialize)]
struct BuiltinFile {
    positive: Vec<Vec<f32>>,
    #[serde(default)]
    negative: Vec<Vec<f32>>,
}

impl BuiltinVectors {
    /// Load `{"positive": [[..], ..], "negative": [[..], ..]}`, re-normalizing
    /// every vector.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let load_error = |reason: String| ConfigError::BuiltinVectors {
            path: path.display().to_string(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
        let file: BuiltinFile =
            serde_json::from_str(&content).map_err(|e| load_error(e.to_string()))?;

        let vectors = Self {
            positive: file.positive.into_iter().map(EmbeddingVector::normalized).collect(),
            negative: file.negative.into_iter().map(EmbeddingVector::normalized).collect(),
        };
        info!(
            path = %path.display(),
            positive = vectors.positive.len(),
            negative = vectors.negative.len(),
            "Loaded built-in vectors"
        );
        Ok(vectors)
    }
}
