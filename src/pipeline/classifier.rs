//! Similarity classification against exemplar sets.
//!
//! Per candidate: scan positives in order and stop at the first one above
//! the threshold; only then scan negatives, where the first one above the
//! threshold overrides the match. Scanning is brute force and first-match.

use tracing::debug;

use crate::embedding::EmbeddingVector;
use crate::pipeline::actions::FilterMode;
use crate::pipeline::exemplars::ExemplarSet;

/// Similarity cut-off in the open interval (0, 1).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Threshold(f32);

impl Threshold {
    pub fn new(value: f32) -> Option<Self> {
        (value > 0.0 && value < 1.0).then_some(Self(value))
    }

    /// From an integer percentage (1..=99), as stored in settings.
    pub fn from_percent(percent: u8) -> Option<Self> {
        Self::new(f32::from(percent) / 100.0)
    }

    pub fn value(self) -> f32 {
        self.0
    }
}

/// Pairwise similarity between two embedding vectors.
pub trait Similarity {
    fn similarity(&self, a: &EmbeddingVector, b: &EmbeddingVector) -> f32;
}

/// Inner product (cosine similarity for unit vectors).
#[derive(Debug, Default, Clone, Copy)]
pub struct InnerProduct;

impl Similarity for InnerProduct {
    fn similarity(&self, a: &EmbeddingVector, b: &EmbeddingVector) -> f32 {
        a.inner(b)
    }
}

/// Classification result for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub matched: bool,
    pub mode: FilterMode,
}

pub struct SimilarityClassifier<S = InnerProduct> {
    similarity: S,
    threshold: Threshold,
}

impl SimilarityClassifier<InnerProduct> {
    pub fn new(threshold: Threshold) -> Self {
        Self::with_similarity(InnerProduct, threshold)
    }
}

impl<S: Similarity> SimilarityClassifier<S> {
    pub fn with_similarity(similarity: S, threshold: Threshold) -> Self {
        Self {
            similarity,
            threshold,
        }
    }

    /// Whether one candidate matches. An empty positive set matches nothing.
    pub fn matches(&self, candidate: &EmbeddingVector, exemplars: &ExemplarSet) -> bool {
        let limit = self.threshold.value();
        let above =
            |example: &EmbeddingVector| self.similarity.similarity(candidate, example) > limit;

        if !exemplars.positive.iter().any(above) {
            return false;
        }
        !exemplars.negative.iter().any(above)
    }

    /// One flag per candidate, in candidate order.
    pub fn classify(&self, candidates: &[EmbeddingVector], exemplars: &ExemplarSet) -> Vec<bool> {
        let flags: Vec<bool> = candidates
            .iter()
            .map(|c| self.matches(c, exemplars))
            .collect();
        debug!(
            candidates = candidates.len(),
            matched = flags.iter().filter(|m| **m).count(),
            threshold = self.threshold.value(),
            "Classified candidates"
        );
        flags
    }

    /// Like [`classify`](Self::classify), tagged with the configured mode.
    pub fn verdicts(
        &self,
        candidates: &[EmbeddingVector],
        exemplars: &ExemplarSet,
        mode: FilterMode,
    ) -> Vec<Verdict> {
        self.classify(candidates, exemplars)
            .into_iter()
            .map(|matched| Verdict { matched, mode })
            .collect()
    }
}
