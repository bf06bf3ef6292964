//! Threshold-based verdicts over the embedding registry.

use crate::registry::{EmbeddingRegistry, RegistryError};
use crate::types::Embedding;
use serde::Serialize;

/// Acceptance boundary for MobileFaceNet Euclidean distances.
pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 1.0;

/// Distance between two embeddings under the embedding model's native metric.
///
/// Implementations must be non-negative, symmetric, and zero for identical vectors.
pub trait DistanceMetric {
    fn distance(&self, a: &Embedding, b: &Embedding) -> f32;
}

/// Euclidean (L2) distance over raw embedding values.
#[derive(Debug, Clone, Copy, Default)]
pub struct Euclidean;

impl DistanceMetric for Euclidean {
    fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        a.euclidean_distance(b)
    }
}

/// Outcome of comparing a query embedding against the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Accepted { label: String, distance: f32 },
    Rejected { distance: f32 },
    NoEntries,
}

impl Verdict {
    pub fn is_accepted_for(&self, expected: &str) -> bool {
        matches!(self, Verdict::Accepted { label, .. } if label == expected)
    }

    /// Distance to the nearest entry, if the registry had any.
    pub fn distance(&self) -> Option<f32> {
        match self {
            Verdict::Accepted { distance, .. } | Verdict::Rejected { distance } => Some(*distance),
            Verdict::NoEntries => None,
        }
    }
}

/// Applies an absolute distance threshold to nearest-match lookups.
#[derive(Debug, Clone)]
pub struct SimilarityMatcher<M = Euclidean> {
    metric: M,
    threshold: f32,
}

impl Default for SimilarityMatcher<Euclidean> {
    fn default() -> Self {
        Self::new(Euclidean, DEFAULT_DISTANCE_THRESHOLD)
    }
}

impl<M: DistanceMetric> SimilarityMatcher<M> {
    pub fn new(metric: M, threshold: f32) -> Self {
        Self { metric, threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Compare `query` against every registry entry.
    ///
    /// Accepts iff the nearest distance is strictly below the threshold. A NaN
    /// distance never compares below, so it is rejected.
    pub fn compare(
        &self,
        query: &Embedding,
        registry: &EmbeddingRegistry,
    ) -> Result<Verdict, RegistryError> {
        let verdict = match registry.nearest_match(query, &self.metric)? {
            None => Verdict::NoEntries,
            Some(nearest) if nearest.distance < self.threshold => Verdict::Accepted {
                label: nearest.label,
                distance: nearest.distance,
            },
            Some(nearest) => Verdict::Rejected {
                distance: nearest.distance,
            },
        };
        Ok(verdict)
    }
}

/// Frame-level recognition: true iff any face's verdict accepts `expected`.
///
/// One matching face marks the whole frame as recognized, even alongside
/// non-matching faces.
pub fn any_accepted<'a, I>(verdicts: I, expected: &str) -> bool
where
    I: IntoIterator<Item = &'a Verdict>,
{
    verdicts.into_iter().any(|v| v.is_accepted_for(expected))
}
