//! Labeled reference embeddings with nearest-neighbour lookup.

use crate::matcher::DistanceMetric;
use crate::types::Embedding;
use thiserror::Error;

/// Embedding length produced by MobileFaceNet.
pub const DEFAULT_EMBEDDING_DIM: usize = 192;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("embedding dimension mismatch: registry holds {expected}-dim vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding for {label:?} contains non-finite values")]
    NonFinite { label: String },
}

/// A registered reference face.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub label: String,
    pub embedding: Embedding,
}

/// Closest registry entry for a query.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestMatch {
    pub label: String,
    pub distance: f32,
}

/// In-memory store of reference embeddings, keyed by label.
///
/// Entries are kept in insertion order. Re-registering a label replaces its
/// embedding in place, so the entry keeps its original position for tie-breaks.
#[derive(Debug, Clone)]
pub struct EmbeddingRegistry {
    dimension: usize,
    entries: Vec<RegistryEntry>,
}

impl Default for EmbeddingRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIM)
    }
}

impl EmbeddingRegistry {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn get(&self, label: &str) -> Option<&Embedding> {
        self.entries
            .iter()
            .find(|e| e.label == label)
            .map(|e| &e.embedding)
    }

    /// Register `embedding` under `label`, overwriting any previous entry.
    ///
    /// Fails on a vector whose length differs from the registry dimension, or
    /// one holding NaN or infinite components.
    pub fn register(&mut self, label: &str, embedding: Embedding) -> Result<(), RegistryError> {
        self.check_dimension(&embedding)?;
        if embedding.values.iter().any(|v| !v.is_finite()) {
            return Err(RegistryError::NonFinite {
                label: label.to_string(),
            });
        }

        match self.entries.iter_mut().find(|e| e.label == label) {
            Some(entry) => {
                entry.embedding = embedding;
                tracing::debug!(label, "registry entry replaced");
            }
            None => {
                self.entries.push(RegistryEntry {
                    label: label.to_string(),
                    embedding,
                });
                tracing::debug!(label, size = self.entries.len(), "registry entry added");
            }
        }
        Ok(())
    }

    /// Find the entry closest to `query` under `metric`.
    ///
    /// Returns `Ok(None)` on an empty registry. Ties keep the earliest-inserted entry.
    pub fn nearest_match<M: DistanceMetric + ?Sized>(
        &self,
        query: &Embedding,
        metric: &M,
    ) -> Result<Option<NearestMatch>, RegistryError> {
        self.check_dimension(query)?;

        let mut best: Option<(usize, f32)> = None;
        for (i, entry) in self.entries.iter().enumerate() {
            let distance = metric.distance(query, &entry.embedding);
            // Strict comparison: an equal distance never displaces an earlier entry.
            let closer = match best {
                None => true,
                Some((_, best_distance)) => distance < best_distance,
            };
            if closer {
                best = Some((i, distance));
            }
        }

        Ok(best.map(|(idx, distance)| NearestMatch {
            label: self.entries[idx].label.clone(),
            distance,
        }))
    }

    fn check_dimension(&self, embedding: &Embedding) -> Result<(), RegistryError> {
        if embedding.dim() != self.dimension {
            return Err(RegistryError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.dim(),
            });
        }
        Ok(())
    }
}
