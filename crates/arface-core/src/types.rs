use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence, if the detector reports one.
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: None,
        }
    }
}

/// Face embedding vector (192-dimensional for MobileFaceNet).
///
/// Immutable once produced; every consumer works on borrowed views or owned clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "mobile_face_net").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Callers must ensure both have the same dimension; extra trailing
    /// values on the longer side are ignored.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Feedback color attached to a recognition record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchColor {
    /// Nothing in the registry was close enough.
    Unmatched,
    /// Closest entry is within threshold and carries the current label.
    Matched,
    /// Closest entry is within threshold but belongs to another label.
    Rejected,
}

/// One match outcome for one detected face in one frame.
#[derive(Debug, Clone, Serialize)]
pub struct Recognition {
    pub id: String,
    pub label: String,
    pub distance: f32,
    pub bounding_box: BoundingBox,
    pub color: MatchColor,
    /// Owned copy of the embedding computed for this face.
    pub extra: Embedding,
}
