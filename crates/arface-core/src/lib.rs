//! arface-core: recognition and overlay coordination for AR face filters.
//!
//! Keeps a labeled registry of face embeddings, matches new faces against it
//! under a distance threshold, and maps each tracked face to at most one AR
//! overlay node. Detection, embedding extraction and rendering are reached
//! through narrow traits; an ONNX Runtime MobileFaceNet embedder is included.

pub mod assets;
pub mod detector;
pub mod embedder;
pub mod labels;
pub mod lifecycle;
pub mod matcher;
pub mod pipeline;
pub mod registry;
pub mod types;

pub use assets::{AssetSlots, OverlayAssets};
pub use detector::{DetectedFace, DetectionError, FaceDetector};
pub use embedder::{EmbedderError, FaceEmbedder, MobileFaceNet};
pub use labels::Labels;
pub use lifecycle::{OverlayRenderer, TrackedFaceLifecycle, TrackingState, Transition};
pub use matcher::{DistanceMetric, Euclidean, SimilarityMatcher, Verdict};
pub use pipeline::{FrameOutcome, Mode, RecognitionPipeline};
pub use registry::{EmbeddingRegistry, RegistryError};
pub use types::{BoundingBox, Embedding, MatchColor, Recognition};
