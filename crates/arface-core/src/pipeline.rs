//! Per-frame orchestration: detection → embedding → registry / matcher → overlay.

use crate::assets::AssetSlots;
use crate::detector::{DetectedFace, FaceDetector};
use crate::embedder::FaceEmbedder;
use crate::lifecycle::{OverlayRenderer, ReleaseCause, TrackedFaceLifecycle, TrackingState, Transition};
use crate::matcher::{any_accepted, DistanceMetric, Euclidean, SimilarityMatcher, Verdict};
use crate::registry::EmbeddingRegistry;
use crate::types::{Embedding, MatchColor, Recognition};
use serde::Serialize;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

/// Label used until the caller selects another one.
pub const DEFAULT_LABEL: &str = "Mr.Quy";

/// Independent training / recognition switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Mode {
    pub training: bool,
    pub recognizing: bool,
}

/// Everything one frame produced.
#[derive(Debug, Clone, Serialize)]
pub struct FrameOutcome {
    /// True when overlay assets were not loaded yet and the frame was ignored.
    pub skipped: bool,
    pub faces: usize,
    /// Training-mode records, one per successfully embedded face.
    pub recognitions: Vec<Recognition>,
    /// Recognition-mode verdicts, one per successfully embedded face.
    pub verdicts: Vec<Verdict>,
    pub recognized: bool,
    pub transition: Transition,
}

impl FrameOutcome {
    fn skipped() -> Self {
        Self {
            skipped: true,
            faces: 0,
            recognitions: Vec::new(),
            verdicts: Vec::new(),
            recognized: false,
            transition: Transition::Unchanged,
        }
    }
}

pub struct RecognitionPipeline<K, R, D, E, M = Euclidean>
where
    R: OverlayRenderer<K>,
{
    registry: EmbeddingRegistry,
    matcher: SimilarityMatcher<M>,
    lifecycle: TrackedFaceLifecycle<K, R>,
    detector: D,
    embedder: E,
    assets: Arc<AssetSlots>,
    mode: Mode,
    label: String,
    next_record_id: u64,
}

impl<K, R, D, E> RecognitionPipeline<K, R, D, E, Euclidean>
where
    K: Hash + Eq + Clone + Debug,
    R: OverlayRenderer<K>,
    D: FaceDetector,
    E: FaceEmbedder,
{
    /// Pipeline with an empty default registry, Euclidean matching at the default
    /// threshold, and both modes off.
    pub fn new(detector: D, embedder: E, renderer: R, assets: Arc<AssetSlots>) -> Self {
        Self {
            registry: EmbeddingRegistry::default(),
            matcher: SimilarityMatcher::default(),
            lifecycle: TrackedFaceLifecycle::new(renderer),
            detector,
            embedder,
            assets,
            mode: Mode::default(),
            label: DEFAULT_LABEL.to_string(),
            next_record_id: 0,
        }
    }
}

impl<K, R, D, E, M> RecognitionPipeline<K, R, D, E, M>
where
    K: Hash + Eq + Clone + Debug,
    R: OverlayRenderer<K>,
    D: FaceDetector,
    E: FaceEmbedder,
    M: DistanceMetric,
{
    /// Replace the matcher (metric and threshold).
    pub fn with_matcher<M2: DistanceMetric>(
        self,
        matcher: SimilarityMatcher<M2>,
    ) -> RecognitionPipeline<K, R, D, E, M2> {
        RecognitionPipeline {
            registry: self.registry,
            matcher,
            lifecycle: self.lifecycle,
            detector: self.detector,
            embedder: self.embedder,
            assets: self.assets,
            mode: self.mode,
            label: self.label,
            next_record_id: self.next_record_id,
        }
    }

    /// Replace the registry, e.g. to change the embedding dimension.
    pub fn with_registry(mut self, registry: EmbeddingRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn registry(&self) -> &EmbeddingRegistry {
        &self.registry
    }

    pub fn matcher(&self) -> &SimilarityMatcher<M> {
        &self.matcher
    }

    pub fn lifecycle(&self) -> &TrackedFaceLifecycle<K, R> {
        &self.lifecycle
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        self.lifecycle.renderer_mut()
    }

    pub fn set_training(&mut self, enabled: bool) {
        self.mode.training = enabled;
        tracing::info!(enabled, "training mode");
    }

    /// Switch recognition. Turning it off removes every overlay node at once.
    pub fn set_recognizing(&mut self, enabled: bool) {
        self.mode.recognizing = enabled;
        if !enabled {
            let released = self.lifecycle.release_all(ReleaseCause::RecognitionOff);
            tracing::info!(enabled, released, "recognition mode");
        } else {
            tracing::info!(enabled, "recognition mode");
        }
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
        tracing::info!(label = %self.label, "current label changed");
    }

    /// Process one tracker callback for `face`.
    ///
    /// Detector failures count as a frame with no faces; embedding or matching
    /// failures drop only the affected face.
    pub fn process_frame(
        &mut self,
        face: &K,
        state: TrackingState,
        frame: &D::Frame,
    ) -> FrameOutcome {
        let Some(assets) = self.assets.overlay() else {
            tracing::trace!("overlay assets not loaded; frame skipped");
            return FrameOutcome::skipped();
        };

        let detected = match self.detector.detect(frame) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "detection failed; treating frame as empty");
                Vec::new()
            }
        };

        let recognitions = if self.mode.training {
            self.train(&detected)
        } else {
            Vec::new()
        };

        let (verdicts, recognized, transition) = if self.mode.recognizing {
            let verdicts = self.recognize(&detected);
            let recognized = any_accepted(&verdicts, &self.label);
            let transition = self.lifecycle.reconcile(face, state, recognized, &assets);
            (verdicts, recognized, transition)
        } else {
            (Vec::new(), false, self.lifecycle.release(face))
        };

        tracing::debug!(
            ?face,
            ?state,
            faces = detected.len(),
            recognized,
            ?transition,
            "frame processed"
        );

        FrameOutcome {
            skipped: false,
            faces: detected.len(),
            recognitions,
            verdicts,
            recognized,
            transition,
        }
    }

    /// Remove every overlay node (system teardown).
    pub fn teardown(&mut self) -> usize {
        self.lifecycle.release_all(ReleaseCause::Teardown)
    }

    /// Register every face under the current label. The feedback color reflects
    /// the registry as it was before this face was added.
    fn train(&mut self, faces: &[DetectedFace]) -> Vec<Recognition> {
        let mut records = Vec::with_capacity(faces.len());

        for face in faces {
            let Some((embedding, verdict)) = self.embed_and_compare(face) else {
                continue;
            };

            let color = match &verdict {
                Verdict::Accepted { label, .. } if *label == self.label => MatchColor::Matched,
                Verdict::Accepted { .. } => MatchColor::Rejected,
                Verdict::Rejected { .. } | Verdict::NoEntries => MatchColor::Unmatched,
            };

            if let Err(e) = self.registry.register(&self.label, embedding.clone()) {
                tracing::warn!(error = %e, "training: face not registered");
                continue;
            }

            let record = Recognition {
                id: self.next_record_id.to_string(),
                label: self.label.clone(),
                distance: verdict.distance().unwrap_or(f32::MAX),
                bounding_box: face.bounding_box,
                color,
                extra: embedding,
            };
            self.next_record_id += 1;

            tracing::debug!(label = %record.label, distance = record.distance, ?color, "training: face registered");
            records.push(record);
        }

        records
    }

    fn recognize(&mut self, faces: &[DetectedFace]) -> Vec<Verdict> {
        faces
            .iter()
            .filter_map(|face| self.embed_and_compare(face).map(|(_, verdict)| verdict))
            .collect()
    }

    fn embed_and_compare(&mut self, face: &DetectedFace) -> Option<(Embedding, Verdict)> {
        let embedding = match self.embedder.embed(&face.crop) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "embedding failed; face skipped");
                return None;
            }
        };
        match self.matcher.compare(&embedding, &self.registry) {
            Ok(verdict) => Some((embedding, verdict)),
            Err(e) => {
                tracing::warn!(error = %e, "matching failed; face skipped");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{FaceTexture, RenderModel};
    use crate::detector::DetectionError;
    use crate::embedder::EmbedderError;
    use crate::lifecycle::tests::RecordingRenderer;
    use crate::types::BoundingBox;
    use image::{Rgb, RgbImage};
    use std::path::Path;

    /// Frames are lists of single-pixel "faces"; `Err` simulates a detector failure.
    type TestFrame = Result<Vec<[u8; 3]>, String>;

    struct PixelDetector;

    impl FaceDetector for PixelDetector {
        type Frame = TestFrame;

        fn detect(&mut self, frame: &TestFrame) -> Result<Vec<DetectedFace>, DetectionError> {
            let pixels = frame.as_ref().map_err(|e| DetectionError::DetectorFailed(e.clone()))?;
            Ok(pixels
                .iter()
                .enumerate()
                .map(|(i, p)| DetectedFace {
                    bounding_box: BoundingBox::new(i as f32 * 10.0, 0.0, 10.0, 10.0),
                    crop: RgbImage::from_pixel(1, 1, Rgb(*p)),
                })
                .collect())
        }
    }

    /// Embeds a crop as its first pixel's channel values. White pixels fail.
    struct PixelEmbedder;

    impl FaceEmbedder for PixelEmbedder {
        fn embed(&mut self, crop: &RgbImage) -> Result<Embedding, EmbedderError> {
            let p = crop.get_pixel(0, 0);
            if p.0 == [255, 255, 255] {
                return Err(EmbedderError::InferenceFailed("overexposed".into()));
            }
            Ok(Embedding::new(p.0.iter().map(|&c| c as f32).collect()))
        }
    }

    type TestPipeline = RecognitionPipeline<u32, RecordingRenderer, PixelDetector, PixelEmbedder>;

    fn loaded_assets() -> Arc<AssetSlots> {
        let slots = AssetSlots::new();
        let mut glb = b"glTF".to_vec();
        glb.extend_from_slice(&2u32.to_le_bytes());
        glb.extend_from_slice(&12u32.to_le_bytes());
        slots.model.publish(RenderModel::from_bytes(Path::new("fox.glb"), glb));
        slots.texture.publish(Ok(FaceTexture {
            source: "freckles.png".into(),
            image: image::RgbaImage::new(2, 2),
        }));
        slots
    }

    fn pipeline_with(assets: Arc<AssetSlots>) -> TestPipeline {
        RecognitionPipeline::new(PixelDetector, PixelEmbedder, RecordingRenderer::default(), assets)
            .with_registry(EmbeddingRegistry::new(3))
    }

    fn pipeline() -> TestPipeline {
        pipeline_with(loaded_assets())
    }

    const ME: [u8; 3] = [10, 20, 30];
    const STRANGER: [u8; 3] = [90, 20, 30];

    #[test]
    fn test_frames_skipped_until_assets_loaded() {
        let assets = AssetSlots::new();
        let mut p = pipeline_with(Arc::clone(&assets));
        p.set_training(true);

        let outcome = p.process_frame(&1, TrackingState::Tracking, &Ok(vec![ME]));
        assert!(outcome.skipped);
        assert!(p.registry().is_empty());
    }

    #[test]
    fn test_training_registers_under_current_label() {
        let mut p = pipeline();
        p.set_training(true);

        let first = p.process_frame(&1, TrackingState::Tracking, &Ok(vec![ME]));
        assert_eq!(first.recognitions.len(), 1);
        assert_eq!(first.recognitions[0].label, DEFAULT_LABEL);
        assert_eq!(first.recognitions[0].color, MatchColor::Unmatched);
        assert_eq!(first.recognitions[0].distance, f32::MAX);
        assert_eq!(p.registry().len(), 1);

        let second = p.process_frame(&1, TrackingState::Tracking, &Ok(vec![ME]));
        assert_eq!(second.recognitions[0].color, MatchColor::Matched);
        assert_eq!(second.recognitions[0].distance, 0.0);
        assert_ne!(first.recognitions[0].id, second.recognitions[0].id);
        assert_eq!(p.registry().len(), 1);
    }

    #[test]
    fn test_training_color_for_other_label() {
        let mut p = pipeline();
        p.set_training(true);
        p.set_label("guest");
        p.process_frame(&1, TrackingState::Tracking, &Ok(vec![ME]));

        p.set_label("Mr.Quy");
        let outcome = p.process_frame(&1, TrackingState::Tracking, &Ok(vec![ME]));
        assert_eq!(outcome.recognitions[0].color, MatchColor::Rejected);
        assert_eq!(p.registry().len(), 2);
    }

    #[test]
    fn test_training_alone_creates_no_overlay() {
        let mut p = pipeline();
        p.set_training(true);
        let outcome = p.process_frame(&1, TrackingState::Tracking, &Ok(vec![ME]));
        assert_eq!(outcome.transition, Transition::Unchanged);
        assert_eq!(p.lifecycle().node_count(), 0);
    }

    #[test]
    fn test_recognition_creates_then_stopped_destroys() {
        let mut p = pipeline();
        p.set_training(true);
        p.process_frame(&1, TrackingState::Tracking, &Ok(vec![ME]));
        p.set_training(false);
        p.set_recognizing(true);

        let outcome = p.process_frame(&1, TrackingState::Tracking, &Ok(vec![ME]));
        assert!(outcome.recognized);
        assert_eq!(outcome.transition, Transition::Created);
        assert!(p.lifecycle().has_node(&1));

        let outcome = p.process_frame(&1, TrackingState::Stopped, &Ok(vec![ME]));
        assert_eq!(outcome.transition, Transition::Destroyed);
        assert!(!p.lifecycle().has_node(&1));
        assert_eq!(p.lifecycle().renderer().detaches, 1);
    }

    #[test]
    fn test_stranger_is_rejected_and_no_node() {
        let mut p = pipeline();
        p.set_training(true);
        p.process_frame(&1, TrackingState::Tracking, &Ok(vec![ME]));
        p.set_training(false);
        p.set_recognizing(true);

        let outcome = p.process_frame(&1, TrackingState::Tracking, &Ok(vec![STRANGER]));
        assert!(!outcome.recognized);
        assert!(matches!(outcome.verdicts[0], Verdict::Rejected { .. }));
        assert!(!p.lifecycle().has_node(&1));
    }

    #[test]
    fn test_any_matching_face_recognizes_frame() {
        let mut p = pipeline();
        p.set_training(true);
        p.process_frame(&1, TrackingState::Tracking, &Ok(vec![ME]));
        p.set_training(false);
        p.set_recognizing(true);

        let outcome = p.process_frame(&1, TrackingState::Tracking, &Ok(vec![STRANGER, ME]));
        assert_eq!(outcome.verdicts.len(), 2);
        assert!(outcome.recognized);
        assert_eq!(outcome.transition, Transition::Created);
    }

    #[test]
    fn test_recognition_failure_destroys_node() {
        let mut p = pipeline();
        p.set_training(true);
        p.process_frame(&1, TrackingState::Tracking, &Ok(vec![ME]));
        p.set_training(false);
        p.set_recognizing(true);
        p.process_frame(&1, TrackingState::Tracking, &Ok(vec![ME]));

        let outcome = p.process_frame(&1, TrackingState::Tracking, &Ok(vec![]));
        assert_eq!(outcome.transition, Transition::Destroyed);
        assert_eq!(p.lifecycle().node_count(), 0);
    }

    #[test]
    fn test_detector_failure_is_empty_frame() {
        let mut p = pipeline();
        p.set_training(true);
        p.set_recognizing(true);

        let outcome = p.process_frame(&1, TrackingState::Tracking, &Err("camera busy".into()));
        assert!(!outcome.skipped);
        assert_eq!(outcome.faces, 0);
        assert!(!outcome.recognized);
        assert!(p.registry().is_empty());
    }

    #[test]
    fn test_embedding_failure_skips_only_that_face() {
        let mut p = pipeline();
        p.set_training(true);

        let outcome = p.process_frame(&1, TrackingState::Tracking, &Ok(vec![[255, 255, 255], ME]));
        assert_eq!(outcome.faces, 2);
        assert_eq!(outcome.recognitions.len(), 1);
        assert_eq!(p.registry().get(DEFAULT_LABEL), Some(&Embedding::new(vec![10.0, 20.0, 30.0])));
    }

    #[test]
    fn test_dimension_mismatch_skips_face() {
        let mut p = pipeline().with_registry(EmbeddingRegistry::new(192));
        p.set_training(true);
        let outcome = p.process_frame(&1, TrackingState::Tracking, &Ok(vec![ME]));
        assert!(outcome.recognitions.is_empty());
        assert!(p.registry().is_empty());
    }

    #[test]
    fn test_recognition_off_releases_nodes() {
        let mut p = pipeline();
        p.set_training(true);
        p.process_frame(&1, TrackingState::Tracking, &Ok(vec![ME]));
        p.set_recognizing(true);
        p.process_frame(&1, TrackingState::Tracking, &Ok(vec![ME]));
        p.process_frame(&2, TrackingState::Tracking, &Ok(vec![ME]));
        assert_eq!(p.lifecycle().node_count(), 2);

        p.set_recognizing(false);
        assert_eq!(p.lifecycle().node_count(), 0);

        let outcome = p.process_frame(&1, TrackingState::Stopped, &Ok(vec![ME]));
        assert_eq!(outcome.transition, Transition::Unchanged);
        assert_eq!(p.lifecycle().renderer().detaches, 2);
    }

    #[test]
    fn test_custom_threshold_via_matcher() {
        let mut p = pipeline().with_matcher(SimilarityMatcher::new(Euclidean, 100.0));
        p.set_training(true);
        p.process_frame(&1, TrackingState::Tracking, &Ok(vec![ME]));
        p.set_training(false);
        p.set_recognizing(true);

        // 80 units away: rejected at 1.0, accepted at 100.0.
        let outcome = p.process_frame(&1, TrackingState::Tracking, &Ok(vec![STRANGER]));
        assert!(outcome.recognized);
    }

    #[test]
    fn test_teardown_removes_all_nodes() {
        let mut p = pipeline();
        p.set_training(true);
        p.set_recognizing(true);
        p.process_frame(&1, TrackingState::Tracking, &Ok(vec![ME]));
        p.process_frame(&1, TrackingState::Tracking, &Ok(vec![ME]));
        assert_eq!(p.teardown(), 1);
        assert!(p.lifecycle().renderer().live.is_empty());
    }
}
