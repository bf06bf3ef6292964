use crate::scene::{FaceId, SceneEvent, SceneGraph};
use crate::session::{RecordedDetector, RecordedFrame};
use arface_core::assets::{AssetSlots, AssetState};
use arface_core::{
    BoundingBox, EmbeddingRegistry, Euclidean, FaceEmbedder, FrameOutcome, Labels, Mode,
    RecognitionPipeline, SimilarityMatcher, TrackingState,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no label at index {index} (labels resource has {count})")]
    UnknownLabelIndex { index: usize, count: usize },
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Pipeline parameters fixed at startup.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub distance_threshold: f32,
    pub embedding_dim: usize,
    pub label: String,
}

/// Label selection by name or by index into the labels resource.
#[derive(Debug, Clone, PartialEq)]
pub enum LabelRef {
    Name(String),
    Index(usize),
}

/// Result of processing one tracker callback.
#[derive(Debug, Serialize)]
pub struct FrameReport {
    #[serde(flatten)]
    pub outcome: FrameOutcome,
    /// Scene changes caused by this frame.
    pub overlay: Vec<SceneEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub version: &'static str,
    pub mode: Mode,
    pub label: String,
    /// Position of the current label in the labels resource, if listed there.
    pub label_index: Option<usize>,
    pub registered: usize,
    pub overlay_nodes: usize,
    pub threshold: f32,
    pub model: AssetState,
    pub texture: AssetState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub texture_error: Option<String>,
}

/// Reply to a mode or label change.
#[derive(Debug, Serialize)]
pub struct ControlReply {
    #[serde(flatten)]
    pub status: StatusReport,
    /// Nodes removed as a consequence of the change.
    pub overlay: Vec<SceneEvent>,
}

/// Messages sent from the session loop to the engine thread.
enum EngineRequest {
    Frame {
        face: FaceId,
        state: TrackingState,
        image: PathBuf,
        faces: Vec<BoundingBox>,
        reply: oneshot::Sender<FrameReport>,
    },
    SetTraining {
        enabled: bool,
        reply: oneshot::Sender<ControlReply>,
    },
    SetRecognizing {
        enabled: bool,
        reply: oneshot::Sender<ControlReply>,
    },
    SetLabel {
        label: LabelRef,
        reply: oneshot::Sender<Result<ControlReply, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<StatusReport>,
    },
    Shutdown {
        reply: oneshot::Sender<Vec<SceneEvent>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Process one tracker callback: acquire the frame, detect, match, reconcile the overlay.
    pub async fn process_frame(
        &self,
        face: FaceId,
        state: TrackingState,
        image: PathBuf,
        faces: Vec<BoundingBox>,
    ) -> Result<FrameReport, EngineError> {
        self.request(|reply| EngineRequest::Frame {
            face,
            state,
            image,
            faces,
            reply,
        })
        .await
    }

    pub async fn set_training(&self, enabled: bool) -> Result<ControlReply, EngineError> {
        self.request(|reply| EngineRequest::SetTraining { enabled, reply })
            .await
    }

    pub async fn set_recognizing(&self, enabled: bool) -> Result<ControlReply, EngineError> {
        self.request(|reply| EngineRequest::SetRecognizing { enabled, reply })
            .await
    }

    pub async fn set_label(&self, label: LabelRef) -> Result<ControlReply, EngineError> {
        self.request(|reply| EngineRequest::SetLabel { label, reply })
            .await?
    }

    pub async fn status(&self) -> Result<StatusReport, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }

    /// Stop the engine thread, removing every overlay node.
    pub async fn shutdown(&self) -> Result<Vec<SceneEvent>, EngineError> {
        self.request(|reply| EngineRequest::Shutdown { reply }).await
    }
}

type FacePipeline<E> = RecognitionPipeline<FaceId, SceneGraph, RecordedDetector, E, Euclidean>;

/// Engine state owned by the dedicated thread.
struct Engine<E: FaceEmbedder> {
    pipeline: FacePipeline<E>,
    labels: Labels,
    assets: Arc<AssetSlots>,
}

impl<E: FaceEmbedder> Engine<E> {
    fn status(&self) -> StatusReport {
        StatusReport {
            version: env!("CARGO_PKG_VERSION"),
            mode: self.pipeline.mode(),
            label: self.pipeline.label().to_string(),
            label_index: self.labels.position(self.pipeline.label()),
            registered: self.pipeline.registry().len(),
            overlay_nodes: self.pipeline.lifecycle().node_count(),
            threshold: self.pipeline.matcher().threshold(),
            model: self.assets.model.state(),
            texture: self.assets.texture.state(),
            model_error: self.assets.model.error().map(str::to_string),
            texture_error: self.assets.texture.error().map(str::to_string),
        }
    }

    fn control_reply(&mut self) -> ControlReply {
        ControlReply {
            status: self.status(),
            overlay: self.pipeline.renderer_mut().drain_events(),
        }
    }

    fn frame(
        &mut self,
        face: FaceId,
        state: TrackingState,
        image: PathBuf,
        faces: Vec<BoundingBox>,
    ) -> FrameReport {
        let frame = RecordedFrame::open(image, faces);
        let outcome = self.pipeline.process_frame(&face, state, &frame);
        FrameReport {
            outcome,
            overlay: self.pipeline.renderer_mut().drain_events(),
        }
    }

    fn set_label(&mut self, label: LabelRef) -> Result<ControlReply, EngineError> {
        let name = match label {
            LabelRef::Name(name) => name,
            LabelRef::Index(index) => self
                .labels
                .get(index)
                .map(str::to_string)
                .ok_or(EngineError::UnknownLabelIndex {
                    index,
                    count: self.labels.len(),
                })?,
        };
        self.pipeline.set_label(name);
        Ok(self.control_reply())
    }

    fn teardown(&mut self) -> Vec<SceneEvent> {
        let released = self.pipeline.teardown();
        tracing::info!(released, "engine teardown");
        self.pipeline.renderer_mut().drain_events()
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// All recognition state (registry, overlay mapping, mode flags) lives on that
/// thread, so frames are processed strictly one at a time.
pub fn spawn_engine<E>(
    embedder: E,
    labels: Labels,
    assets: Arc<AssetSlots>,
    settings: EngineSettings,
) -> Result<EngineHandle, EngineError>
where
    E: FaceEmbedder + Send + 'static,
{
    let pipeline = RecognitionPipeline::new(
        RecordedDetector,
        embedder,
        SceneGraph::new(),
        Arc::clone(&assets),
    )
    .with_registry(EmbeddingRegistry::new(settings.embedding_dim))
    .with_matcher(SimilarityMatcher::new(Euclidean, settings.distance_threshold))
    .with_label(settings.label);

    let mut engine = Engine {
        pipeline,
        labels,
        assets,
    };

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("arface-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Frame {
                        face,
                        state,
                        image,
                        faces,
                        reply,
                    } => {
                        let _ = reply.send(engine.frame(face, state, image, faces));
                    }
                    EngineRequest::SetTraining { enabled, reply } => {
                        engine.pipeline.set_training(enabled);
                        let _ = reply.send(engine.control_reply());
                    }
                    EngineRequest::SetRecognizing { enabled, reply } => {
                        engine.pipeline.set_recognizing(enabled);
                        let _ = reply.send(engine.control_reply());
                    }
                    EngineRequest::SetLabel { label, reply } => {
                        let _ = reply.send(engine.set_label(label));
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(engine.status());
                    }
                    EngineRequest::Shutdown { reply } => {
                        let _ = reply.send(engine.teardown());
                        tracing::info!("engine thread exiting");
                        return;
                    }
                }
            }
            // Every handle dropped without an explicit shutdown.
            engine.teardown();
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use arface_core::assets::{FaceTexture, RenderModel};
    use arface_core::{Embedding, EmbedderError, MatchColor, Transition};
    use image::{Rgb, RgbImage};
    use std::path::Path;

    /// Embeds a crop as its mean color.
    struct MeanColorEmbedder;

    impl FaceEmbedder for MeanColorEmbedder {
        fn embed(&mut self, crop: &RgbImage) -> Result<Embedding, EmbedderError> {
            let n = (crop.width() * crop.height()) as f32;
            let mut sum = [0.0f32; 3];
            for p in crop.pixels() {
                for c in 0..3 {
                    sum[c] += p[c] as f32;
                }
            }
            Ok(Embedding::new(sum.iter().map(|s| s / n).collect()))
        }
    }

    fn loaded_assets() -> Arc<AssetSlots> {
        let slots = AssetSlots::new();
        slots.model.publish(Ok(RenderModel {
            source: PathBuf::from("fox.glb"),
            bytes: Vec::new(),
        }));
        slots.texture.publish(Ok(FaceTexture {
            source: PathBuf::from("freckles.png"),
            image: image::RgbaImage::new(1, 1),
        }));
        slots
    }

    fn write_frame(name: &str, color: [u8; 3]) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "arfaced-engine-{name}-{}.png",
            std::process::id()
        ));
        RgbImage::from_pixel(32, 32, Rgb(color)).save(&path).unwrap();
        path
    }

    pub(crate) fn spawn(assets: Arc<AssetSlots>) -> EngineHandle {
        spawn_engine(
            MeanColorEmbedder,
            Labels::parse("???\nMr.Quy\nguest"),
            assets,
            EngineSettings {
                distance_threshold: 1.0,
                embedding_dim: 3,
                label: "Mr.Quy".into(),
            },
        )
        .unwrap()
    }

    fn whole(path: &Path) -> (PathBuf, Vec<BoundingBox>) {
        (path.to_path_buf(), vec![BoundingBox::new(0.0, 0.0, 32.0, 32.0)])
    }

    #[tokio::test]
    async fn test_train_recognize_and_stop() {
        let me = write_frame("me", [40, 80, 120]);
        let engine = spawn(loaded_assets());

        engine.set_training(true).await.unwrap();
        let (image, faces) = whole(&me);
        let report = engine
            .process_frame(1, TrackingState::Tracking, image.clone(), faces.clone())
            .await
            .unwrap();
        assert_eq!(report.outcome.recognitions.len(), 1);
        assert_eq!(report.outcome.recognitions[0].color, MatchColor::Unmatched);

        engine.set_training(false).await.unwrap();
        engine.set_recognizing(true).await.unwrap();

        let report = engine
            .process_frame(1, TrackingState::Tracking, image.clone(), faces.clone())
            .await
            .unwrap();
        assert!(report.outcome.recognized);
        assert_eq!(report.outcome.transition, Transition::Created);
        assert!(matches!(report.overlay[0], SceneEvent::Attached { face: 1, .. }));

        let report = engine
            .process_frame(1, TrackingState::Stopped, image, faces)
            .await
            .unwrap();
        assert_eq!(report.outcome.transition, Transition::Destroyed);
        assert!(matches!(report.overlay[0], SceneEvent::Detached { face: 1, .. }));

        let status = engine.status().await.unwrap();
        assert_eq!(status.registered, 1);
        assert_eq!(status.overlay_nodes, 0);

        engine.shutdown().await.unwrap();
        std::fs::remove_file(me).ok();
    }

    #[tokio::test]
    async fn test_recognition_off_reports_detach() {
        let me = write_frame("off", [10, 10, 10]);
        let engine = spawn(loaded_assets());
        engine.set_training(true).await.unwrap();
        engine.set_recognizing(true).await.unwrap();

        let (image, faces) = whole(&me);
        engine
            .process_frame(5, TrackingState::Tracking, image, faces)
            .await
            .unwrap();

        let reply = engine.set_recognizing(false).await.unwrap();
        assert_eq!(reply.status.overlay_nodes, 0);
        assert_eq!(reply.overlay.len(), 1);
        assert!(matches!(reply.overlay[0], SceneEvent::Detached { face: 5, .. }));

        engine.shutdown().await.unwrap();
        std::fs::remove_file(me).ok();
    }

    #[tokio::test]
    async fn test_frames_skipped_without_assets() {
        let me = write_frame("noassets", [1, 2, 3]);
        let engine = spawn(AssetSlots::new());
        engine.set_training(true).await.unwrap();

        let (image, faces) = whole(&me);
        let report = engine
            .process_frame(1, TrackingState::Tracking, image, faces)
            .await
            .unwrap();
        assert!(report.outcome.skipped);
        assert_eq!(engine.status().await.unwrap().model, AssetState::Pending);

        engine.shutdown().await.unwrap();
        std::fs::remove_file(me).ok();
    }

    #[tokio::test]
    async fn test_status_reports_asset_failure() {
        let assets = AssetSlots::new();
        assets
            .model
            .publish(Err(arface_core::assets::AssetError::NotFound("fox.glb".into())));
        let engine = spawn(assets);

        let status = engine.status().await.unwrap();
        assert_eq!(status.model, AssetState::Failed);
        assert!(status.model_error.unwrap().contains("fox.glb"));
        assert_eq!(status.texture_error, None);

        let json = serde_json::to_value(engine.status().await.unwrap()).unwrap();
        assert!(json.get("texture_error").is_none());
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_frame_treated_as_empty() {
        let engine = spawn(loaded_assets());
        engine.set_training(true).await.unwrap();
        let report = engine
            .process_frame(
                1,
                TrackingState::Tracking,
                PathBuf::from("/nonexistent/frame.png"),
                vec![BoundingBox::new(0.0, 0.0, 10.0, 10.0)],
            )
            .await
            .unwrap();
        assert!(!report.outcome.skipped);
        assert_eq!(report.outcome.faces, 0);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_label_selection() {
        let engine = spawn(loaded_assets());
        assert_eq!(engine.status().await.unwrap().label_index, Some(1));

        let reply = engine.set_label(LabelRef::Index(2)).await.unwrap();
        assert_eq!(reply.status.label, "guest");
        assert_eq!(reply.status.label_index, Some(2));

        let reply = engine.set_label(LabelRef::Name("visitor".into())).await.unwrap();
        assert_eq!(reply.status.label, "visitor");
        assert_eq!(reply.status.label_index, None);

        let err = engine.set_label(LabelRef::Index(9)).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownLabelIndex { index: 9, count: 3 }));
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_requests_after_shutdown_fail() {
        let engine = spawn(loaded_assets());
        engine.shutdown().await.unwrap();
        let err = engine.status().await.unwrap_err();
        assert!(matches!(err, EngineError::ChannelClosed));
    }
}
