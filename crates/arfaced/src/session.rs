//! JSON-lines session protocol between the external AR runtime and the service.
//!
//! The runtime writes one event per line (tracker callbacks, mode toggles,
//! label selection); the service answers each line with one output object.

use crate::engine::{ControlReply, EngineError, EngineHandle, FrameReport, LabelRef, StatusReport};
use crate::loader::AssetNotice;
use crate::scene::FaceId;
use arface_core::detector::crop_face;
use arface_core::{BoundingBox, DetectedFace, DetectionError, FaceDetector, TrackingState};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// One tracker callback: the tracked face, its state, and the camera frame
    /// with the face boxes the detector reported for it.
    Frame {
        face: FaceId,
        state: TrackingState,
        image: PathBuf,
        #[serde(default)]
        faces: Vec<BoundingBox>,
    },
    Training {
        enabled: bool,
    },
    Recognizing {
        enabled: bool,
    },
    Label {
        name: String,
    },
    LabelIndex {
        index: usize,
    },
    Status,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionOutput {
    Frame {
        face: FaceId,
        #[serde(flatten)]
        report: FrameReport,
    },
    Control(ControlReply),
    Status(StatusReport),
    Notice {
        message: String,
    },
    Error {
        message: String,
    },
}

impl From<AssetNotice> for SessionOutput {
    fn from(notice: AssetNotice) -> Self {
        SessionOutput::Notice {
            message: notice.message,
        }
    }
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<SessionEvent>, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed).map(Some)
}

/// Route one event to the engine and shape the reply for output.
pub async fn dispatch(engine: &EngineHandle, event: SessionEvent) -> SessionOutput {
    let result = match event {
        SessionEvent::Frame {
            face,
            state,
            image,
            faces,
        } => engine
            .process_frame(face, state, image, faces)
            .await
            .map(|report| SessionOutput::Frame { face, report }),
        SessionEvent::Training { enabled } => {
            engine.set_training(enabled).await.map(SessionOutput::Control)
        }
        SessionEvent::Recognizing { enabled } => {
            engine.set_recognizing(enabled).await.map(SessionOutput::Control)
        }
        SessionEvent::Label { name } => engine
            .set_label(LabelRef::Name(name))
            .await
            .map(SessionOutput::Control),
        SessionEvent::LabelIndex { index } => engine
            .set_label(LabelRef::Index(index))
            .await
            .map(SessionOutput::Control),
        SessionEvent::Status => engine.status().await.map(SessionOutput::Status),
    };

    result.unwrap_or_else(|e: EngineError| SessionOutput::Error {
        message: e.to_string(),
    })
}

/// Serve the session until input ends or `stop` resolves.
///
/// Lines that are not UTF-8 or not a known event are answered with an error
/// object and skipped. Only I/O failures end the loop early.
pub async fn run<R, W, S>(
    engine: &EngineHandle,
    mut input: R,
    output: &mut W,
    notices: &mut mpsc::UnboundedReceiver<AssetNotice>,
    stop: S,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    tokio::pin!(stop);
    // Partial reads survive a cancelled read_until; cleared once a line completes.
    let mut buf = Vec::new();

    loop {
        tokio::select! {
            read = input.read_until(b'\n', &mut buf) => {
                if read? == 0 {
                    tracing::info!("session input closed");
                    return Ok(());
                }
                let raw = std::mem::take(&mut buf);
                let reply = match std::str::from_utf8(&raw) {
                    Ok(line) => match parse_line(line) {
                        Ok(Some(event)) => dispatch(engine, event).await,
                        Ok(None) => continue,
                        Err(e) => {
                            tracing::warn!(error = %e, "malformed session line");
                            SessionOutput::Error { message: format!("malformed event: {e}") }
                        }
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "session line is not UTF-8");
                        SessionOutput::Error { message: format!("input line is not valid UTF-8: {e}") }
                    }
                };
                write_output(output, &reply).await?;
            }
            Some(notice) = notices.recv() => {
                write_output(output, &SessionOutput::from(notice)).await?;
            }
            _ = &mut stop => {
                tracing::info!("session stopped");
                return Ok(());
            }
        }
    }
}

/// Write one output object as a JSON line.
pub async fn write_output<W>(output: &mut W, reply: &SessionOutput) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(reply)?;
    line.push('\n');
    output.write_all(line.as_bytes()).await?;
    output.flush().await
}

/// A camera frame as recorded by the AR runtime, with its detector output.
pub struct RecordedFrame {
    source: FrameSource,
    faces: Vec<BoundingBox>,
}

enum FrameSource {
    Path(PathBuf),
    Image(RgbImage),
}

impl RecordedFrame {
    /// Refer to a frame on disk. The image is only decoded when detection runs,
    /// so frames skipped for pending assets are never read.
    pub fn open(path: PathBuf, faces: Vec<BoundingBox>) -> Self {
        Self {
            source: FrameSource::Path(path),
            faces,
        }
    }

    pub fn from_image(image: RgbImage, faces: Vec<BoundingBox>) -> Self {
        Self {
            source: FrameSource::Image(image),
            faces,
        }
    }
}

/// Detector backed by the boxes recorded alongside each frame.
#[derive(Debug, Default)]
pub struct RecordedDetector;

impl FaceDetector for RecordedDetector {
    type Frame = RecordedFrame;

    fn detect(&mut self, frame: &RecordedFrame) -> Result<Vec<DetectedFace>, DetectionError> {
        let decoded;
        let image = match &frame.source {
            FrameSource::Image(image) => image,
            FrameSource::Path(path) => {
                decoded = image::open(path)
                    .map_err(|e| DetectionError::FrameUnavailable(format!("{}: {e}", path.display())))?
                    .to_rgb8();
                &decoded
            }
        };

        Ok(frame
            .faces
            .iter()
            .filter_map(|bbox| match crop_face(image, bbox) {
                Some(crop) => Some(DetectedFace {
                    bounding_box: *bbox,
                    crop,
                }),
                None => {
                    tracing::debug!(?bbox, "face box outside frame; ignored");
                    None
                }
            })
            .collect())
    }
}
