//! Face detector boundary and crop extraction.

use crate::types::BoundingBox;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("camera frame unavailable: {0}")]
    FrameUnavailable(String),
    #[error("detection failed: {0}")]
    DetectorFailed(String),
}

/// A face found in one frame, with its crop ready for embedding.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bounding_box: BoundingBox,
    pub crop: RgbImage,
}

/// External face detector, called once per processed frame.
pub trait FaceDetector {
    type Frame;

    /// Detected faces in detector order. An empty list is a valid result.
    fn detect(&mut self, frame: &Self::Frame) -> Result<Vec<DetectedFace>, DetectionError>;
}

/// Crop `bbox` out of `frame`, clamped to the frame bounds.
///
/// Returns `None` when nothing of the box lies inside the frame.
pub fn crop_face(frame: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let (width, height) = frame.dimensions();

    let x0 = bbox.x.max(0.0).floor().min(width as f32) as u32;
    let y0 = bbox.y.max(0.0).floor().min(height as f32) as u32;
    let x1 = (bbox.x + bbox.width).max(0.0).ceil().min(width as f32) as u32;
    let y1 = (bbox.y + bbox.height).max(0.0).ceil().min(height as f32) as u32;

    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    Some(image::imageops::crop_imm(frame, x0, y0, x1 - x0, y1 - y0).to_image())
}
