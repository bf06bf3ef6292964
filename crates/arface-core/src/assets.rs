//! Overlay resources (render model + face texture) and their publish-once slots.
//!
//! Loading happens off the frame context; frames poll the slots and skip
//! silently until both resources are ready.

use image::RgbaImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Magic bytes at the start of a binary glTF (`.glb`) file.
const GLB_MAGIC: &[u8; 4] = b"glTF";
/// GLB header: magic, version, total length (all u32 LE).
const GLB_HEADER_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("failed to read asset {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid render model {0}: not a binary glTF file")]
    InvalidModel(String),
    #[error("failed to decode texture {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("asset loading cancelled")]
    Cancelled,
}

/// Binary glTF render model used for the face-region overlay.
#[derive(Debug, Clone)]
pub struct RenderModel {
    pub source: PathBuf,
    pub bytes: Vec<u8>,
}

impl RenderModel {
    /// Validate GLB bytes and wrap them.
    pub fn from_bytes(source: &Path, bytes: Vec<u8>) -> Result<Self, AssetError> {
        if bytes.len() < GLB_HEADER_LEN || &bytes[..4] != GLB_MAGIC {
            return Err(AssetError::InvalidModel(source.display().to_string()));
        }
        Ok(Self {
            source: source.to_path_buf(),
            bytes,
        })
    }

    /// GLB container version from the header.
    pub fn version(&self) -> Option<u32> {
        let raw: [u8; 4] = self.bytes.get(4..8)?.try_into().ok()?;
        Some(u32::from_le_bytes(raw))
    }
}

/// Face mesh texture, decoded to RGBA.
#[derive(Debug, Clone)]
pub struct FaceTexture {
    pub source: PathBuf,
    pub image: RgbaImage,
}

impl FaceTexture {
    pub fn from_bytes(source: &Path, bytes: &[u8]) -> Result<Self, AssetError> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| AssetError::Decode {
                path: source.display().to_string(),
                source: e,
            })?
            .to_rgba8();
        Ok(Self {
            source: source.to_path_buf(),
            image,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Load state observed by the frame context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetState {
    Pending,
    Ready,
    Failed,
}

/// Single-writer, publish-once slot.
///
/// The loader publishes exactly one outcome; later publishes are ignored.
#[derive(Debug)]
pub struct AssetSlot<T> {
    cell: OnceLock<Result<Arc<T>, String>>,
}

impl<T> Default for AssetSlot<T> {
    fn default() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }
}

impl<T> AssetSlot<T> {
    /// Publish the load outcome. Returns false if the slot was already filled.
    pub fn publish(&self, outcome: Result<T, AssetError>) -> bool {
        self.cell
            .set(outcome.map(Arc::new).map_err(|e| e.to_string()))
            .is_ok()
    }

    pub fn get(&self) -> Option<Arc<T>> {
        match self.cell.get() {
            Some(Ok(value)) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    pub fn state(&self) -> AssetState {
        match self.cell.get() {
            None => AssetState::Pending,
            Some(Ok(_)) => AssetState::Ready,
            Some(Err(_)) => AssetState::Failed,
        }
    }

    /// Failure message, if the load failed.
    pub fn error(&self) -> Option<&str> {
        match self.cell.get() {
            Some(Err(msg)) => Some(msg),
            _ => None,
        }
    }
}

/// Process-wide overlay resource slots, shared between loader and frame context.
#[derive(Debug, Default)]
pub struct AssetSlots {
    pub model: AssetSlot<RenderModel>,
    pub texture: AssetSlot<FaceTexture>,
}

impl AssetSlots {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Both resources, or `None` while either is pending or failed.
    pub fn overlay(&self) -> Option<OverlayAssets> {
        Some(OverlayAssets {
            model: self.model.get()?,
            texture: self.texture.get()?,
        })
    }
}

/// Resources bound to an overlay node when it is created.
#[derive(Debug, Clone)]
pub struct OverlayAssets {
    pub model: Arc<RenderModel>,
    pub texture: Arc<FaceTexture>,
}
