//! Background loading of overlay assets.
//!
//! Each asset loads in its own task inside a tracked set sharing one
//! cancellation token. Outcomes are published into [`AssetSlots`]; a failed
//! load sends exactly one notice for the user.

use arface_core::assets::{AssetError, AssetSlot, AssetSlots, FaceTexture, RenderModel};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// User-facing message about an asset that could not be loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetNotice {
    pub asset: &'static str,
    pub message: String,
}

pub struct AssetLoader {
    slots: Arc<AssetSlots>,
    notices: mpsc::UnboundedSender<AssetNotice>,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl AssetLoader {
    pub fn new(slots: Arc<AssetSlots>, notices: mpsc::UnboundedSender<AssetNotice>) -> Self {
        Self {
            slots,
            notices,
            cancel: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Start loading the binary glTF render model from disk.
    pub fn load_model(&mut self, path: PathBuf) {
        let bytes = read_asset(path.clone());
        self.load_model_from(path, bytes);
    }

    /// Start loading the render model from an arbitrary byte source.
    pub fn load_model_from<F>(&mut self, source: PathBuf, bytes: F)
    where
        F: Future<Output = Result<Vec<u8>, AssetError>> + Send + 'static,
    {
        self.spawn_load("render model", source, bytes, |slots| &slots.model, decode_model);
    }

    /// Start loading and decoding the face texture from disk.
    pub fn load_texture(&mut self, path: PathBuf) {
        let bytes = read_asset(path.clone());
        self.load_texture_from(path, bytes);
    }

    /// Start loading the face texture from an arbitrary byte source.
    pub fn load_texture_from<F>(&mut self, source: PathBuf, bytes: F)
    where
        F: Future<Output = Result<Vec<u8>, AssetError>> + Send + 'static,
    {
        self.spawn_load("texture", source, bytes, |slots| &slots.texture, decode_texture);
    }

    fn spawn_load<T, F>(
        &mut self,
        asset: &'static str,
        source: PathBuf,
        bytes: F,
        slot: fn(&AssetSlots) -> &AssetSlot<T>,
        decode: fn(&Path, Vec<u8>) -> Result<T, AssetError>,
    ) where
        T: Send + Sync + 'static,
        F: Future<Output = Result<Vec<u8>, AssetError>> + Send + 'static,
    {
        let slots = Arc::clone(&self.slots);
        let notices = self.notices.clone();
        let cancel = self.cancel.clone();

        self.tasks.spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(AssetError::Cancelled),
                bytes = bytes => bytes.and_then(|b| decode(&source, b)),
            };
            publish(slot(&slots), asset, &source, outcome, &notices);
        });
    }

    /// Number of load tasks not yet joined.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every outstanding load to finish.
    pub async fn wait(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "asset task failed");
            }
        }
    }

    /// Cancel every outstanding load and wait for the tasks to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        let outstanding = self.tasks.len();
        self.wait().await;
        tracing::debug!(outstanding, "asset loader shut down");
    }
}

async fn read_asset(path: PathBuf) -> Result<Vec<u8>, AssetError> {
    tokio::fs::read(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AssetError::NotFound(path.display().to_string())
        } else {
            AssetError::Io {
                path: path.display().to_string(),
                source: e,
            }
        }
    })
}

fn decode_model(path: &Path, bytes: Vec<u8>) -> Result<RenderModel, AssetError> {
    let model = RenderModel::from_bytes(path, bytes)?;
    tracing::debug!(version = ?model.version(), size = model.bytes.len(), "glTF header ok");
    Ok(model)
}

fn decode_texture(path: &Path, bytes: Vec<u8>) -> Result<FaceTexture, AssetError> {
    let texture = FaceTexture::from_bytes(path, &bytes)?;
    let (width, height) = texture.dimensions();
    tracing::debug!(width, height, "texture decoded");
    Ok(texture)
}

fn publish<T>(
    slot: &AssetSlot<T>,
    asset: &'static str,
    path: &Path,
    outcome: Result<T, AssetError>,
    notices: &mpsc::UnboundedSender<AssetNotice>,
) {
    match outcome {
        Ok(value) => {
            slot.publish(Ok(value));
            tracing::info!(asset, path = %path.display(), "asset loaded");
        }
        Err(AssetError::Cancelled) => {
            tracing::debug!(asset, path = %path.display(), "asset load cancelled");
        }
        Err(e) => {
            tracing::error!(asset, path = %path.display(), error = %e, "asset load failed");
            let message = format!("Unable to load {asset}: {e}");
            if slot.publish(Err(e)) {
                let _ = notices.send(AssetNotice { asset, message });
            }
        }
    }
}
