use arface_core::embedder::DEFAULT_INPUT_SIZE;
use arface_core::matcher::DEFAULT_DISTANCE_THRESHOLD;
use arface_core::pipeline::DEFAULT_LABEL;
use arface_core::registry::DEFAULT_EMBEDDING_DIM;
use std::path::PathBuf;

/// Service configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the embedding model and labels resource.
    pub model_dir: PathBuf,
    /// MobileFaceNet ONNX model.
    pub embedder_model: PathBuf,
    /// Labels resource (one label per line).
    pub labels_path: PathBuf,
    /// Binary glTF model attached to recognized faces.
    pub overlay_model: PathBuf,
    /// Face mesh texture bound to each overlay node.
    pub overlay_texture: PathBuf,
    /// Euclidean distance below which a face is accepted.
    pub distance_threshold: f32,
    pub embedding_dim: usize,
    /// Square input edge of the embedding model.
    pub input_size: u32,
    /// Label registered during training and expected during recognition.
    pub label: String,
}

impl Config {
    /// Load configuration from `ARFACE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let model_dir = lookup("ARFACE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("models"));

        let embedder_model = lookup("ARFACE_EMBEDDER_MODEL")
            .map(PathBuf::from)
            .unwrap_or_else(|| model_dir.join("mobile_face_net.onnx"));

        let labels_path = lookup("ARFACE_LABELS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| model_dir.join("label_map.txt"));

        Self {
            embedder_model,
            labels_path,
            model_dir,
            overlay_model: lookup("ARFACE_OVERLAY_MODEL")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("assets/models/fox.glb")),
            overlay_texture: lookup("ARFACE_OVERLAY_TEXTURE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("assets/textures/freckles.png")),
            distance_threshold: parse_or(
                &lookup,
                "ARFACE_DISTANCE_THRESHOLD",
                DEFAULT_DISTANCE_THRESHOLD,
            ),
            embedding_dim: parse_or(&lookup, "ARFACE_EMBEDDING_DIM", DEFAULT_EMBEDDING_DIM),
            input_size: parse_or(&lookup, "ARFACE_INPUT_SIZE", DEFAULT_INPUT_SIZE),
            label: lookup("ARFACE_LABEL").unwrap_or_else(|| DEFAULT_LABEL.to_string()),
        }
    }

    /// Path to the embedding model as the ONNX loader expects it.
    pub fn embedder_model_path(&self) -> String {
        self.embedder_model.to_string_lossy().into_owned()
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "unparseable config value; using default");
            default
        }),
        None => default,
    }
}
