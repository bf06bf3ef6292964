//! MobileFaceNet face embedder via ONNX Runtime.
//!
//! Extracts 192-dimensional embeddings from RGB face crops. Embeddings are
//! left un-normalized: the matcher's 1.0 threshold is defined on raw L2
//! distances between MobileFaceNet outputs.

use crate::types::Embedding;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_INPUT_SIZE: u32 = 112;
const MOBILEFACENET_MEAN: f32 = 128.0;
const MOBILEFACENET_STD: f32 = 128.0;
const MOBILEFACENET_MODEL_VERSION: &str = "mobile_face_net";

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face crop is empty")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// External embedding model: one fixed-length vector per face crop.
pub trait FaceEmbedder {
    fn embed(&mut self, crop: &RgbImage) -> Result<Embedding, EmbedderError>;
}

/// MobileFaceNet recognizer (NHWC float input, 112×112 by default).
pub struct MobileFaceNet {
    session: Session,
    input_size: u32,
    embedding_dim: usize,
}

impl MobileFaceNet {
    /// Load the MobileFaceNet ONNX model from the given path.
    pub fn load(
        model_path: &str,
        input_size: u32,
        embedding_dim: usize,
    ) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            input_size,
            embedding_dim,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded MobileFaceNet model"
        );

        Ok(Self {
            session,
            input_size,
            embedding_dim,
        })
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    /// Resize the crop to `size`×`size` and normalize into a `[1, S, S, 3]` tensor.
    fn preprocess(crop: &RgbImage, size: u32) -> Array4<f32> {
        let resized = image::imageops::resize(crop, size, size, FilterType::Triangle);
        let s = size as usize;
        let mut tensor = Array4::<f32>::zeros((1, s, s, 3));

        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, y as usize, x as usize, c]] =
                    (pixel[c] as f32 - MOBILEFACENET_MEAN) / MOBILEFACENET_STD;
            }
        }

        tensor
    }
}

impl FaceEmbedder for MobileFaceNet {
    fn embed(&mut self, crop: &RgbImage) -> Result<Embedding, EmbedderError> {
        if crop.width() == 0 || crop.height() == 0 {
            return Err(EmbedderError::EmptyCrop);
        }

        let input = Self::preprocess(crop, self.input_size);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let values: Vec<f32> = raw_data.to_vec();

        if values.len() != self.embedding_dim {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {}-dim embedding, got {}",
                self.embedding_dim,
                values.len()
            )));
        }

        Ok(Embedding {
            values,
            model_version: Some(MOBILEFACENET_MODEL_VERSION.to_string()),
        })
    }
}
