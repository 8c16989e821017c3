//! ArcFace embeddings (w600k_r50, 512 dimensions, L2-normalised).

use facepunch_core::types::{Embedding, Point};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

use crate::alignment::{self, ALIGNED_SIZE};

// ArcFace normalises symmetrically around 127.5, unlike SCRFD.
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5;
pub const EMBEDDING_DIM: usize = 512;
pub const MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("recognizer model not found: {0} (run `facepunch setup`)")]
    ModelNotFound(String),
    #[error("unexpected embedding size: expected {expected}, got {got}")]
    Dimension { expected: usize, got: usize },
    #[error("recognizer output malformed: {0}")]
    BadOutput(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct ArcFaceRecognizer {
    session: Session,
    expected_dim: usize,
}

impl ArcFaceRecognizer {
    pub fn load(model_path: &Path, expected_dim: usize) -> Result<Self, RecognizerError> {
        if !model_path.is_file() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }
        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;
        tracing::info!(path = %model_path.display(), expected_dim, "loaded ArcFace recognizer");
        Ok(Self {
            session,
            expected_dim,
        })
    }

    /// Embed the face located by `keypoints`.
    ///
    /// `Ok(None)` when the keypoints are too degenerate to align.
    pub fn embed(
        &mut self,
        image: &RgbImage,
        keypoints: &[Point; 5],
    ) -> Result<Option<Embedding>, RecognizerError> {
        let Some(aligned) = alignment::align_face(image, keypoints) else {
            tracing::debug!("keypoints degenerate, cannot align face");
            return Ok(None);
        };
        let input = to_tensor(&aligned);
        let results = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = results[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::BadOutput(e.to_string()))?;

        if raw.len() != self.expected_dim {
            return Err(RecognizerError::Dimension {
                expected: self.expected_dim,
                got: raw.len(),
            });
        }

        Ok(Some(Embedding {
            values: l2_normalize(raw),
            model_version: Some(MODEL_VERSION.to_string()),
        }))
    }
}

/// Scale to unit length; a zero vector is returned unchanged.
pub fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|v| v / norm).collect()
    } else {
        raw.to_vec()
    }
}

fn to_tensor(aligned: &RgbImage) -> Array4<f32> {
    let size = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    tensor
}
