//! Model manifest for the bundled face models and SHA-256 integrity checks.

use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// What a model file is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    /// SCRFD face detector with five-point keypoints.
    Detector,
    /// ArcFace embedding network.
    Recognizer,
}

/// One downloadable model file.
#[derive(Debug)]
pub struct ModelFile {
    pub role: ModelRole,
    pub name: &'static str,
    pub url: &'static str,
    pub sha256: &'static str,
    pub size_display: &'static str,
}

impl ModelFile {
    pub fn path_in(&self, model_dir: &Path) -> PathBuf {
        model_dir.join(self.name)
    }
}

// Checksums are the `oid sha256:` values of the Git LFS pointers in
// huggingface.co/public-data/insightface, models/buffalo_l/.
pub const MODELS: &[ModelFile] = &[
    ModelFile {
        role: ModelRole::Detector,
        name: "det_10g.onnx",
        url: "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l/det_10g.onnx",
        sha256: "5838f7fe053675b1c7a08b633df49e7af5495cee0493c7dcf6697200b85b5b91",
        size_display: "16 MB",
    },
    ModelFile {
        role: ModelRole::Recognizer,
        name: "w600k_r50.onnx",
        url: "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l/w600k_r50.onnx",
        sha256: "4c06341c33c2ca1f86781dab0e829f88ad5b64be9fba56e56bc9ebdefc619e43",
        size_display: "166 MB",
    },
];

/// Manifest entry for a role.
pub fn model_for(role: ModelRole) -> &'static ModelFile {
    MODELS
        .iter()
        .find(|m| m.role == role)
        .unwrap_or(&MODELS[0])
}

#[derive(Error, Debug)]
pub enum ModelIntegrityError {
    #[error("model file not found: {name} ({path})")]
    Missing { name: &'static str, path: PathBuf },

    #[error("cannot read model file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("checksum mismatch for {name} ({path})\n  expected: {expected}\n  actual:   {actual}")]
    ChecksumMismatch {
        name: &'static str,
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

/// Hex SHA-256 of a file, streamed.
pub fn file_sha256(path: &Path) -> Result<String, ModelIntegrityError> {
    let io_err = |source| ModelIntegrityError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = fs::File::open(path).map_err(io_err)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(io_err)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Check one manifest entry inside `model_dir`.
pub fn verify_model(model_dir: &Path, model: &ModelFile) -> Result<(), ModelIntegrityError> {
    let path = model.path_in(model_dir);
    if !path.is_file() {
        return Err(ModelIntegrityError::Missing {
            name: model.name,
            path,
        });
    }
    let actual = file_sha256(&path)?;
    if !actual.eq_ignore_ascii_case(model.sha256) {
        return Err(ModelIntegrityError::ChecksumMismatch {
            name: model.name,
            path,
            expected: model.sha256.to_string(),
            actual,
        });
    }
    tracing::debug!(model = model.name, "model checksum verified");
    Ok(())
}

/// Check every model in the manifest, stopping at the first failure.
pub fn verify_models_dir(model_dir: &Path) -> Result<(), ModelIntegrityError> {
    MODELS.iter().try_for_each(|m| verify_model(model_dir, m))
}

/// Manifest entries with no file in `model_dir`.
pub fn missing_models(model_dir: &Path) -> Vec<&'static ModelFile> {
    MODELS
        .iter()
        .filter(|m| !m.path_in(model_dir).is_file())
        .collect()
}
