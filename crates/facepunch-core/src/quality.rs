//! Enrollment image quality gate.

use image::GrayImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::FaceRegion;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Minimum face width and height in pixels.
    pub min_face_px: f32,
    /// Allowed offset of the face centre from the image centre, as a
    /// fraction of the image width/height.
    pub center_tolerance: f32,
    pub min_brightness: f32,
    pub max_brightness: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_face_px: 100.0,
            center_tolerance: 0.3,
            min_brightness: 60.0,
            max_brightness: 240.0,
        }
    }
}

/// Reason an enrollment image was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssue {
    #[error("Face is too small. Please move closer to the camera.")]
    TooSmall,
    #[error("Please center your face horizontally.")]
    OffCenterHorizontal,
    #[error("Please center your face vertically.")]
    OffCenterVertical,
    #[error("Image is too dark. Please improve lighting.")]
    TooDark,
    #[error("Image is too bright. Please reduce lighting.")]
    TooBright,
}

/// Mean pixel value of a grayscale image (0 for an empty image).
pub fn mean_brightness(image: &GrayImage) -> f32 {
    let (w, h) = image.dimensions();
    let count = w as u64 * h as u64;
    if count == 0 {
        return 0.0;
    }
    let sum: u64 = image.pixels().map(|p| u64::from(p[0])).sum();
    (sum as f64 / count as f64) as f32
}

/// Check size, centring and lighting of one detected face, in that order.
pub fn validate_face_quality(
    image: &GrayImage,
    face: &FaceRegion,
    config: &QualityConfig,
) -> Result<(), QualityIssue> {
    if face.width < config.min_face_px || face.height < config.min_face_px {
        return Err(QualityIssue::TooSmall);
    }

    let (w, h) = image.dimensions();
    let (cx, cy) = face.center();
    if (cx - w as f32 / 2.0).abs() > w as f32 * config.center_tolerance {
        return Err(QualityIssue::OffCenterHorizontal);
    }
    if (cy - h as f32 / 2.0).abs() > h as f32 * config.center_tolerance {
        return Err(QualityIssue::OffCenterVertical);
    }

    let brightness = mean_brightness(image);
    if brightness < config.min_brightness {
        return Err(QualityIssue::TooDark);
    }
    if brightness > config.max_brightness {
        return Err(QualityIssue::TooBright);
    }
    Ok(())
}
