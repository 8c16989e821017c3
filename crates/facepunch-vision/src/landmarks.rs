//! Dense 106-point landmarks (insightface `2d106det`) for eye contours.
//!
//! The model is optional. Without it faces carry only the five SCRFD
//! keypoints and blink detection never collects samples.

use facepunch_core::types::{EyeContour, FaceRegion, Point};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

/// File looked up in the model directory.
pub const LANDMARK_MODEL_NAME: &str = "2d106det.onnx";

const INPUT_SIZE: u32 = 192;
const POINT_COUNT: usize = 106;
/// Crop side relative to the larger face box side.
const CROP_MARGIN: f32 = 1.5;

// Eye contour indices in the 106-point markup, ordered p1..p6 for EAR:
// outer corner, two upper lid points, inner corner, two lower lid points.
const LEFT_EYE: [usize; 6] = [35, 36, 37, 39, 42, 41];
const RIGHT_EYE: [usize; 6] = [89, 90, 91, 93, 96, 95];

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("landmark output malformed: {0}")]
    BadOutput(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Similarity transform between the source image and the square model crop.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CropTransform {
    center: Point,
    /// Crop pixels per source pixel.
    scale: f32,
}

impl CropTransform {
    fn around(face: &FaceRegion) -> Option<Self> {
        let side = face.width.max(face.height) * CROP_MARGIN;
        if !side.is_finite() || side <= 0.0 {
            return None;
        }
        Some(Self {
            center: face.center(),
            scale: INPUT_SIZE as f32 / side,
        })
    }

    fn to_source(&self, (u, v): Point) -> Point {
        let half = INPUT_SIZE as f32 / 2.0;
        (
            (u - half) / self.scale + self.center.0,
            (v - half) / self.scale + self.center.1,
        )
    }
}

pub struct DenseLandmarker {
    session: Session,
}

impl DenseLandmarker {
    /// Load the model from `model_dir`, or `Ok(None)` when it is not installed.
    pub fn load_optional(model_dir: &Path) -> Result<Option<Self>, LandmarkError> {
        let path = model_dir.join(LANDMARK_MODEL_NAME);
        if !path.is_file() {
            tracing::info!(
                path = %path.display(),
                "dense landmark model not installed, blink detection disabled"
            );
            return Ok(None);
        }
        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(&path)?;
        tracing::info!(path = %path.display(), "loaded 106-point landmark model");
        Ok(Some(Self { session }))
    }

    /// Left and right eye contours of `face`, `Ok(None)` for an empty box.
    pub fn eyes(
        &mut self,
        image: &RgbImage,
        face: &FaceRegion,
    ) -> Result<Option<(EyeContour, EyeContour)>, LandmarkError> {
        let Some(transform) = CropTransform::around(face) else {
            return Ok(None);
        };
        let input = crop_tensor(image, &transform);
        let results = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = results[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkError::BadOutput(e.to_string()))?;
        let points = decode_points(raw, &transform)?;
        Ok(Some(eye_contours(&points)))
    }
}

/// Sample the face crop into a 1×3×192×192 RGB tensor of raw pixel values.
///
/// The model normalises internally; pixels outside the image stay zero.
fn crop_tensor(image: &RgbImage, transform: &CropTransform) -> Array4<f32> {
    let size = INPUT_SIZE as usize;
    let (width, height) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for v in 0..size {
        for u in 0..size {
            let (x, y) = transform.to_source((u as f32 + 0.5, v as f32 + 0.5));
            if x < 0.0 || y < 0.0 || x >= width as f32 || y >= height as f32 {
                continue;
            }
            let pixel = image.get_pixel(x as u32, y as u32);
            for c in 0..3 {
                tensor[[0, c, v, u]] = pixel[c] as f32;
            }
        }
    }
    tensor
}

/// Map the network output (x, y pairs in [-1, 1]) to source coordinates.
fn decode_points(raw: &[f32], transform: &CropTransform) -> Result<Vec<Point>, LandmarkError> {
    if raw.len() < POINT_COUNT * 2 {
        return Err(LandmarkError::BadOutput(format!(
            "expected {} values, got {}",
            POINT_COUNT * 2,
            raw.len()
        )));
    }
    let half = INPUT_SIZE as f32 / 2.0;
    Ok(raw[..POINT_COUNT * 2]
        .chunks_exact(2)
        .map(|p| transform.to_source(((p[0] + 1.0) * half, (p[1] + 1.0) * half)))
        .collect())
}

fn eye_contours(points: &[Point]) -> (EyeContour, EyeContour) {
    (
        LEFT_EYE.map(|i| points[i]),
        RIGHT_EYE.map(|i| points[i]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use facepunch_core::geometry::eye_aspect_ratio;

    #[test]
    fn test_crop_transform_centres_face() {
        let t = CropTransform::around(&FaceRegion::new(100.0, 50.0, 128.0, 64.0)).unwrap();
        assert!((t.scale - 1.0).abs() < 1e-6);
        assert_eq!(t.to_source((96.0, 96.0)), (164.0, 82.0));
        assert_eq!(t.to_source((0.0, 0.0)), (68.0, -14.0));
        assert!(CropTransform::around(&FaceRegion::new(0.0, 0.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn test_decode_points_maps_unit_square() {
        let t = CropTransform::around(&FaceRegion::new(0.0, 0.0, 128.0, 128.0)).unwrap();
        let mut raw = vec![0.0; POINT_COUNT * 2];
        raw[0] = -1.0;
        raw[1] = -1.0;
        raw[2] = 1.0;
        raw[3] = 1.0;
        let points = decode_points(&raw, &t).unwrap();
        assert_eq!(points.len(), POINT_COUNT);
        assert_eq!(points[0], (-32.0, -32.0));
        assert_eq!(points[1], (160.0, 160.0));
        assert_eq!(points[2], (64.0, 64.0));
    }

    #[test]
    fn test_short_output_rejected() {
        let t = CropTransform::around(&FaceRegion::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        assert!(matches!(
            decode_points(&[0.0; 20], &t),
            Err(LandmarkError::BadOutput(_))
        ));
    }

    #[test]
    fn test_eye_contours_follow_lid_order() {
        // Place an open left eye and a closed right eye at their indices.
        let mut points = vec![(0.0, 0.0); POINT_COUNT];
        let open = [(0.0, 0.0), (3.0, -2.0), (7.0, -2.0), (10.0, 0.0), (7.0, 2.0), (3.0, 2.0)];
        let closed = [(0.0, 0.0), (3.0, -0.2), (7.0, -0.2), (10.0, 0.0), (7.0, 0.2), (3.0, 0.2)];
        for (slot, p) in LEFT_EYE.iter().zip(open) {
            points[*slot] = p;
        }
        for (slot, p) in RIGHT_EYE.iter().zip(closed) {
            points[*slot] = p;
        }
        let (left, right) = eye_contours(&points);
        assert!((eye_aspect_ratio(&left).unwrap() - 0.4).abs() < 1e-6);
        assert!((eye_aspect_ratio(&right).unwrap() - 0.04).abs() < 1e-6);
    }

    #[test]
    fn test_crop_tensor_zero_outside_image() {
        let img = RgbImage::from_pixel(40, 40, image::Rgb([10, 20, 30]));
        let t = CropTransform::around(&FaceRegion::new(0.0, 0.0, 40.0, 40.0)).unwrap();
        let tensor = crop_tensor(&img, &t);
        assert_eq!(tensor.shape(), &[1, 3, 192, 192]);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert_eq!(tensor[[0, 2, 96, 96]], 30.0);
    }

    #[test]
    fn test_missing_model_is_optional() {
        let loaded = DenseLandmarker::load_optional(Path::new("/nonexistent/facepunch-models"));
        assert!(matches!(loaded, Ok(None)));
    }
}
