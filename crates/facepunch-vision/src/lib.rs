//! facepunch-vision: ONNX Runtime implementation of [`FeatureExtractor`].
//!
//! SCRFD finds faces and their five keypoints; ArcFace embeds the aligned
//! face. The keypoints double as the landmark set for motion liveness. Eye
//! contours for blink detection come from the optional 106-point model
//! ([`landmarks::LANDMARK_MODEL_NAME`]); without it landmarks carry no eyes.

pub mod alignment;
pub mod detector;
pub mod landmarks;
pub mod recognizer;

use std::path::Path;

use facepunch_core::extractor::{ExtractionError, FeatureExtractor};
use facepunch_core::types::{Embedding, FaceRegion, Landmarks, Point};
use facepunch_models::{model_for, ModelRole};
use image::RgbImage;
use thiserror::Error;

pub use detector::{Detection, DetectorError, ScrfdDetector, DEFAULT_SCORE_THRESHOLD};
pub use landmarks::{DenseLandmarker, LandmarkError, LANDMARK_MODEL_NAME};
pub use recognizer::{ArcFaceRecognizer, RecognizerError, EMBEDDING_DIM};

#[derive(Error, Debug)]
pub enum VisionError {
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Recognizer(#[from] RecognizerError),
    #[error(transparent)]
    Landmarks(#[from] LandmarkError),
}

impl From<VisionError> for ExtractionError {
    fn from(e: VisionError) -> Self {
        ExtractionError::Backend(e.to_string())
    }
}

/// Minimum IoU for a caller-supplied region to be matched to a detection.
const REGION_MATCH_IOU: f32 = 0.5;

/// SCRFD + ArcFace feature extractor.
///
/// Detections of the most recent image are kept so that embedding and
/// landmark requests for a region returned by `detect_faces` reuse its
/// keypoints instead of running the detector again.
pub struct OnnxExtractor {
    detector: ScrfdDetector,
    recognizer: ArcFaceRecognizer,
    landmarker: Option<DenseLandmarker>,
    last: Vec<Detection>,
}

impl OnnxExtractor {
    pub fn load(model_dir: &Path, embedding_dim: usize) -> Result<Self, VisionError> {
        let detector = ScrfdDetector::load(
            &model_for(ModelRole::Detector).path_in(model_dir),
            DEFAULT_SCORE_THRESHOLD,
        )?;
        let recognizer =
            ArcFaceRecognizer::load(&model_for(ModelRole::Recognizer).path_in(model_dir), embedding_dim)?;
        let landmarker = DenseLandmarker::load_optional(model_dir)?;
        Ok(Self {
            detector,
            recognizer,
            landmarker,
            last: Vec::new(),
        })
    }

    /// Whether eye contours (and so blink samples) are produced.
    pub fn has_eye_landmarks(&self) -> bool {
        self.landmarker.is_some()
    }

    fn keypoints_for(
        &mut self,
        image: &RgbImage,
        face: &FaceRegion,
    ) -> Result<Option<[Point; 5]>, VisionError> {
        if let Some(kps) = best_overlap(&self.last, face).and_then(|d| d.keypoints) {
            return Ok(Some(kps));
        }
        self.last = self.detector.detect(image)?;
        Ok(best_overlap(&self.last, face).and_then(|d| d.keypoints))
    }
}

/// Detection overlapping `face` the most, if the overlap is substantial.
fn best_overlap<'a>(detections: &'a [Detection], face: &FaceRegion) -> Option<&'a Detection> {
    detections
        .iter()
        .map(|d| (detector::iou(&d.region, face), d))
        .filter(|(overlap, _)| *overlap >= REGION_MATCH_IOU)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, d)| d)
}

impl FeatureExtractor for OnnxExtractor {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, ExtractionError> {
        self.last = self.detector.detect(image).map_err(VisionError::from)?;
        Ok(self.last.iter().map(|d| d.region).collect())
    }

    fn extract_embedding(
        &mut self,
        image: &RgbImage,
        face: &FaceRegion,
    ) -> Result<Option<Embedding>, ExtractionError> {
        let Some(kps) = self.keypoints_for(image, face)? else {
            return Ok(None);
        };
        Ok(self
            .recognizer
            .embed(image, &kps)
            .map_err(VisionError::from)?)
    }

    fn extract_landmarks(
        &mut self,
        image: &RgbImage,
        face: &FaceRegion,
    ) -> Result<Option<Landmarks>, ExtractionError> {
        let Some(kps) = self.keypoints_for(image, face)? else {
            return Ok(None);
        };
        let landmarks = Landmarks::from_points(kps.to_vec());
        let Some(landmarker) = self.landmarker.as_mut() else {
            return Ok(Some(landmarks));
        };
        match landmarker.eyes(image, face).map_err(VisionError::from)? {
            Some((left, right)) => Ok(Some(landmarks.with_eyes(left, right))),
            None => Ok(Some(landmarks)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(x: f32, kps: bool) -> Detection {
        Detection {
            region: FaceRegion::new(x, 0.0, 100.0, 100.0),
            keypoints: kps.then_some([(x + 30.0, 40.0); 5]),
        }
    }

    #[test]
    fn test_best_overlap_picks_matching_detection() {
        let dets = [detection(0.0, true), detection(300.0, true)];
        let probe = FaceRegion::new(305.0, 2.0, 100.0, 100.0);
        let hit = best_overlap(&dets, &probe).unwrap();
        assert_eq!(hit.region.x, 300.0);
    }

    #[test]
    fn test_best_overlap_rejects_distant_region() {
        let dets = [detection(0.0, true)];
        let probe = FaceRegion::new(80.0, 0.0, 100.0, 100.0);
        assert!(best_overlap(&dets, &probe).is_none());
    }

    #[test]
    fn test_load_reports_missing_models() {
        let err = OnnxExtractor::load(Path::new("/nonexistent/facepunch-models"), EMBEDDING_DIM);
        assert!(matches!(
            err,
            Err(VisionError::Detector(DetectorError::ModelNotFound(_)))
        ));
    }
}
