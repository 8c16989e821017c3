//! Contract with the vision backend that turns images into faces,
//! embeddings and landmarks.

use image::{DynamicImage, RgbImage};
use thiserror::Error;

use crate::liveness::BurstFrame;
use crate::types::{Embedding, FaceRegion, Landmarks};

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("No face detected in the image")]
    NoFace,
    #[error("Could not extract face features")]
    EmbeddingUnavailable,
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("extractor backend failed: {0}")]
    Backend(String),
}

/// Face detection, embedding and landmark extraction.
///
/// Implementations usually hold inference sessions that need exclusive
/// access, hence `&mut self`.
pub trait FeatureExtractor {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, ExtractionError>;

    /// `Ok(None)` when the face could not be encoded.
    fn extract_embedding(
        &mut self,
        image: &RgbImage,
        face: &FaceRegion,
    ) -> Result<Option<Embedding>, ExtractionError>;

    /// `Ok(None)` when no landmark set could be produced for the face.
    fn extract_landmarks(
        &mut self,
        image: &RgbImage,
        face: &FaceRegion,
    ) -> Result<Option<Landmarks>, ExtractionError>;
}

/// The face chosen out of a detection result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceSelection {
    pub face: FaceRegion,
    /// Number of faces detected; more than one means the largest was picked.
    pub candidates: usize,
}

impl FaceSelection {
    pub fn is_ambiguous(&self) -> bool {
        self.candidates > 1
    }
}

/// Pick the largest face by bounding-box area.
///
/// Equal areas keep the detector's first face.
pub fn select_face(faces: &[FaceRegion]) -> Result<FaceSelection, ExtractionError> {
    let face = faces
        .iter()
        .copied()
        .reduce(|best, f| if f.area() > best.area() { f } else { best })
        .ok_or(ExtractionError::NoFace)?;
    if faces.len() > 1 {
        tracing::debug!(candidates = faces.len(), "multiple faces, using the largest");
    }
    Ok(FaceSelection {
        face,
        candidates: faces.len(),
    })
}

/// A probe face with its embedding.
#[derive(Debug, Clone)]
pub struct ProbeFace {
    pub selection: FaceSelection,
    pub embedding: Embedding,
}

/// Detect, select and embed the face in `image`.
pub fn extract_probe<E: FeatureExtractor + ?Sized>(
    extractor: &mut E,
    image: &RgbImage,
) -> Result<ProbeFace, ExtractionError> {
    let faces = extractor.detect_faces(image)?;
    let selection = select_face(&faces)?;
    let embedding = extractor
        .extract_embedding(image, &selection.face)?
        .ok_or(ExtractionError::EmbeddingUnavailable)?;
    Ok(ProbeFace {
        selection,
        embedding,
    })
}

/// Turn one captured frame into a liveness burst frame.
///
/// A frame without a face is returned with `face: None` so the liveness
/// check can discard it; only backend failures are errors.
pub fn analyze_frame<E: FeatureExtractor + ?Sized>(
    extractor: &mut E,
    image: &DynamicImage,
) -> Result<BurstFrame, ExtractionError> {
    let rgb = image.to_rgb8();
    let gray = image.to_luma8();
    let faces = extractor.detect_faces(&rgb)?;
    let Ok(selection) = select_face(&faces) else {
        return Ok(BurstFrame::new(gray, None, None));
    };
    let landmarks = extractor.extract_landmarks(&rgb, &selection.face)?;
    Ok(BurstFrame::new(gray, Some(selection.face), landmarks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedExtractor;

    #[test]
    fn test_select_largest() {
        let faces = [
            FaceRegion::new(0.0, 0.0, 50.0, 50.0),
            FaceRegion::new(100.0, 0.0, 120.0, 120.0),
            FaceRegion::new(300.0, 0.0, 80.0, 80.0),
        ];
        let sel = select_face(&faces).unwrap();
        assert_eq!(sel.face.x, 100.0);
        assert_eq!(sel.candidates, 3);
        assert!(sel.is_ambiguous());
    }

    #[test]
    fn test_select_equal_area_keeps_first() {
        let faces = [
            FaceRegion::new(0.0, 0.0, 50.0, 50.0),
            FaceRegion::new(90.0, 0.0, 50.0, 50.0),
        ];
        assert_eq!(select_face(&faces).unwrap().face.x, 0.0);
    }

    #[test]
    fn test_select_none() {
        assert!(matches!(select_face(&[]), Err(ExtractionError::NoFace)));
    }

    #[test]
    fn test_extract_probe_distinguishes_failures() {
        let img = RgbImage::new(8, 8);

        let mut none = ScriptedExtractor::default();
        assert!(matches!(
            extract_probe(&mut none, &img),
            Err(ExtractionError::NoFace)
        ));

        let mut no_embedding = ScriptedExtractor::with_face(None);
        assert!(matches!(
            extract_probe(&mut no_embedding, &img),
            Err(ExtractionError::EmbeddingUnavailable)
        ));

        let mut ok = ScriptedExtractor::with_face(Some(Embedding::new(vec![1.0, 0.0])));
        let probe = extract_probe(&mut ok, &img).unwrap();
        assert_eq!(probe.embedding.values, vec![1.0, 0.0]);
        assert_eq!(probe.selection.candidates, 1);
    }

    #[test]
    fn test_analyze_faceless_frame() {
        let mut extractor = ScriptedExtractor::default();
        let frame = analyze_frame(&mut extractor, &DynamicImage::new_rgb8(8, 8)).unwrap();
        assert!(frame.face.is_none());
        assert!(frame.landmarks.is_none());
        assert_eq!(frame.image.dimensions(), (8, 8));
    }
}
