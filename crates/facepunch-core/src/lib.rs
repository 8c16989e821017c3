//! facepunch-core: face matching, liveness and attendance decisions.
//!
//! Everything here is synchronous and free of I/O. Images, embeddings and
//! landmarks come in through [`extractor::FeatureExtractor`]; galleries and
//! event logs come in through the [`repository`] traits.

pub mod attendance;
pub mod config;
pub mod error;
pub mod extractor;
pub mod geometry;
pub mod liveness;
pub mod matcher;
pub mod quality;
pub mod repository;
pub mod ring;
pub mod types;

pub use attendance::{decide, AttendanceEvent, AttendancePolicy, DayState, DayStats, PunchKind, TooSoon};
pub use config::EngineConfig;
pub use error::PunchError;
pub use extractor::{ExtractionError, FeatureExtractor};
pub use liveness::{DetectorState, FrameBurst, LivenessEngine, LivenessVerdict};
pub use matcher::{EuclideanMatcher, MatchEngine, MatchResult, Matcher};
pub use types::{Embedding, FaceRegion, Gallery, Identity, Landmarks};

#[cfg(test)]
pub(crate) mod test_support {
    use image::{GrayImage, Luma, RgbImage};

    use crate::extractor::{ExtractionError, FeatureExtractor};
    use crate::types::{Embedding, EyeContour, FaceRegion, Landmarks};

    /// Eye 10 px wide with the given lid opening (EAR = opening / 10).
    pub fn eye(opening: f32) -> EyeContour {
        let half = opening / 2.0;
        [
            (0.0, 0.0),
            (3.0, -half),
            (7.0, -half),
            (10.0, 0.0),
            (7.0, half),
            (3.0, half),
        ]
    }

    /// Deterministic pseudo-random grayscale noise.
    pub fn noise_image(width: u32, height: u32, seed: u64) -> GrayImage {
        let mut x = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
        GrayImage::from_fn(width, height, |_, _| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            Luma([(x >> 24) as u8])
        })
    }

    /// Extractor that reports at most one fixed face.
    #[derive(Default)]
    pub struct ScriptedExtractor {
        face: Option<FaceRegion>,
        embedding: Option<Embedding>,
        landmarks: Option<Landmarks>,
    }

    impl ScriptedExtractor {
        pub fn with_face(embedding: Option<Embedding>) -> Self {
            Self {
                face: Some(FaceRegion::new(0.0, 0.0, 8.0, 8.0)),
                embedding,
                landmarks: None,
            }
        }
    }

    impl FeatureExtractor for ScriptedExtractor {
        fn detect_faces(&mut self, _image: &RgbImage) -> Result<Vec<FaceRegion>, ExtractionError> {
            Ok(self.face.into_iter().collect())
        }

        fn extract_embedding(
            &mut self,
            _image: &RgbImage,
            _face: &FaceRegion,
        ) -> Result<Option<Embedding>, ExtractionError> {
            Ok(self.embedding.clone())
        }

        fn extract_landmarks(
            &mut self,
            _image: &RgbImage,
            _face: &FaceRegion,
        ) -> Result<Option<Landmarks>, ExtractionError> {
            Ok(self.landmarks.clone())
        }
    }
}
