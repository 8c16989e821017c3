use serde::Serialize;
use thiserror::Error;

use crate::attendance::TooSoon;
use crate::extractor::ExtractionError;
use crate::liveness::LivenessVerdict;
use crate::matcher::NoMatchReason;

/// User-facing outcomes that end a punch attempt without creating an event.
///
/// None of these are infrastructure failures; they are reported to the
/// person in front of the camera.
#[derive(Debug, Error)]
pub enum PunchError {
    #[error("{0}")]
    ExtractionFailure(#[from] ExtractionError),

    #[error("{}", no_match_message(.0))]
    NoMatch(NoMatchReason),

    #[error("Liveness check failed: {}", .0.message)]
    LivenessFailure(Box<LivenessVerdict>),

    #[error("{0}")]
    TooSoonForPunchOut(TooSoon),
}

fn no_match_message(reason: &NoMatchReason) -> &'static str {
    match reason {
        NoMatchReason::EmptyGallery => "No registered users in the system",
        NoMatchReason::OutsideTolerance { .. } | NoMatchReason::NoComparableEmbeddings => {
            "Face not recognized - not a registered user"
        }
    }
}

impl PunchError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            PunchError::ExtractionFailure(ExtractionError::NoFace) => "no_face",
            PunchError::ExtractionFailure(ExtractionError::EmbeddingUnavailable) => {
                "embedding_unavailable"
            }
            PunchError::ExtractionFailure(ExtractionError::Decode(_)) => "decode_failed",
            PunchError::ExtractionFailure(_) => "extraction_failed",
            PunchError::NoMatch(NoMatchReason::EmptyGallery) => "empty_gallery",
            PunchError::NoMatch(_) => "not_recognized",
            PunchError::LivenessFailure(_) => "liveness_failed",
            PunchError::TooSoonForPunchOut(_) => "too_soon",
        }
    }

    /// Detail payload for replies: the signal breakdown or the wait time.
    pub fn detail(&self) -> Option<serde_json::Value> {
        match self {
            PunchError::LivenessFailure(verdict) => serde_json::to_value(verdict.as_ref()).ok(),
            PunchError::TooSoonForPunchOut(t) => serde_json::to_value(TooSoonDetail::from(t)).ok(),
            PunchError::NoMatch(reason) => serde_json::to_value(reason).ok(),
            PunchError::ExtractionFailure(_) => None,
        }
    }
}

#[derive(Serialize)]
struct TooSoonDetail {
    last_punch_in: chrono::DateTime<chrono::Utc>,
    remaining_hours: i64,
    remaining_minutes: i64,
}

impl From<&TooSoon> for TooSoonDetail {
    fn from(t: &TooSoon) -> Self {
        Self {
            last_punch_in: t.last_punch_in,
            remaining_hours: t.hours(),
            remaining_minutes: t.minutes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_match_messages() {
        assert_eq!(
            PunchError::NoMatch(NoMatchReason::EmptyGallery).to_string(),
            "No registered users in the system"
        );
        let far = NoMatchReason::OutsideTolerance {
            best_distance: 0.7,
            best_identity: "E1".into(),
        };
        assert_eq!(
            PunchError::NoMatch(far).to_string(),
            "Face not recognized - not a registered user"
        );
    }

    #[test]
    fn test_extraction_messages() {
        let err = PunchError::from(ExtractionError::NoFace);
        assert_eq!(err.to_string(), "No face detected in the image");
        assert_eq!(err.code(), "no_face");
    }

    #[test]
    fn test_decode_failure_code() {
        let decode = image::load_from_memory(b"not an image").unwrap_err();
        let err = PunchError::from(ExtractionError::from(decode));
        assert_eq!(err.code(), "decode_failed");
        assert!(err.detail().is_none());
    }

    #[test]
    fn test_too_soon_detail() {
        let t = TooSoon {
            last_punch_in: chrono::Utc::now(),
            remaining_secs: 3 * 3600 + 125,
        };
        let detail = PunchError::TooSoonForPunchOut(t).detail().unwrap();
        assert_eq!(detail["remaining_hours"], 3);
        assert_eq!(detail["remaining_minutes"], 2);
    }
}
