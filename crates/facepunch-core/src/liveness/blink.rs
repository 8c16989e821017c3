//! Blink detection from eye aspect ratio history.

use serde::{Deserialize, Serialize};

use crate::geometry::average_ear;
use crate::ring::RingBuffer;
use crate::types::Landmarks;

/// Thresholds for the EAR blink pattern.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkConfig {
    /// A single frame with average EAR below this counts as "blinking".
    pub threshold: f32,
    /// A window sample above this counts as an open eye.
    pub open_bound: f32,
    /// A window sample below this counts as a closed eye.
    pub closed_bound: f32,
    /// Consecutive samples examined per window.
    pub window: usize,
    /// Samples required in the history before a pattern is searched for.
    pub min_samples: usize,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            threshold: 0.25,
            open_bound: 0.25,
            closed_bound: 0.2,
            window: 6,
            min_samples: 10,
        }
    }
}

/// Average EAR of both eyes, if the landmarks carry usable eye contours.
pub fn frame_ear(landmarks: &Landmarks) -> Option<f32> {
    let (left, right) = landmarks.eyes()?;
    average_ear(left, right)
}

/// Whether a single EAR sample indicates closed eyes.
pub fn is_blinking(ear: f32, config: &BlinkConfig) -> bool {
    ear < config.threshold
}

/// Search the history for an open/closed excursion inside one window.
pub fn blink_pattern(history: &RingBuffer<f32>, config: &BlinkConfig) -> bool {
    if history.len() < config.min_samples || config.window == 0 {
        return false;
    }
    let samples = history.to_vec();
    samples.windows(config.window).any(|window| {
        let max = window.iter().copied().fold(f32::MIN, f32::max);
        let min = window.iter().copied().fold(f32::MAX, f32::min);
        max > config.open_bound && min < config.closed_bound
    })
}
