//! Frame-to-frame landmark motion.
//!
//! A photograph held in front of the camera produces near-identical landmark
//! positions across consecutive frames. A live face shows small involuntary
//! movement. Displacement far above that band usually means the detector
//! jumped between faces or misfired, so it does not count as natural motion
//! either.

use crate::geometry::mean_abs_displacement;
use crate::types::Point;

/// Result of motion analysis over one burst.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MotionResult {
    /// At least one consecutive pair moved inside the natural band.
    pub passed: bool,
    /// Displacement of every analysed pair, in capture order.
    pub displacements: Vec<f32>,
}

impl MotionResult {
    pub fn pairs_analysed(&self) -> usize {
        self.displacements.len()
    }

    pub fn max_displacement(&self) -> Option<f32> {
        self.displacements.iter().copied().reduce(f32::max)
    }
}

/// Open band `(min, max)` of natural per-pair displacement in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionBand {
    pub min: f32,
    pub max: f32,
}

impl MotionBand {
    pub fn contains(&self, displacement: f32) -> bool {
        displacement > self.min && displacement < self.max
    }
}

/// Analyse consecutive landmark sets.
///
/// `None` entries (frames without landmarks) and pairs with differing point
/// counts are skipped. A burst with no analysable pair does not pass.
pub fn analyze_motion(sequence: &[Option<&[Point]>], band: MotionBand) -> MotionResult {
    let mut result = MotionResult::default();

    for pair in sequence.windows(2) {
        let (Some(prev), Some(curr)) = (pair[0], pair[1]) else {
            continue;
        };
        let Some(displacement) = mean_abs_displacement(prev, curr) else {
            tracing::debug!(
                prev = prev.len(),
                curr = curr.len(),
                "skipping landmark pair with mismatched point counts"
            );
            continue;
        };
        if band.contains(displacement) {
            result.passed = true;
        }
        result.displacements.push(displacement);
    }

    result
}
