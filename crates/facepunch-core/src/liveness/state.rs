use crate::ring::RingBuffer;
use crate::types::Point;

use super::LivenessConfig;

/// Rolling histories for one liveness session.
///
/// Owned exclusively by the session that created it. Bursts evaluated
/// against the same state accumulate EAR samples, which is what lets the
/// blink pattern span more than one five-frame burst.
#[derive(Debug, Clone)]
pub struct DetectorState {
    ear_history: RingBuffer<f32>,
    landmark_history: RingBuffer<Vec<Point>>,
}

impl DetectorState {
    pub fn new(ear_capacity: usize, landmark_capacity: usize) -> Self {
        Self {
            ear_history: RingBuffer::with_capacity(ear_capacity),
            landmark_history: RingBuffer::with_capacity(landmark_capacity),
        }
    }

    pub fn from_config(config: &LivenessConfig) -> Self {
        Self::new(config.ear_history_capacity, config.landmark_history_capacity)
    }

    pub fn record_ear(&mut self, ear: f32) {
        self.ear_history.push(ear);
    }

    pub fn record_landmarks(&mut self, points: Vec<Point>) {
        self.landmark_history.push(points);
    }

    pub fn ear_history(&self) -> &RingBuffer<f32> {
        &self.ear_history
    }

    pub fn landmark_history(&self) -> &RingBuffer<Vec<Point>> {
        &self.landmark_history
    }

    /// Forget everything seen so far.
    pub fn reset(&mut self) {
        self.ear_history.clear();
        self.landmark_history.clear();
    }
}

impl Default for DetectorState {
    fn default() -> Self {
        Self::from_config(&LivenessConfig::default())
    }
}
