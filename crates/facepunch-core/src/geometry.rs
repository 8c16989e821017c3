//! Small numeric helpers shared by the engines.

use crate::types::{EyeContour, Point};

/// Euclidean distance between two points.
pub fn distance(a: Point, b: Point) -> f32 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

/// Mean absolute per-coordinate displacement between two landmark sets.
///
/// Every x and y coordinate contributes one sample. Returns `None` when the
/// sets are empty or have different lengths.
pub fn mean_abs_displacement(prev: &[Point], curr: &[Point]) -> Option<f32> {
    if prev.is_empty() || prev.len() != curr.len() {
        return None;
    }
    let total: f32 = prev
        .iter()
        .zip(curr.iter())
        .map(|(p, c)| (c.0 - p.0).abs() + (c.1 - p.1).abs())
        .sum();
    Some(total / (prev.len() * 2) as f32)
}

/// Eye aspect ratio: `(|p2-p6| + |p3-p5|) / (2 * |p1-p4|)`.
///
/// Returns `None` for a degenerate contour (zero horizontal distance).
pub fn eye_aspect_ratio(eye: &EyeContour) -> Option<f32> {
    let vertical1 = distance(eye[1], eye[5]);
    let vertical2 = distance(eye[2], eye[4]);
    let horizontal = distance(eye[0], eye[3]);

    if horizontal <= f32::EPSILON {
        return None;
    }
    Some((vertical1 + vertical2) / (2.0 * horizontal))
}

/// Average EAR over both eyes.
pub fn average_ear(left: &EyeContour, right: &EyeContour) -> Option<f32> {
    let l = eye_aspect_ratio(left)?;
    let r = eye_aspect_ratio(right)?;
    Some((l + r) / 2.0)
}

/// Clamp a score to the unit interval, mapping NaN to 0.
pub fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::eye;

    #[test]
    fn test_distance() {
        assert!((distance((0.0, 0.0), (3.0, 4.0)) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_mean_abs_displacement() {
        let a = [(0.0, 0.0), (10.0, 10.0)];
        let b = [(1.0, 0.0), (10.0, 13.0)];
        // |1| + |0| + |0| + |3| over 4 coordinates
        assert_eq!(mean_abs_displacement(&a, &b), Some(1.0));
    }

    #[test]
    fn test_mean_abs_displacement_mismatch() {
        let a = [(0.0, 0.0)];
        let b = [(0.0, 0.0), (1.0, 1.0)];
        assert_eq!(mean_abs_displacement(&a, &b), None);
        assert_eq!(mean_abs_displacement(&[], &[]), None);
    }

    #[test]
    fn test_ear_open_eye() {
        // vertical = 3 on both pairs, horizontal = 10 -> 6 / 20
        let ear = eye_aspect_ratio(&eye(3.0)).unwrap();
        assert!((ear - 0.3).abs() < 1e-6, "ear = {ear}");
    }

    #[test]
    fn test_ear_degenerate() {
        let flat = [(5.0, 5.0); 6];
        assert_eq!(eye_aspect_ratio(&flat), None);
    }

    #[test]
    fn test_average_ear() {
        let avg = average_ear(&eye(2.0), &eye(4.0)).unwrap();
        assert!((avg - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_unit(1.7), 1.0);
        assert_eq!(clamp_unit(f32::NAN), 0.0);
    }
}
