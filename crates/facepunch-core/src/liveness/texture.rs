//! Micro-texture analysis with local binary patterns.
//!
//! Printed photographs and screen replays lose high-frequency surface detail.
//! The LBP code histogram of such a reproduction is concentrated in a few
//! bins, so its Shannon entropy is lower than that of a live face.

use image::imageops::{self, FilterType};
use image::GrayImage;

use crate::types::FaceRegion;

/// Side length the face crop is normalised to before analysis.
pub const NORMALISED_SIZE: u32 = 128;

/// Entropy (bits) mapped to a score of 1.0.
pub const ENTROPY_CEILING: f64 = 8.0;

const HIST_EPSILON: f64 = 1e-7;

/// Neighbour offsets `(row, col)` on the unit ring, bit `p` at angle `2πp/8`
/// rounded to the pixel grid.
const RING_OFFSETS: [(i32, i32); 8] = [
    (0, 1),
    (1, 1),
    (1, 0),
    (1, -1),
    (0, -1),
    (-1, -1),
    (-1, 0),
    (-1, 1),
];

/// Crop `region` out of `frame`, clamped to the image bounds.
///
/// Without a region the whole frame is used. Returns `None` when the clamped
/// crop is empty.
pub fn crop_face(frame: &GrayImage, region: Option<&FaceRegion>) -> Option<GrayImage> {
    let (w, h) = frame.dimensions();
    let Some(region) = region else {
        return (w > 0 && h > 0).then(|| frame.clone());
    };
    if !(region.x.is_finite()
        && region.y.is_finite()
        && region.width.is_finite()
        && region.height.is_finite())
    {
        return None;
    }

    let x0 = region.x.floor().clamp(0.0, w as f32) as u32;
    let y0 = region.y.floor().clamp(0.0, h as f32) as u32;
    let x1 = (region.x + region.width).ceil().clamp(0.0, w as f32) as u32;
    let y1 = (region.y + region.height).ceil().clamp(0.0, h as f32) as u32;

    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(imageops::crop_imm(frame, x0, y0, x1 - x0, y1 - y0).to_image())
}

/// Normalised 256-bin histogram of LBP codes over the interior pixels.
///
/// Returns `None` for images smaller than 3×3 (no interior).
pub fn lbp_histogram(img: &GrayImage) -> Option<[f64; 256]> {
    let (w, h) = img.dimensions();
    if w < 3 || h < 3 {
        return None;
    }

    let mut counts = [0u64; 256];
    for row in 1..h - 1 {
        for col in 1..w - 1 {
            let centre = img.get_pixel(col, row)[0];
            let mut code = 0u8;
            for (bit, (dr, dc)) in RING_OFFSETS.iter().enumerate() {
                let r = (row as i32 + dr) as u32;
                let c = (col as i32 + dc) as u32;
                if img.get_pixel(c, r)[0] >= centre {
                    code |= 1 << bit;
                }
            }
            counts[code as usize] += 1;
        }
    }

    let total: u64 = counts.iter().sum();
    let norm = total as f64 + HIST_EPSILON;
    let mut hist = [0.0f64; 256];
    for (bin, count) in hist.iter_mut().zip(counts.iter()) {
        *bin = *count as f64 / norm;
    }
    Some(hist)
}

/// Shannon entropy in bits of a normalised histogram.
pub fn entropy(hist: &[f64]) -> f64 {
    -hist
        .iter()
        .map(|h| h * (h + HIST_EPSILON).log2())
        .sum::<f64>()
}

/// Texture score in [0, 1] for the face in `frame`.
///
/// `None` when the crop is degenerate; the caller treats that as "not passed".
pub fn texture_score(frame: &GrayImage, region: Option<&FaceRegion>) -> Option<f32> {
    let face = crop_face(frame, region)?;
    let normalised = imageops::resize(
        &face,
        NORMALISED_SIZE,
        NORMALISED_SIZE,
        FilterType::Triangle,
    );
    let hist = lbp_histogram(&normalised)?;
    let score = (entropy(&hist) / ENTROPY_CEILING).min(1.0);
    Some(score.max(0.0) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::noise_image;
    use image::Luma;

    #[test]
    fn test_flat_image_has_zero_entropy() {
        let img = GrayImage::from_pixel(16, 16, Luma([128]));
        let hist = lbp_histogram(&img).unwrap();
        // every neighbour equals the centre, so every code is 0xFF
        assert!((hist[255] - 1.0).abs() < 1e-6);
        assert!(entropy(&hist).abs() < 1e-4);
    }

    #[test]
    fn test_lbp_bit_order() {
        // 3x3 with only the right-hand neighbour (bit 0) brighter than centre
        let mut img = GrayImage::from_pixel(3, 3, Luma([10]));
        img.put_pixel(1, 1, Luma([50]));
        img.put_pixel(2, 1, Luma([90]));
        let hist = lbp_histogram(&img).unwrap();
        assert!((hist[0b0000_0001] - 1.0).abs() < 1e-6);

        // bottom neighbour (row + 1) is bit 2
        let mut img = GrayImage::from_pixel(3, 3, Luma([10]));
        img.put_pixel(1, 1, Luma([50]));
        img.put_pixel(1, 2, Luma([90]));
        let hist = lbp_histogram(&img).unwrap();
        assert!((hist[0b0000_0100] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_too_small_for_lbp() {
        assert!(lbp_histogram(&GrayImage::new(2, 5)).is_none());
    }

    #[test]
    fn test_uniform_histogram_entropy_is_eight_bits() {
        let hist = [1.0 / 256.0; 256];
        assert!((entropy(&hist) - 8.0).abs() < 1e-3);
    }

    #[test]
    fn test_noise_scores_higher_than_flat() {
        let noisy = texture_score(&noise_image(160, 160, 7), None).unwrap();
        let flat = texture_score(&GrayImage::from_pixel(160, 160, Luma([90])), None).unwrap();
        assert!(noisy > 0.6, "noisy = {noisy}");
        assert!(flat < 0.1, "flat = {flat}");
    }

    #[test]
    fn test_crop_clamped_to_bounds() {
        let img = GrayImage::new(100, 80);
        let region = FaceRegion::new(60.0, 50.0, 100.0, 100.0);
        let crop = crop_face(&img, Some(&region)).unwrap();
        assert_eq!(crop.dimensions(), (40, 30));
    }

    #[test]
    fn test_crop_outside_image_is_degenerate() {
        let img = GrayImage::new(100, 80);
        let region = FaceRegion::new(200.0, 10.0, 50.0, 50.0);
        assert!(crop_face(&img, Some(&region)).is_none());
        assert!(texture_score(&img, Some(&region)).is_none());
    }
}
