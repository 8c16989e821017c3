//! Five-point face alignment to the ArcFace 112×112 template.

use facepunch_core::types::Point;
use image::{Rgb, RgbImage};

/// ArcFace template keypoints for a 112×112 crop: eyes, nose, mouth corners.
pub const TEMPLATE_112: [Point; 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

pub const ALIGNED_SIZE: u32 = 112;

/// Similarity transform `dst = [a -b; b a] * src + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    pub fn apply(&self, (x, y): Point) -> Point {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Inverse mapping, `None` for a degenerate (zero-scale) transform.
    pub fn invert(&self) -> Option<Similarity> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let a = self.a / det;
        let b = -self.b / det;
        Some(Similarity {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

fn centroid(points: &[Point]) -> Point {
    let n = points.len().max(1) as f32;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
    (sx / n, sy / n)
}

/// Closed-form least-squares similarity mapping `src` onto `dst`.
pub fn estimate_similarity(src: &[Point; 5], dst: &[Point; 5]) -> Option<Similarity> {
    let (msx, msy) = centroid(src);
    let (mdx, mdy) = centroid(dst);

    let mut var = 0.0f32;
    let mut dot = 0.0f32;
    let mut cross = 0.0f32;
    for ((sx, sy), (dx, dy)) in src.iter().zip(dst.iter()) {
        let (sx, sy) = (sx - msx, sy - msy);
        let (dx, dy) = (dx - mdx, dy - mdy);
        var += sx * sx + sy * sy;
        dot += sx * dx + sy * dy;
        cross += sx * dy - sy * dx;
    }
    if var < 1e-12 {
        return None;
    }

    let a = dot / var;
    let b = cross / var;
    Some(Similarity {
        a,
        b,
        tx: mdx - (a * msx - b * msy),
        ty: mdy - (b * msx + a * msy),
    })
}

fn sample_bilinear(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = img.dimensions();
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let texel = |cx: f32, cy: f32| -> [f32; 3] {
        if cx < 0.0 || cy < 0.0 || cx >= w as f32 || cy >= h as f32 {
            return [0.0; 3];
        }
        let p = img.get_pixel(cx as u32, cy as u32);
        [p[0] as f32, p[1] as f32, p[2] as f32]
    };

    let tl = texel(x0, y0);
    let tr = texel(x0 + 1.0, y0);
    let bl = texel(x0, y0 + 1.0);
    let br = texel(x0 + 1.0, y0 + 1.0);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = tl[c] * (1.0 - fx) + tr[c] * fx;
        let bottom = bl[c] * (1.0 - fx) + br[c] * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Warp the face described by `keypoints` into a 112×112 aligned crop.
///
/// Pixels that map outside the source image are black.
pub fn align_face(image: &RgbImage, keypoints: &[Point; 5]) -> Option<RgbImage> {
    let forward = estimate_similarity(keypoints, &TEMPLATE_112)?;
    let inverse = forward.invert()?;
    Some(RgbImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |ox, oy| {
        let (sx, sy) = inverse.apply((ox as f32, oy as f32));
        sample_bilinear(image, sx, sy)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_onto_itself_is_identity() {
        let m = estimate_similarity(&TEMPLATE_112, &TEMPLATE_112).unwrap();
        assert!((m.a - 1.0).abs() < 1e-4, "a = {}", m.a);
        assert!(m.b.abs() < 1e-4);
        assert!(m.tx.abs() < 1e-3);
        assert!(m.ty.abs() < 1e-3);
    }

    #[test]
    fn test_double_scale_halves() {
        let src = TEMPLATE_112.map(|(x, y)| (x * 2.0 + 10.0, y * 2.0 - 4.0));
        let m = estimate_similarity(&src, &TEMPLATE_112).unwrap();
        assert!((m.a - 0.5).abs() < 1e-3, "a = {}", m.a);
        let (x, y) = m.apply(src[2]);
        assert!((x - TEMPLATE_112[2].0).abs() < 1e-2);
        assert!((y - TEMPLATE_112[2].1).abs() < 1e-2);
    }

    #[test]
    fn test_invert_round_trips() {
        let m = Similarity {
            a: 0.8,
            b: 0.3,
            tx: 12.0,
            ty: -5.0,
        };
        let inv = m.invert().unwrap();
        let (x, y) = inv.apply(m.apply((33.0, 71.0)));
        assert!((x - 33.0).abs() < 1e-3 && (y - 71.0).abs() < 1e-3);
    }

    #[test]
    fn test_collapsed_keypoints_rejected() {
        assert!(estimate_similarity(&[(5.0, 5.0); 5], &TEMPLATE_112).is_none());
    }

    #[test]
    fn test_bright_eye_lands_on_template_eye() {
        let mut img = RgbImage::new(200, 200);
        let keypoints: [Point; 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        for dy in 0..5 {
            for dx in 0..5 {
                img.put_pixel(78 + dx, 58 + dy, Rgb([255, 255, 255]));
            }
        }
        let aligned = align_face(&img, &keypoints).unwrap();
        assert_eq!(aligned.dimensions(), (112, 112));

        let (ex, ey) = (TEMPLATE_112[0].0.round() as u32, TEMPLATE_112[0].1.round() as u32);
        let brightest = (ey - 1..=ey + 1)
            .flat_map(|y| (ex - 1..=ex + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned.get_pixel(x, y)[0])
            .max()
            .unwrap();
        assert!(brightest > 100, "brightest = {brightest}");
    }
}
