//! SCRFD face detector (anchor-free, three strides, five keypoints).

use facepunch_core::types::{FaceRegion, Point};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;
const NMS_IOU: f32 = 0.4;

pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0} (run `facepunch setup`)")]
    ModelNotFound(String),
    #[error("detector output malformed: {0}")]
    BadOutput(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// One detected face with its keypoints in source-image coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub region: FaceRegion,
    /// Left eye, right eye, nose tip, left and right mouth corner.
    pub keypoints: Option<[Point; 5]>,
}

/// Mapping between source pixels and the padded network input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
    /// Size of the resized image inside the padding.
    inner_w: u32,
    inner_h: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        Self {
            scale,
            pad_x: (INPUT_SIZE - new_w) / 2,
            pad_y: (INPUT_SIZE - new_h) / 2,
            inner_w: new_w,
            inner_h: new_h,
        }
    }

    fn to_source(&self, (x, y): Point) -> Point {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Score, box and keypoint output positions for one stride.
type StrideOutputs = (usize, usize, usize);

pub struct ScrfdDetector {
    session: Session,
    outputs: [StrideOutputs; 3],
    score_threshold: f32,
}

impl ScrfdDetector {
    pub fn load(model_path: &Path, score_threshold: f32) -> Result<Self, DetectorError> {
        if !model_path.is_file() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if names.len() < 9 {
            return Err(DetectorError::BadOutput(format!(
                "expected 9 outputs (score/bbox/kps per stride), got {}",
                names.len()
            )));
        }
        let outputs = output_layout(&names);
        tracing::info!(path = %model_path.display(), ?outputs, "loaded SCRFD detector");

        Ok(Self {
            session,
            outputs,
            score_threshold,
        })
    }

    /// Faces in `image`, highest confidence first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }
        let (input, letterbox) = preprocess(image);
        let results = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx, kps_idx)) in STRIDES.iter().zip(self.outputs.iter()) {
            let tensor = |idx: usize, what: &str| {
                results[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::BadOutput(format!("{what} stride {stride}: {e}")))
            };
            let scores = tensor(score_idx, "scores")?;
            let boxes = tensor(bbox_idx, "boxes")?;
            let kps = tensor(kps_idx, "keypoints")?;
            decode_stride(
                stride,
                scores,
                boxes,
                kps,
                &letterbox,
                self.score_threshold,
                &mut candidates,
            );
        }

        Ok(non_max_suppression(candidates, NMS_IOU))
    }
}

/// Locate `score_8`, `bbox_8`, `kps_8`, ... by name, or assume the usual
/// positional export (scores 0..3, boxes 3..6, keypoints 6..9).
fn output_layout(names: &[String]) -> [StrideOutputs; 3] {
    let position = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };
    let named: Option<Vec<StrideOutputs>> = STRIDES
        .iter()
        .map(|&s| Some((position("score", s)?, position("bbox", s)?, position("kps", s)?)))
        .collect();

    match named {
        Some(v) => [v[0], v[1], v[2]],
        None => {
            tracing::debug!(?names, "SCRFD outputs unnamed, using positional layout");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Letterbox into a normalised 1×3×640×640 RGB tensor.
fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let (width, height) = image.dimensions();
    let lb = Letterbox::fit(width, height);
    let resized = imageops::resize(image, lb.inner_w, lb.inner_h, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    // Padding holds the mean, which normalises to zero.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = ((x + lb.pad_x) as usize, (y + lb.pad_y) as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    (tensor, lb)
}

fn decode_stride(
    stride: usize,
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    letterbox: &Letterbox,
    threshold: f32,
    out: &mut Vec<Detection>,
) {
    let grid = INPUT_SIZE as usize / stride;
    let anchors = grid * grid * ANCHORS_PER_CELL;
    let step = stride as f32;

    for idx in 0..anchors.min(scores.len()) {
        let score = scores[idx];
        if score <= threshold {
            continue;
        }
        let Some(b) = boxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / ANCHORS_PER_CELL;
        let ax = (cell % grid) as f32 * step;
        let ay = (cell / grid) as f32 * step;

        let (x1, y1) = letterbox.to_source((ax - b[0] * step, ay - b[1] * step));
        let (x2, y2) = letterbox.to_source((ax + b[2] * step, ay + b[3] * step));

        let keypoints = kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| {
                letterbox.to_source((ax + k[i * 2] * step, ay + k[i * 2 + 1] * step))
            })
        });

        out.push(Detection {
            region: FaceRegion {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
            },
            keypoints,
        });
    }
}

/// Intersection over union of two regions.
pub fn iou(a: &FaceRegion, b: &FaceRegion) -> f32 {
    let ix = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let iy = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = ix * iy;
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Greedy NMS; the result is sorted by descending confidence.
fn non_max_suppression(mut candidates: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.region.confidence.total_cmp(&a.region.confidence));
    let mut kept: Vec<Detection> = Vec::new();
    for det in candidates {
        if kept.iter().all(|k| iou(&k.region, &det.region) <= threshold) {
            kept.push(det);
        }
    }
    kept
}
