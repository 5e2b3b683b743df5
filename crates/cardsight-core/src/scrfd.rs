//! SCRFD face locator via ONNX Runtime.
//!
//! Finds the holder's photo on a card: 3-stride anchor-free decoding, NMS,
//! then the largest surviving box.

use crate::collab::{CollaboratorError, FaceLocator};
use crate::geometry::FaceBox;
use image::imageops::{self, FilterType};
use image::DynamicImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::cmp::Ordering;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum ScrfdError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score, bbox).
type StrideOutputIndices = (usize, usize);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Detection {
    face: FaceBox,
    score: f32,
}

impl Detection {
    fn area(&self) -> f32 {
        self.face.width().max(0.0) * self.face.height().max(0.0)
    }
}

pub struct ScrfdLocator {
    session: Session,
    /// Per-stride output indices for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdLocator {
    /// Load the SCRFD ONNX model from `model_path`.
    pub fn load(model_path: &str) -> Result<Self, ScrfdError> {
        if !Path::new(model_path).exists() {
            return Err(ScrfdError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(path = model_path, outputs = ?output_names, "loaded SCRFD model");

        if output_names.len() < 6 {
            return Err(ScrfdError::InferenceFailed(format!(
                "SCRFD model requires score and bbox outputs for 3 strides, got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self { session, stride_indices })
    }

    /// All faces above the confidence threshold after NMS, best first.
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<Detection>, ScrfdError> {
        let (input, letterbox) = preprocess(image);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[pos];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| ScrfdError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| ScrfdError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            all.extend(decode_stride(scores, bboxes, stride, &letterbox, SCRFD_CONFIDENCE_THRESHOLD));
        }

        Ok(nms(all, SCRFD_NMS_THRESHOLD))
    }
}

impl FaceLocator for ScrfdLocator {
    fn locate(&mut self, image: &DynamicImage) -> Result<Option<FaceBox>, CollaboratorError> {
        let detections = self
            .detect(image)
            .map_err(|e| CollaboratorError::InferenceFailed(e.to_string()))?;
        tracing::debug!(faces = detections.len(), "SCRFD detections");
        Ok(largest(&detections).map(|d| d.face))
    }
}

/// Letterbox `image` into the square RGB input tensor, normalized to the
/// SCRFD input distribution. Padding normalizes to 0.
fn preprocess(image: &DynamicImage) -> (Array4<f32>, LetterboxInfo) {
    let rgb = image.to_rgb8();
    let (width, height) = (rgb.width().max(1) as f32, rgb.height().max(1) as f32);

    let scale = (SCRFD_INPUT_SIZE as f32 / width).min(SCRFD_INPUT_SIZE as f32 / height);
    let new_w = ((width * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let new_h = ((height * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let pad_x = (SCRFD_INPUT_SIZE as u32 - new_w) as f32 / 2.0;
    let pad_y = (SCRFD_INPUT_SIZE as u32 - new_h) as f32 / 2.0;

    let resized = imageops::resize(&rgb, new_w, new_h, FilterType::Triangle);
    let (x0, y0) = (pad_x.floor() as usize, pad_y.floor() as usize);

    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y0 + y as usize, x0 + x as usize]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, LetterboxInfo { scale, pad_x, pad_y })
}

/// Map outputs by name ("score_8", "bbox_16", ...) when the export names
/// them, else positionally: [0-2] scores, [3-5] bboxes.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named {
        Some(found) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [found[0], found[1], found[2]]
        }
        None => {
            tracing::info!(?names, "SCRFD: output names not recognized, using positional mapping");
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Decode one stride level into card-space detections.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<Detection> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let grid_h = SCRFD_INPUT_SIZE / stride;
    let num_anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let unmap = |v: f32, pad: f32| (v - pad) / letterbox.scale;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }
        let Some(offsets) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid_w) as f32 * s;
        let anchor_y = (cell / grid_w) as f32 * s;

        detections.push(Detection {
            face: FaceBox {
                x1: unmap(anchor_x - offsets[0] * s, letterbox.pad_x),
                y1: unmap(anchor_y - offsets[1] * s, letterbox.pad_y),
                x2: unmap(anchor_x + offsets[2] * s, letterbox.pad_x),
                y2: unmap(anchor_y + offsets[3] * s, letterbox.pad_y),
            },
            score,
        });
    }
    detections
}

/// Non-maximum suppression; survivors ordered by score, best first.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(&k.face, &det.face) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width() * a.height() + b.width() * b.height() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// The photo on a card is the biggest face; ties keep the higher score.
fn largest(detections: &[Detection]) -> Option<&Detection> {
    detections
        .iter()
        .reduce(|best, d| if d.area() > best.area() { d } else { best })
}
