//! UltraFace detector via ONNX Runtime.
//!
//! Runs the version-RFB-320 UltraFace model: a single forward pass yields
//! per-anchor scores and normalized corner boxes, followed by confidence
//! thresholding and NMS.

use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::{FaceRegion, VisionError};
use std::path::Path;

// --- Named constants ---
const ULTRAFACE_INPUT_WIDTH: usize = 320;
const ULTRAFACE_INPUT_HEIGHT: usize = 240;
const ULTRAFACE_MEAN: f32 = 127.0;
const ULTRAFACE_STD: f32 = 128.0;
const ULTRAFACE_CONFIDENCE_THRESHOLD: f32 = 0.7;
const ULTRAFACE_NMS_THRESHOLD: f32 = 0.5;

/// UltraFace-based face detector.
pub struct FaceDetector {
    session: Session,
    /// Output tensor indices (scores_idx, boxes_idx), discovered by name at
    /// load time with positional fallback.
    output_indices: (usize, usize),
}

impl FaceDetector {
    /// Load the UltraFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, VisionError> {
        if !Path::new(model_path).exists() {
            return Err(VisionError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()
            .map_err(ort_err)?
            .with_intra_threads(2)
            .map_err(ort_err)?
            .commit_from_file(model_path)
            .map_err(ort_err)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            outputs = ?output_names,
            "loaded UltraFace detector"
        );

        if output_names.len() < 2 {
            return Err(VisionError::InferenceFailed(format!(
                "UltraFace model requires 2 outputs (scores, boxes), got {}",
                output_names.len()
            )));
        }

        let output_indices = discover_output_indices(&output_names);
        tracing::debug!(?output_indices, "UltraFace output tensor mapping");

        Ok(Self {
            session,
            output_indices,
        })
    }

    /// Detect faces in a grayscale frame, returning regions sorted by
    /// confidence (highest first) in frame pixel coordinates.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceRegion>, VisionError> {
        let input = preprocess(frame, width as usize, height as usize);

        let outputs = self
            .session
            .run(ort::inputs![
                TensorRef::from_array_view(input.view()).map_err(ort_err)?
            ])
            .map_err(ort_err)?;

        let (scores_idx, boxes_idx) = self.output_indices;
        let (_, scores) = outputs[scores_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| VisionError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[boxes_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| VisionError::InferenceFailed(format!("boxes: {e}")))?;

        let candidates = decode(
            scores,
            boxes,
            width as f32,
            height as f32,
            ULTRAFACE_CONFIDENCE_THRESHOLD,
        );
        let mut regions = nms(candidates, ULTRAFACE_NMS_THRESHOLD);
        regions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        tracing::debug!(faces = regions.len(), "detection complete");
        Ok(regions)
    }
}

fn ort_err(e: ort::Error) -> VisionError {
    VisionError::InferenceFailed(e.to_string())
}

/// Map output names to (scores_idx, boxes_idx). UltraFace exports name the
/// tensors "scores" and "boxes"; fall back to positional order otherwise.
fn discover_output_indices(names: &[String]) -> (usize, usize) {
    let scores = names.iter().position(|n| n.contains("score"));
    let boxes = names.iter().position(|n| n.contains("box"));
    match (scores, boxes) {
        (Some(s), Some(b)) => (s, b),
        _ => (0, 1),
    }
}

/// Resize (nearest-neighbor) to 320x240, replicate grayscale into RGB, and
/// normalize to the model's expected range.
fn preprocess(frame: &[u8], width: usize, height: usize) -> Array4<f32> {
    let mut tensor =
        Array4::<f32>::zeros((1, 3, ULTRAFACE_INPUT_HEIGHT, ULTRAFACE_INPUT_WIDTH));

    for y in 0..ULTRAFACE_INPUT_HEIGHT {
        for x in 0..ULTRAFACE_INPUT_WIDTH {
            let src_x = x * width / ULTRAFACE_INPUT_WIDTH;
            let src_y = y * height / ULTRAFACE_INPUT_HEIGHT;
            let pixel = frame.get(src_y * width + src_x).copied().unwrap_or(0) as f32;
            let normalized = (pixel - ULTRAFACE_MEAN) / ULTRAFACE_STD;
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }

    tensor
}

/// Decode per-anchor outputs into pixel-space regions above the confidence
/// threshold. `scores` is [anchor][background, face]; `boxes` is
/// [anchor][x1, y1, x2, y2] normalized to 0..1.
fn decode(
    scores: &[f32],
    boxes: &[f32],
    frame_width: f32,
    frame_height: f32,
    threshold: f32,
) -> Vec<FaceRegion> {
    let anchors = scores.len() / 2;
    let mut regions = Vec::new();

    for i in 0..anchors.min(boxes.len() / 4) {
        let confidence = scores[i * 2 + 1];
        if confidence < threshold {
            continue;
        }

        let x1 = (boxes[i * 4] * frame_width).clamp(0.0, frame_width);
        let y1 = (boxes[i * 4 + 1] * frame_height).clamp(0.0, frame_height);
        let x2 = (boxes[i * 4 + 2] * frame_width).clamp(0.0, frame_width);
        let y2 = (boxes[i * 4 + 3] * frame_height).clamp(0.0, frame_height);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        regions.push(FaceRegion {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence,
        });
    }

    regions
}

/// Greedy non-maximum suppression: keep the highest-confidence region, drop
/// overlapping candidates above the IoU threshold, repeat.
fn nms(mut candidates: Vec<FaceRegion>, iou_threshold: f32) -> Vec<FaceRegion> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<FaceRegion> = Vec::new();

    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) < iou_threshold) {
            kept.push(candidate);
        }
    }

    kept
}

/// Intersection-over-union of two regions.
fn iou(a: &FaceRegion, b: &FaceRegion) -> f32 {
    let ix1 = a.x.max(b.x);
    let iy1 = a.y.max(b.y);
    let ix2 = (a.x + a.width).min(b.x + b.width);
    let iy2 = (a.y + a.height).min(b.y + b.height);

    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
