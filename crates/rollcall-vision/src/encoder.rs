//! Face embedding extractor via ONNX Runtime.
//!
//! Crops a detected region, resizes it to the model's 112x112 input with
//! bilinear interpolation, and runs the embedding model. The output vector
//! is L2-normalized.

use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::{Encoding, FaceRegion, VisionError};
use std::path::Path;

// --- Named constants ---
const ENCODER_INPUT_SIZE: usize = 112;
const ENCODER_MEAN: f32 = 127.5;
const ENCODER_STD: f32 = 127.5;
const ENCODER_MODEL_VERSION: &str = "ultraface-112";
/// Pad the detected box by this fraction on each side before cropping, so
/// the crop includes some facial context.
const CROP_MARGIN: f32 = 0.1;

/// ONNX embedding extractor.
pub struct FaceEncoder {
    session: Session,
}

impl FaceEncoder {
    /// Load the embedding ONNX model from the given path.
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

        tracing::info!(path = model_path, "loaded face encoder");

        Ok(Self { session })
    }

    /// Extract an encoding for one detected region of a grayscale frame.
    pub fn extract(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        region: &FaceRegion,
    ) -> Result<Encoding, VisionError> {
        let crop = crop_resize(frame, width as usize, height as usize, region);
        let input = preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![
                TensorRef::from_array_view(input.view()).map_err(ort_err)?
            ])
            .map_err(ort_err)?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| VisionError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();
        if raw.is_empty() {
            return Err(VisionError::InferenceFailed(
                "embedding model produced an empty output".into(),
            ));
        }

        // L2-normalize so Euclidean distances are comparable across captures
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };

        Ok(Encoding {
            values,
            model_version: Some(ENCODER_MODEL_VERSION.to_string()),
        })
    }
}

fn ort_err(e: ort::Error) -> VisionError {
    VisionError::InferenceFailed(e.to_string())
}

/// Crop `region` (with margin) out of the frame and bilinear-resize to the
/// encoder input size. Out-of-frame samples clamp to the frame edge.
fn crop_resize(frame: &[u8], width: usize, height: usize, region: &FaceRegion) -> Vec<u8> {
    let margin_x = region.width * CROP_MARGIN;
    let margin_y = region.height * CROP_MARGIN;
    let x0 = region.x - margin_x;
    let y0 = region.y - margin_y;
    let crop_w = (region.width + 2.0 * margin_x).max(1.0);
    let crop_h = (region.height + 2.0 * margin_y).max(1.0);

    let sample = |x: f32, y: f32| -> f32 {
        let xc = x.clamp(0.0, (width - 1) as f32);
        let yc = y.clamp(0.0, (height - 1) as f32);
        let x1 = xc.floor() as usize;
        let y1 = yc.floor() as usize;
        let x2 = (x1 + 1).min(width - 1);
        let y2 = (y1 + 1).min(height - 1);
        let dx = xc - x1 as f32;
        let dy = yc - y1 as f32;

        let tl = frame[y1 * width + x1] as f32;
        let tr = frame[y1 * width + x2] as f32;
        let bl = frame[y2 * width + x1] as f32;
        let br = frame[y2 * width + x2] as f32;

        let top = tl * (1.0 - dx) + tr * dx;
        let bot = bl * (1.0 - dx) + br * dx;
        top * (1.0 - dy) + bot * dy
    };

    let mut out = Vec::with_capacity(ENCODER_INPUT_SIZE * ENCODER_INPUT_SIZE);
    for y in 0..ENCODER_INPUT_SIZE {
        for x in 0..ENCODER_INPUT_SIZE {
            let src_x = x0 + crop_w * (x as f32 + 0.5) / ENCODER_INPUT_SIZE as f32;
            let src_y = y0 + crop_h * (y as f32 + 0.5) / ENCODER_INPUT_SIZE as f32;
            out.push(sample(src_x, src_y).round().clamp(0.0, 255.0) as u8);
        }
    }
    out
}

/// Preprocess a 112x112 grayscale crop into a NCHW float tensor with
/// symmetric normalization, grayscale replicated across RGB.
fn preprocess(crop: &[u8]) -> Array4<f32> {
    let size = ENCODER_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for y in 0..size {
        for x in 0..size {
            let pixel = crop.get(y * size + x).copied().unwrap_or(0) as f32;
            let normalized = (pixel - ENCODER_MEAN) / ENCODER_STD;
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }

    tensor
}
