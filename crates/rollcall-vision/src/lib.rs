//! rollcall-vision — ONNX-backed face detection and encoding.
//!
//! Implements the [`rollcall_core::Vision`] trait over two ONNX Runtime
//! sessions: an UltraFace detector and a face embedding extractor. This crate
//! is glue around the inference runtime; the attendance workflows never see
//! it directly, only the trait.

pub mod detector;
pub mod encoder;

use rollcall_core::{Encoding, FaceRegion, Vision, VisionError};

pub use detector::FaceDetector;
pub use encoder::FaceEncoder;

/// ONNX-backed implementation of the vision capability.
pub struct OnnxVision {
    detector: FaceDetector,
    encoder: FaceEncoder,
}

impl OnnxVision {
    /// Load both models. Fails fast if either file is missing.
    pub fn load(detector_path: &str, encoder_path: &str) -> Result<Self, VisionError> {
        Ok(Self {
            detector: FaceDetector::load(detector_path)?,
            encoder: FaceEncoder::load(encoder_path)?,
        })
    }
}

impl Vision for OnnxVision {
    fn detect_faces(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceRegion>, VisionError> {
        check_frame(frame, width, height)?;
        self.detector.detect(frame, width, height)
    }

    fn encode_faces(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        regions: &[FaceRegion],
    ) -> Result<Vec<Encoding>, VisionError> {
        check_frame(frame, width, height)?;
        regions
            .iter()
            .map(|region| self.encoder.extract(frame, width, height, region))
            .collect()
    }
}

fn check_frame(frame: &[u8], width: u32, height: u32) -> Result<(), VisionError> {
    let expected = (width * height) as usize;
    if frame.len() < expected {
        return Err(VisionError::InvalidFrame {
            width,
            height,
            expected,
            actual: frame.len(),
        });
    }
    Ok(())
}
