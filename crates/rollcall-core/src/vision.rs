//! The seam between the attendance workflows and the face
//! detection/encoding capability.
//!
//! Detection and encoding are delegated wholesale to an external inference
//! backend; the workflows only sequence calls through this trait.

use crate::types::{Encoding, FaceRegion};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid frame: expected {expected} bytes for {width}x{height}, got {actual}")]
    InvalidFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// Face detection and encoding over raw grayscale frames.
///
/// `frame` is row-major grayscale pixel data, `width * height` bytes.
pub trait Vision {
    /// Detect all face regions in a frame.
    fn detect_faces(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceRegion>, VisionError>;

    /// Extract one encoding per detected region, in region order.
    fn encode_faces(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        regions: &[FaceRegion],
    ) -> Result<Vec<Encoding>, VisionError>;
}
