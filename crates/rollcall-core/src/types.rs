use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Face encoding vector (typically 128- or 512-dimensional depending on the
/// embedding model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Encoding {
    pub values: Vec<f32>,
    /// Model version that produced this encoding (e.g., "slim_128").
    pub model_version: Option<String>,
}

impl Encoding {
    /// Compute Euclidean distance to another encoding.
    ///
    /// Lower = more similar. Mismatched lengths compare over the shorter
    /// prefix, which only happens across model versions.
    pub fn distance(&self, other: &Encoding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Whether this encoding matches another within `tolerance`.
    ///
    /// Tolerance is the maximum allowed distance; lower = stricter.
    pub fn matches(&self, other: &Encoding, tolerance: f32) -> bool {
        self.distance(other) <= tolerance
    }
}

/// A registered person: the unique name and the persisted encoding.
///
/// The reference image lives beside the encoding on disk and is not loaded
/// into memory for matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredFace {
    pub name: String,
    pub encoding: Encoding,
}
