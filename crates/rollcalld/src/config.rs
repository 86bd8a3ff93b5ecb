use std::path::PathBuf;

/// Daemon configuration, loaded once at startup from environment variables
/// and threaded through the engine and HTTP state.
#[derive(Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory holding `<name>.json` encodings and `<name>.jpg` reference
    /// images.
    pub registered_faces_dir: PathBuf,
    /// Path to the attendance CSV journal.
    pub attendance_file: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum encoding distance for a positive match (lower = stricter).
    pub tolerance: f32,
    /// Frame budget for one enrollment capture.
    pub enroll_frames: usize,
    /// Address the HTTP server binds to.
    pub bind_addr: String,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        Self {
            camera_device: std::env::var("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            registered_faces_dir: std::env::var("ROLLCALL_FACES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("static/registered_faces")),
            attendance_file: std::env::var("ROLLCALL_ATTENDANCE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("attendance.csv")),
            model_dir: std::env::var("ROLLCALL_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("models")),
            tolerance: env_f32("ROLLCALL_TOLERANCE", 0.6),
            enroll_frames: env_usize("ROLLCALL_ENROLL_FRAMES", 50),
            bind_addr: std::env::var("ROLLCALL_BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
        }
    }

    /// Path to the UltraFace detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("version-RFB-320.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the face embedding model.
    pub fn encoder_model_path(&self) -> String {
        self.model_dir
            .join("face-encoder-112.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
