//! rollcall-hw — Hardware abstraction for camera capture.
//!
//! Provides V4L2-based capture sessions, grayscale frame handling, overlay
//! annotation, and the cancellation token that stops a capture loop.

pub mod camera;
pub mod cancel;
pub mod frame;
pub mod overlay;

pub use camera::{CameraError, CaptureSession, FrameSource};
pub use cancel::CancelToken;
pub use frame::Frame;
