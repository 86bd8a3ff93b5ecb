//! V4L2 capture sessions via the `v4l` crate.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("camera stopped producing frames")]
    EndOfStream,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Anything that yields a sequence of frames.
///
/// Implemented by [`CaptureSession`] for real hardware and by scripted
/// sources in workflow tests.
pub trait FrameSource {
    /// Return the next frame, or [`CameraError::EndOfStream`] when the
    /// source is exhausted.
    fn read_frame(&mut self) -> Result<Frame, CameraError>;
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel).
    Grey,
}

/// Exclusive ownership of the camera device for one workflow.
///
/// The device is released when the session drops, so every exit path
/// (completion, cancellation, error) frees the hardware exactly once.
pub struct CaptureSession {
    /// Running capture stream, created on the first `read_frame` and held
    /// for the session so consecutive reads dequeue from one buffer queue
    /// instead of paying a stream start/stop per frame.
    ///
    /// Declared before `device` so STREAMOFF runs before the device closes.
    /// The `'static` parameter is the mmap arena lifetime; the stream keeps
    /// its own handle to the device internally.
    stream: Option<MmapStream<'static>>,
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
    sequence: u32,
}

impl CaptureSession {
    /// Open a V4L2 device by path (e.g., "/dev/video0").
    ///
    /// Any open failure, including the device being held by another process,
    /// surfaces as [`CameraError::DeviceUnavailable`].
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceUnavailable(format!(
                "{device_path}: no such device"
            )));
        }

        let device = Device::with_path(device_path)
            .map_err(|e| CameraError::DeviceUnavailable(format!("{device_path}: {e}")))?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        // Request YUYV at 640x480; if the driver negotiates GREY, accept it.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = 640;
        fmt.height = 480;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let pixel_format = if negotiated.fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if negotiated.fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV or GREY)",
                negotiated.fourcc
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        Ok(Self {
            stream: None,
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
            sequence: 0,
        })
    }

    /// Release the device. Dropping the session has the same effect; the
    /// explicit form exists for callers that want the release visible in the
    /// control flow.
    pub fn close(self) {
        drop(self);
    }

}

/// Convert a raw buffer to grayscale based on the negotiated format.
fn buf_to_grayscale(
    pixel_format: PixelFormat,
    width: u32,
    height: u32,
    buf: &[u8],
) -> Result<Vec<u8>, CameraError> {
    let pixels = (width * height) as usize;

    match pixel_format {
        PixelFormat::Grey => {
            if buf.len() < pixels {
                return Err(CameraError::CaptureFailed(format!(
                    "GREY buffer too short: expected {pixels}, got {}",
                    buf.len()
                )));
            }
            Ok(buf[..pixels].to_vec())
        }
        PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, width, height)
            .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
    }
}

impl FrameSource for CaptureSession {
    /// Dequeue the next frame from the held stream, converting to grayscale.
    ///
    /// The stream starts on the first read and stays running until the
    /// session drops. A disconnected device (ENODEV on dequeue) maps to
    /// `EndOfStream`; other dequeue failures are `CaptureFailed`.
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        if self.stream.is_none() {
            let stream: MmapStream<'static> =
                MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4).map_err(|e| {
                    CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
                })?;
            self.stream = Some(stream);
        }
        let (pixel_format, width, height) = (self.pixel_format, self.width, self.height);
        let Some(stream) = self.stream.as_mut() else {
            return Err(CameraError::CaptureFailed("stream not initialized".into()));
        };

        let (buf, meta) = stream.next().map_err(|e| {
            const ENODEV: i32 = 19;
            if e.raw_os_error() == Some(ENODEV) {
                CameraError::EndOfStream
            } else {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            }
        })?;

        let gray = buf_to_grayscale(pixel_format, width, height, buf)?;
        let sequence = meta.sequence;
        self.sequence = sequence;

        Ok(Frame {
            data: gray,
            width,
            height,
            sequence,
        })
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        tracing::debug!(
            device = %self.device_path,
            frames = self.sequence,
            "capture session released"
        );
    }
}
