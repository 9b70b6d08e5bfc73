//! Capture trait definitions
//!
//! Device-agnostic types shared by the arbiter, the frame source and the
//! camera backends.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while acquiring or reading the capture device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Camera could not be opened: {0}")]
    DeviceInitFailed(String),

    #[error("Camera is in use by another capture")]
    DeviceBusy,

    #[error("Timed out after {0}ms waiting for the camera")]
    AcquireTimeout(u64),

    #[error("Camera stopped producing frames: {0}")]
    EndOfStream(String),
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Video format requested from, or negotiated with, the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl CaptureFormat {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps }
    }

    /// Size in bytes of one RGB24 frame at this resolution
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Nominal time between two frames
    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

impl Default for CaptureFormat {
    fn default() -> Self {
        Self::new(1920, 1080, 30)
    }
}

/// A single RGB24 frame handed out to lease holders.
///
/// The pixel payload is reference counted, so fanning a frame out to many
/// subscribers never copies the image.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic index assigned by the capture loop
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Packed RGB24 pixels, row-major
    pub data: Bytes,
}

impl Frame {
    pub fn matches(&self, format: &CaptureFormat) -> bool {
        self.width == format.width
            && self.height == format.height
            && self.data.len() == format.frame_len()
    }
}

/// Raw output of a single device read, before the capture loop numbers it
#[derive(Debug)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// An opened camera stream.
///
/// Readers live on the capture thread only and are never shared.
pub trait FrameReader {
    /// Format the device actually delivers
    fn format(&self) -> CaptureFormat;

    /// Block until the next frame is available.
    ///
    /// Any error ends the capture loop.
    fn read_frame(&mut self) -> CaptureResult<RawFrame>;
}

/// Something that can open the physical camera
pub trait CameraBackend: Send + Sync {
    /// Human readable name used in logs
    fn name(&self) -> String;

    /// Open the device and start streaming
    fn open(&self, requested: &CaptureFormat) -> CaptureResult<Box<dyn FrameReader>>;
}
