//! Webcam capture using nokhwa
//!
//! Opens the physical camera and decodes every frame to packed RGB24 so the
//! recorder and the live preview see one uniform pixel layout.

use super::traits::{
    CameraBackend, CaptureError, CaptureFormat, CaptureResult, FrameReader, RawFrame,
};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::Camera;
use serde::Serialize;

/// Information about a camera/webcam
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    /// Index or platform identifier
    pub id: String,

    /// Device name
    pub name: String,
}

/// Get list of available cameras
pub fn list_cameras() -> Vec<CameraInfo> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .map(|info| CameraInfo {
                id: index_to_string(info.index()),
                name: info.human_name(),
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

fn index_to_string(index: &CameraIndex) -> String {
    match index {
        CameraIndex::Index(i) => i.to_string(),
        CameraIndex::String(s) => s.clone(),
    }
}

/// Camera backend for a real device
pub struct WebcamBackend {
    device_id: String,
}

impl WebcamBackend {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }

    /// Camera index from device_id; numeric ids are treated as indices
    fn camera_index(&self) -> CameraIndex {
        match self.device_id.parse::<u32>() {
            Ok(idx) => CameraIndex::Index(idx),
            Err(_) => CameraIndex::String(self.device_id.clone()),
        }
    }
}

impl CameraBackend for WebcamBackend {
    fn name(&self) -> String {
        format!("webcam:{}", self.device_id)
    }

    fn open(&self, requested: &CaptureFormat) -> CaptureResult<Box<dyn FrameReader>> {
        let index = self.camera_index();
        let wanted = CameraFormat::new(
            Resolution::new(requested.width, requested.height),
            FrameFormat::MJPEG,
            requested.fps,
        );
        let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(wanted));

        let mut camera = Camera::new(index.clone(), format).map_err(|e| {
            CaptureError::DeviceInitFailed(format!("failed to open camera {index:?}: {e}"))
        })?;

        camera
            .open_stream()
            .map_err(|e| CaptureError::DeviceInitFailed(format!("failed to open stream: {e}")))?;

        let negotiated = camera.camera_format();
        let actual = CaptureFormat::new(
            negotiated.resolution().width(),
            negotiated.resolution().height(),
            negotiated.frame_rate(),
        );

        tracing::info!(
            "Webcam opened: {}x{} @ {}fps, format={:?} (requested {}x{} @ {}fps)",
            actual.width,
            actual.height,
            actual.fps,
            negotiated.format(),
            requested.width,
            requested.height,
            requested.fps
        );

        Ok(Box::new(WebcamReader {
            camera,
            format: actual,
        }))
    }
}

struct WebcamReader {
    camera: Camera,
    format: CaptureFormat,
}

impl FrameReader for WebcamReader {
    fn format(&self) -> CaptureFormat {
        self.format
    }

    fn read_frame(&mut self) -> CaptureResult<RawFrame> {
        // Blocks until the camera delivers; the device controls the timing
        let buffer = self
            .camera
            .frame()
            .map_err(|e| CaptureError::EndOfStream(format!("frame read failed: {e}")))?;

        let image = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| CaptureError::EndOfStream(format!("frame decode failed: {e}")))?;

        Ok(RawFrame {
            width: image.width(),
            height: image.height(),
            data: image.into_raw(),
        })
    }
}

impl Drop for WebcamReader {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            tracing::warn!("Error stopping camera stream: {:?}", e);
        }
    }
}
