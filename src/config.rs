//! Configuration
//!
//! Command-line flags with environment fallbacks.

use crate::capture::{
    ArbiterConfig, CameraBackend, CaptureFormat, DevicePolicy, SyntheticBackend, WebcamBackend,
};
use crate::recorder::FfmpegEncoderFactory;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Camera id that selects the generated test pattern
pub const SYNTHETIC_CAMERA: &str = "synthetic";

#[derive(Parser, Debug, Clone)]
#[command(name = "clipcam", version)]
#[command(about = "Timed webcam clips and a live preview over HTTP", long_about = None)]
pub struct Config {
    /// HTTP listen address
    #[arg(long, env = "CLIPCAM_BIND", default_value = "0.0.0.0:5000")]
    pub bind: SocketAddr,

    /// Directory holding one folder per recording
    #[arg(long, env = "CLIPCAM_CLIP_DIR", default_value = "clips")]
    pub clip_dir: PathBuf,

    /// Camera index or name, or `synthetic` for a generated test pattern
    #[arg(long, env = "CLIPCAM_CAMERA", default_value = "0")]
    pub camera: String,

    /// Requested capture width
    #[arg(long, env = "CLIPCAM_WIDTH", default_value_t = 1920)]
    pub width: u32,

    /// Requested capture height
    #[arg(long, env = "CLIPCAM_HEIGHT", default_value_t = 1080)]
    pub height: u32,

    /// Requested capture frame rate
    #[arg(long, env = "CLIPCAM_FPS", default_value_t = 30)]
    pub fps: u32,

    /// How the preview and recordings share the camera
    #[arg(long, env = "CLIPCAM_DEVICE_POLICY", value_enum, default_value_t = DevicePolicy::Shared)]
    pub device_policy: DevicePolicy,

    /// Longest wait for the camera before a request gives up
    #[arg(long, env = "CLIPCAM_ACQUIRE_TIMEOUT_MS", default_value_t = 5000)]
    pub acquire_timeout_ms: u64,

    /// Frames buffered per consumer before slow consumers skip frames
    #[arg(long, env = "CLIPCAM_FRAME_BUFFER", default_value_t = 4)]
    pub frame_buffer: usize,

    /// Cap on preview frame rate (defaults to the capture rate)
    #[arg(long, env = "CLIPCAM_PREVIEW_FPS")]
    pub preview_fps: Option<u32>,

    /// JPEG quality of preview frames (1-100)
    #[arg(long, env = "CLIPCAM_JPEG_QUALITY", default_value_t = 80)]
    pub jpeg_quality: u8,

    /// Longest recording a client may request, in seconds
    #[arg(long, env = "CLIPCAM_MAX_DURATION", default_value_t = 600)]
    pub max_duration_secs: i64,

    /// Keep at most this many recordings in each client's history
    #[arg(long, env = "CLIPCAM_HISTORY_LIMIT")]
    pub history_limit: Option<usize>,

    /// FFmpeg binary used for encoding
    #[arg(long, env = "CLIPCAM_FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg: String,

    /// x264 preset used for recordings
    #[arg(long, env = "CLIPCAM_PRESET", default_value = "veryfast")]
    pub preset: String,

    /// x264 constant rate factor (lower is better quality)
    #[arg(long, env = "CLIPCAM_CRF", default_value_t = 23)]
    pub crf: u8,

    /// Print the available cameras and exit
    #[arg(long)]
    pub list_cameras: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
            clip_dir: PathBuf::from("clips"),
            camera: "0".to_string(),
            width: 1920,
            height: 1080,
            fps: 30,
            device_policy: DevicePolicy::Shared,
            acquire_timeout_ms: 5000,
            frame_buffer: 4,
            preview_fps: None,
            jpeg_quality: 80,
            max_duration_secs: 600,
            history_limit: None,
            ffmpeg: "ffmpeg".to_string(),
            preset: "veryfast".to_string(),
            crf: 23,
            list_cameras: false,
        }
    }
}

impl Config {
    pub fn capture_format(&self) -> CaptureFormat {
        CaptureFormat::new(self.width, self.height, self.fps)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn arbiter_config(&self) -> ArbiterConfig {
        ArbiterConfig {
            policy: self.device_policy,
            format: self.capture_format(),
            buffer: self.frame_buffer,
        }
    }

    pub fn encoder_factory(&self) -> FfmpegEncoderFactory {
        FfmpegEncoderFactory::new(self.ffmpeg.clone()).with_quality(self.preset.clone(), self.crf)
    }

    /// Backend for the configured camera
    pub fn camera_backend(&self) -> Arc<dyn CameraBackend> {
        if self.camera.eq_ignore_ascii_case(SYNTHETIC_CAMERA) {
            Arc::new(SyntheticBackend::new())
        } else {
            Arc::new(WebcamBackend::new(self.camera.clone()))
        }
    }
}
