//! Recording system module
//!
//! Timed recordings from the shared camera:
//! - ClipEncoder / EncoderFactory for writing frames into a container
//! - Recorder to spawn, track and report recording tasks
//! - State and error types for in-flight recordings

pub mod encoder;
pub mod state;
pub mod task;

pub use encoder::{ClipEncoder, EncoderFactory, FfmpegEncoderFactory};
pub use state::{RecordingError, RecordingRequest, RecordingResult, RecordingState};
pub use task::Recorder;
