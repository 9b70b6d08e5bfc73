//! Recording state management
//!
//! Request, phase and error types shared by the recording task and the
//! encoders.

use crate::capture::CaptureError;
use crate::storage::StorageError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors that end a recording task
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("Failed to start encoder: {0}")]
    EncoderStart(String),

    #[error("Encoding failed: {0}")]
    EncodingWriteFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RecordingResult<T> = Result<T, RecordingError>;

/// Phase of an in-flight recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// Waiting for the camera
    Acquiring,
    /// Writing frames
    Recording,
    /// Closing the container
    Finalizing,
}

/// A timed recording accepted from a client
#[derive(Debug, Clone)]
pub struct RecordingRequest {
    pub client_id: String,
    /// Output folder, unique per request
    pub folder: String,
    pub duration: Duration,
}

impl RecordingRequest {
    /// Negative durations are treated as zero
    pub fn new(
        client_id: impl Into<String>,
        folder: impl Into<String>,
        duration_secs: i64,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            folder: folder.into(),
            duration: Duration::from_secs(duration_secs.max(0) as u64),
        }
    }
}
