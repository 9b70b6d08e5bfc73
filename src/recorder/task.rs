//! Recording task
//!
//! Each accepted request runs as a detached task: acquire the camera, encode
//! frames until the deadline, publish the clip, notify the client. Every
//! outcome, success or failure, ends up in the client's session.

use super::encoder::{ClipEncoder, EncoderFactory};
use super::state::{RecordingError, RecordingRequest, RecordingResult, RecordingState};
use crate::capture::{CaptureArbiter, CaptureFormat, FrameSource};
use crate::session::{Notification, SessionRegistry};
use crate::storage::{ClipReference, ClipStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

struct RecorderInner {
    arbiter: CaptureArbiter,
    store: ClipStore,
    encoders: Arc<dyn EncoderFactory>,
    sessions: Arc<SessionRegistry>,
    acquire_timeout: Duration,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    /// In-flight recordings by folder
    active: Mutex<HashMap<String, RecordingState>>,
}

/// Spawns and tracks recording tasks
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<RecorderInner>,
}

impl Recorder {
    pub fn new(
        arbiter: CaptureArbiter,
        store: ClipStore,
        encoders: Arc<dyn EncoderFactory>,
        sessions: Arc<SessionRegistry>,
        acquire_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(RecorderInner {
                arbiter,
                store,
                encoders,
                sessions,
                acquire_timeout,
                shutdown,
                tracker: TaskTracker::new(),
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start a recording in the background and return at once
    pub fn spawn(&self, request: RecordingRequest) -> JoinHandle<()> {
        let recorder = self.clone();
        self.set_state(&request.folder, RecordingState::Acquiring);
        self.inner.tracker.spawn(async move {
            let _ = recorder.run(request).await;
        })
    }

    /// Run one recording to completion and report it to the session
    pub async fn run(&self, request: RecordingRequest) -> RecordingResult<ClipReference> {
        tracing::info!(
            "Recording {}s for client {} into {}",
            request.duration.as_secs(),
            request.client_id,
            request.folder
        );
        self.set_state(&request.folder, RecordingState::Acquiring);

        let result = self.record(&request).await;
        self.inner.active.lock().remove(&request.folder);

        match &result {
            Ok(clip) => {
                tracing::info!("Recording {} finished: {}", request.folder, clip.file);
                self.inner.sessions.complete(&request.client_id, clip.clone());
            }
            Err(e) => {
                tracing::error!("Recording {} failed: {}", request.folder, e);
                self.inner.sessions.set_notification(
                    &request.client_id,
                    Notification::Failed {
                        folder: request.folder.clone(),
                        message: e.to_string(),
                    },
                );
            }
        }

        result
    }

    async fn record(&self, request: &RecordingRequest) -> RecordingResult<ClipReference> {
        let lease = self.inner.arbiter.acquire(self.inner.acquire_timeout).await?;
        let format = lease.format();

        let dir = self.inner.store.create_folder(&request.folder).await?;
        let file = ClipStore::timestamp_file_name();
        let final_path = dir.join(&file);
        let partial_path = ClipStore::partial_path(&final_path);

        let mut encoder = self.inner.encoders.create(&partial_path, format).await?;
        let mut source = FrameSource::new(lease);
        self.set_state(&request.folder, RecordingState::Recording);

        let deadline = Instant::now() + request.duration;
        let captured = capture_until(
            &mut source,
            encoder.as_mut(),
            format,
            deadline,
            &self.inner.shutdown,
        )
        .await;

        // The camera is free for others while the container is closed
        drop(source);

        let frames = match captured {
            Ok(frames) => frames,
            Err(e) => {
                drop(encoder);
                discard(&partial_path).await;
                return Err(e);
            }
        };

        self.set_state(&request.folder, RecordingState::Finalizing);
        if let Err(e) = encoder.finish().await {
            discard(&partial_path).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&partial_path, &final_path).await {
            discard(&partial_path).await;
            return Err(RecordingError::EncodingWriteFailed(format!(
                "failed to publish clip: {e}"
            )));
        }

        tracing::debug!("Published {:?} ({} frames)", final_path, frames);
        Ok(ClipReference::new(request.folder.clone(), file))
    }

    fn set_state(&self, folder: &str, state: RecordingState) {
        self.inner.active.lock().insert(folder.to_string(), state);
    }

    /// Phase of every in-flight recording, by folder
    pub fn phases(&self) -> Vec<(String, RecordingState)> {
        let mut phases: Vec<_> = self
            .inner
            .active
            .lock()
            .iter()
            .map(|(folder, state)| (folder.clone(), *state))
            .collect();
        phases.sort();
        phases
    }

    pub fn in_flight(&self) -> usize {
        self.inner.active.lock().len()
    }

    /// Stop in-flight recordings early and wait until they are finalized
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        tracing::info!(
            "Waiting for {} recording task(s) to finish",
            self.inner.tracker.len()
        );
        self.inner.tracker.wait().await;
    }
}

/// Encode frames until the deadline, end of stream, or shutdown
async fn capture_until(
    source: &mut FrameSource,
    encoder: &mut dyn ClipEncoder,
    format: CaptureFormat,
    deadline: Instant,
    shutdown: &CancellationToken,
) -> RecordingResult<u64> {
    let mut written: u64 = 0;
    let mut mismatched: u64 = 0;

    loop {
        if Instant::now() >= deadline {
            break;
        }

        let next = tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Shutdown requested; finalizing after {} frames", written);
                break;
            }
            next = tokio::time::timeout_at(deadline, source.next_frame()) => next,
        };

        match next {
            Err(_) => break,
            Ok(None) => {
                tracing::info!("Camera stopped early; finalizing after {} frames", written);
                break;
            }
            Ok(Some(frame)) => {
                if !frame.matches(&format) {
                    if mismatched == 0 {
                        tracing::warn!(
                            "Skipping {}x{} frame, encoder expects {}x{}",
                            frame.width,
                            frame.height,
                            format.width,
                            format.height
                        );
                    }
                    mismatched += 1;
                    continue;
                }
                encoder.write_frame(&frame).await?;
                written += 1;
            }
        }
    }

    if source.skipped() > 0 {
        tracing::debug!("Recording fell behind and skipped {} frame(s)", source.skipped());
    }

    Ok(written)
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove partial clip {:?}: {}", path, e);
        }
    }
}
