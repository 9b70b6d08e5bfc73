//! Frame source
//!
//! Turns a [`Lease`] into a lazy sequence of frames. A source never holds on
//! to a frame after handing it out.

use super::arbiter::Lease;
use super::traits::{CaptureFormat, Frame};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

/// Pulls frames through an acquired lease
#[derive(Debug)]
pub struct FrameSource {
    lease: Lease,
    min_interval: Option<Duration>,
    last_yield: Option<Instant>,
    skipped: u64,
}

impl FrameSource {
    pub fn new(lease: Lease) -> Self {
        Self {
            lease,
            min_interval: None,
            last_yield: None,
            skipped: 0,
        }
    }

    /// Yield at most `fps` frames per second, dropping the rest
    pub fn with_max_fps(mut self, fps: u32) -> Self {
        if fps > 0 {
            self.min_interval = Some(Duration::from_secs_f64(1.0 / fps as f64));
        }
        self
    }

    /// Format delivered by the device behind this source
    pub fn format(&self) -> CaptureFormat {
        self.lease.format()
    }

    /// Frames this source skipped because it fell behind the device
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Wait for the next frame.
    ///
    /// Returns `None` once the device has stopped producing frames.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.lease.frames().recv().await {
                Ok(frame) => {
                    if self.throttled() {
                        continue;
                    }
                    self.last_yield = Some(Instant::now());
                    return Some(frame);
                }
                Err(RecvError::Lagged(missed)) => {
                    self.skipped += missed;
                    tracing::debug!("Frame source lagged, skipped {} frame(s)", missed);
                }
                Err(RecvError::Closed) => {
                    tracing::debug!("Frame source reached end of stream");
                    return None;
                }
            }
        }
    }

    fn throttled(&self) -> bool {
        match (self.min_interval, self.last_yield) {
            (Some(interval), Some(last)) => last.elapsed() < interval,
            _ => false,
        }
    }
}
