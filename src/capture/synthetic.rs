//! Synthetic camera
//!
//! Generates a moving gradient at the requested rate. Used for headless
//! deployments (`--camera synthetic`) and throughout the test suite in place
//! of real hardware.

use super::traits::{
    CameraBackend, CaptureError, CaptureFormat, CaptureResult, FrameReader, RawFrame,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Test-pattern camera backend
#[derive(Clone, Default)]
pub struct SyntheticBackend {
    /// Stop after this many frames, simulating an unplugged device
    frame_limit: Option<u64>,
    /// Refuse to open, simulating a missing device
    fail_open: bool,
    /// Extra delay before the stream is reported open
    open_delay: Duration,
    opens: Arc<AtomicUsize>,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Number of times the device has been opened
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl CameraBackend for SyntheticBackend {
    fn name(&self) -> String {
        "synthetic".to_string()
    }

    fn open(&self, requested: &CaptureFormat) -> CaptureResult<Box<dyn FrameReader>> {
        if !self.open_delay.is_zero() {
            std::thread::sleep(self.open_delay);
        }
        if self.fail_open {
            return Err(CaptureError::DeviceInitFailed(
                "synthetic camera configured to fail".to_string(),
            ));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(SyntheticReader {
            format: *requested,
            produced: 0,
            limit: self.frame_limit,
            next_due: Instant::now(),
        }))
    }
}

struct SyntheticReader {
    format: CaptureFormat,
    produced: u64,
    limit: Option<u64>,
    next_due: Instant,
}

impl FrameReader for SyntheticReader {
    fn format(&self) -> CaptureFormat {
        self.format
    }

    fn read_frame(&mut self) -> CaptureResult<RawFrame> {
        if self.limit.is_some_and(|limit| self.produced >= limit) {
            return Err(CaptureError::EndOfStream(
                "synthetic frame limit reached".to_string(),
            ));
        }

        let now = Instant::now();
        if self.next_due > now {
            std::thread::sleep(self.next_due - now);
        }
        self.next_due = Instant::now() + self.format.frame_interval();

        let CaptureFormat { width, height, .. } = self.format;
        let shift = (self.produced % 256) as u32;
        let mut data = Vec::with_capacity(self.format.frame_len());
        for y in 0..height {
            for x in 0..width {
                data.push(((x + shift) % 256) as u8);
                data.push(((y + shift) % 256) as u8);
                data.push(shift as u8);
            }
        }
        self.produced += 1;

        Ok(RawFrame { width, height, data })
    }
}
