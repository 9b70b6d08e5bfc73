//! Capture device arbiter
//!
//! Owns the one physical camera. A dedicated capture thread holds the device
//! handle and fans every frame out over a broadcast channel; a [`Lease`] is a
//! subscription to that channel. The thread is started by the first acquire
//! and stopped when the last lease of its generation is dropped.
//!
//! Two policies are supported:
//! - [`DevicePolicy::Shared`] lets any number of leases read the same frames,
//!   so a live preview and several recordings run side by side.
//! - [`DevicePolicy::Exclusive`] allows one lease at a time and rejects the
//!   rest with [`CaptureError::DeviceBusy`].
//!
//! The device is never opened twice: a new capture thread is only started
//! after every previous one has reported its device handle closed.

use super::traits::{CameraBackend, CaptureError, CaptureFormat, CaptureResult, Frame};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot, watch};

/// How concurrent consumers share the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DevicePolicy {
    /// One capture loop, frames fanned out to every lease holder
    #[default]
    Shared,
    /// One lease at a time; others fail fast with `DeviceBusy`
    Exclusive,
}

/// Arbiter settings
#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    pub policy: DevicePolicy,
    /// Format requested when the device is opened
    pub format: CaptureFormat,
    /// Frames buffered per subscriber before slow readers start skipping
    pub buffer: usize,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            policy: DevicePolicy::Shared,
            format: CaptureFormat::default(),
            buffer: 4,
        }
    }
}

/// A running capture thread as seen by the arbiter
struct CaptureLoop {
    generation: u64,
    format: CaptureFormat,
    /// Never read; only used to mint new subscriptions
    frames: broadcast::Receiver<Frame>,
    stop: Arc<AtomicBool>,
    closed: watch::Receiver<bool>,
    leases: usize,
}

impl CaptureLoop {
    fn has_exited(&self) -> bool {
        *self.closed.borrow()
    }
}

#[derive(Default)]
struct DeviceState {
    capture: Option<CaptureLoop>,
    /// Close signals of every loop that may still hold the device
    loops: Vec<watch::Receiver<bool>>,
    generation: u64,
}

struct Inner {
    backend: Arc<dyn CameraBackend>,
    config: ArbiterConfig,
    state: Mutex<DeviceState>,
    /// Serialises device start-up so two acquirers never open it concurrently
    startup: tokio::sync::Mutex<()>,
}

impl Inner {
    /// Attach to the running loop, if there is a live one
    fn try_attach(self: &Arc<Self>) -> CaptureResult<Option<Lease>> {
        let mut state = self.state.lock();

        if state.capture.as_ref().is_some_and(CaptureLoop::has_exited) {
            if let Some(dead) = state.capture.take() {
                tracing::warn!(
                    "Capture loop {} exited with {} lease(s) attached; it will be restarted",
                    dead.generation,
                    dead.leases
                );
            }
        }

        let Some(capture) = state.capture.as_mut() else {
            return Ok(None);
        };

        if self.config.policy == DevicePolicy::Exclusive && capture.leases > 0 {
            return Err(CaptureError::DeviceBusy);
        }

        capture.leases += 1;
        tracing::debug!(
            "Lease attached to capture loop {} ({} active)",
            capture.generation,
            capture.leases
        );

        Ok(Some(Lease {
            inner: Arc::clone(self),
            generation: capture.generation,
            format: capture.format,
            frames: capture.frames.resubscribe(),
        }))
    }

    fn release(&self, generation: u64) {
        let mut state = self.state.lock();

        let Some(capture) = state.capture.as_mut() else {
            return;
        };
        if capture.generation != generation {
            // Lease outlived its capture loop
            return;
        }

        capture.leases = capture.leases.saturating_sub(1);
        tracing::debug!(
            "Lease released from capture loop {} ({} active)",
            generation,
            capture.leases
        );

        if capture.leases == 0 {
            if let Some(idle) = state.capture.take() {
                idle.stop.store(true, Ordering::SeqCst);
                tracing::info!("Last lease released; stopping capture loop {}", generation);
            }
        }
    }

    /// Wait until no previous capture thread holds the device
    async fn wait_for_device_release(&self) {
        let pending = {
            let mut state = self.state.lock();
            state.loops.retain(|closed| !*closed.borrow());
            state.loops.clone()
        };

        for mut closed in pending {
            // An error means the thread is gone, which is just as good
            let _ = closed.wait_for(|closed| *closed).await;
        }
    }

    async fn start_capture(self: &Arc<Self>) -> CaptureResult<Lease> {
        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.generation
        };

        let (frames_tx, frames_rx) = broadcast::channel(self.config.buffer.max(1));
        let (opened_tx, opened_rx) = oneshot::channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let stop = Arc::new(AtomicBool::new(false));

        // Tracked before the thread exists so a cancelled acquire cannot lose it
        self.state.lock().loops.push(closed_rx.clone());
        // Stops the thread if this future is dropped before the loop is registered
        let mut orphan_guard = StopOnDrop::new(Arc::clone(&stop), generation);

        let backend = Arc::clone(&self.backend);
        let requested = self.config.format;
        let thread_stop = Arc::clone(&stop);
        std::thread::Builder::new()
            .name(format!("capture-{generation}"))
            .spawn(move || {
                run_capture_loop(
                    backend,
                    requested,
                    generation,
                    frames_tx,
                    thread_stop,
                    opened_tx,
                    closed_tx,
                )
            })
            .map_err(|e| {
                CaptureError::DeviceInitFailed(format!("failed to spawn capture thread: {e}"))
            })?;

        let format = opened_rx.await.map_err(|_| {
            CaptureError::DeviceInitFailed("capture thread exited before opening".to_string())
        })??;

        let lease_frames = frames_rx.resubscribe();
        orphan_guard.disarm();
        self.state.lock().capture = Some(CaptureLoop {
            generation,
            format,
            frames: frames_rx,
            stop,
            closed: closed_rx,
            leases: 1,
        });

        Ok(Lease {
            inner: Arc::clone(self),
            generation,
            format,
            frames: lease_frames,
        })
    }
}

/// Sets a capture loop's stop flag unless disarmed
struct StopOnDrop {
    stop: Arc<AtomicBool>,
    generation: u64,
    armed: bool,
}

impl StopOnDrop {
    fn new(stop: Arc<AtomicBool>, generation: u64) -> Self {
        Self {
            stop,
            generation,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.stop.store(true, Ordering::SeqCst);
            tracing::debug!(
                "Acquire abandoned during start-up; stopping capture loop {}",
                self.generation
            );
        }
    }
}

/// Grants leases on the shared camera
#[derive(Clone)]
pub struct CaptureArbiter {
    inner: Arc<Inner>,
}

impl CaptureArbiter {
    pub fn new(backend: Arc<dyn CameraBackend>, config: ArbiterConfig) -> Self {
        tracing::info!(
            "Capture arbiter for {} ({:?} policy, {}x{} @ {}fps)",
            backend.name(),
            config.policy,
            config.format.width,
            config.format.height,
            config.format.fps
        );
        Self {
            inner: Arc::new(Inner {
                backend,
                config,
                state: Mutex::new(DeviceState::default()),
                startup: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn policy(&self) -> DevicePolicy {
        self.inner.config.policy
    }

    /// Acquire a lease, opening the device if nobody is capturing.
    ///
    /// Never waits longer than `timeout`.
    pub async fn acquire(&self, timeout: Duration) -> CaptureResult<Lease> {
        let started = Instant::now();
        let result = tokio::time::timeout(timeout, self.acquire_inner()).await;

        match result {
            Ok(lease) => lease,
            Err(_) => {
                tracing::warn!("Camera acquire timed out after {:?}", started.elapsed());
                Err(CaptureError::AcquireTimeout(timeout.as_millis() as u64))
            }
        }
    }

    async fn acquire_inner(&self) -> CaptureResult<Lease> {
        if let Some(lease) = self.inner.try_attach()? {
            return Ok(lease);
        }

        let _startup = self.inner.startup.lock().await;

        // Someone may have started the device while we waited
        if let Some(lease) = self.inner.try_attach()? {
            return Ok(lease);
        }

        self.inner.wait_for_device_release().await;
        self.inner.start_capture().await
    }

    /// Leases attached to the running capture loop
    pub fn active_leases(&self) -> usize {
        self.inner
            .state
            .lock()
            .capture
            .as_ref()
            .filter(|c| !c.has_exited())
            .map(|c| c.leases)
            .unwrap_or(0)
    }

    /// Whether a capture loop is currently running
    pub fn is_capturing(&self) -> bool {
        self.inner
            .state
            .lock()
            .capture
            .as_ref()
            .is_some_and(|c| !c.has_exited())
    }
}

/// The right to read frames from the camera.
///
/// Released on drop, on every exit path of its holder.
pub struct Lease {
    inner: Arc<Inner>,
    generation: u64,
    format: CaptureFormat,
    frames: broadcast::Receiver<Frame>,
}

impl Lease {
    /// Format the device is actually delivering
    pub fn format(&self) -> CaptureFormat {
        self.format
    }

    pub(super) fn frames(&mut self) -> &mut broadcast::Receiver<Frame> {
        &mut self.frames
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("generation", &self.generation)
            .field("format", &self.format)
            .finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.inner.release(self.generation);
    }
}

fn run_capture_loop(
    backend: Arc<dyn CameraBackend>,
    requested: CaptureFormat,
    generation: u64,
    frames: broadcast::Sender<Frame>,
    stop: Arc<AtomicBool>,
    opened: oneshot::Sender<CaptureResult<CaptureFormat>>,
    closed: watch::Sender<bool>,
) {
    let mut reader = match backend.open(&requested) {
        Ok(reader) => reader,
        Err(e) => {
            tracing::error!("Failed to open {}: {}", backend.name(), e);
            let _ = opened.send(Err(e));
            closed.send_replace(true);
            return;
        }
    };

    let format = reader.format();
    if opened.send(Ok(format)).is_err() {
        tracing::info!("Acquirer gave up before {} opened; closing it", backend.name());
        drop(reader);
        closed.send_replace(true);
        return;
    }

    tracing::info!("Capture loop {} started on {}", generation, backend.name());

    let capture_start = Instant::now();
    let mut sequence: u64 = 0;

    while !stop.load(Ordering::SeqCst) {
        match reader.read_frame() {
            Ok(raw) => {
                let frame = Frame {
                    sequence,
                    width: raw.width,
                    height: raw.height,
                    data: Bytes::from(raw.data),
                };
                sequence += 1;
                // No receivers is fine; the loop stops once the flag is set
                let _ = frames.send(frame);
            }
            Err(e) => {
                tracing::warn!("Capture loop {} ending: {}", generation, e);
                break;
            }
        }
    }

    drop(reader);

    let elapsed = capture_start.elapsed().as_secs_f64();
    tracing::info!(
        "Capture loop {} stopped: {} frames in {:.2}s ({:.1} fps actual)",
        generation,
        sequence,
        elapsed,
        if elapsed > 0.0 { sequence as f64 / elapsed } else { 0.0 }
    );

    closed.send_replace(true);
    // `frames` drops here, which ends every subscriber's stream
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::SyntheticBackend;
    use crate::capture::FrameSource;

    fn config(policy: DevicePolicy) -> ArbiterConfig {
        ArbiterConfig {
            policy,
            format: CaptureFormat::new(16, 8, 100),
            buffer: 4,
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_shared_leases_use_one_device() {
        let backend = SyntheticBackend::new();
        let arbiter = CaptureArbiter::new(Arc::new(backend.clone()), config(DevicePolicy::Shared));

        let first = arbiter.acquire(TIMEOUT).await.unwrap();
        let second = arbiter.acquire(TIMEOUT).await.unwrap();
        assert_eq!(backend.open_count(), 1);
        assert_eq!(arbiter.active_leases(), 2);

        let mut a = FrameSource::new(first);
        let mut b = FrameSource::new(second);
        let fa = a.next_frame().await.unwrap();
        let fb = b.next_frame().await.unwrap();
        assert_eq!(fa.width, 16);
        assert_eq!(fb.height, 8);
    }

    #[tokio::test]
    async fn test_exclusive_rejects_second_lease() {
        let arbiter = CaptureArbiter::new(
            Arc::new(SyntheticBackend::new()),
            config(DevicePolicy::Exclusive),
        );

        let lease = arbiter.acquire(TIMEOUT).await.unwrap();
        let err = arbiter.acquire(TIMEOUT).await.unwrap_err();
        assert_eq!(err, CaptureError::DeviceBusy);

        drop(lease);
        let again = arbiter.acquire(TIMEOUT).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_last_release_stops_device() {
        let backend = SyntheticBackend::new();
        let arbiter = CaptureArbiter::new(Arc::new(backend.clone()), config(DevicePolicy::Shared));

        let lease = arbiter.acquire(TIMEOUT).await.unwrap();
        assert!(arbiter.is_capturing());
        drop(lease);
        assert!(!arbiter.is_capturing());
        assert_eq!(arbiter.active_leases(), 0);

        let _lease = arbiter.acquire(TIMEOUT).await.unwrap();
        assert_eq!(backend.open_count(), 2);
    }

    #[tokio::test]
    async fn test_open_failure_is_reported() {
        let arbiter = CaptureArbiter::new(
            Arc::new(SyntheticBackend::new().failing()),
            config(DevicePolicy::Shared),
        );

        let err = arbiter.acquire(TIMEOUT).await.unwrap_err();
        assert!(matches!(err, CaptureError::DeviceInitFailed(_)));
        assert!(!arbiter.is_capturing());
    }

    #[tokio::test]
    async fn test_acquire_respects_timeout() {
        let arbiter = CaptureArbiter::new(
            Arc::new(SyntheticBackend::new().with_open_delay(Duration::from_millis(500))),
            config(DevicePolicy::Shared),
        );

        let started = Instant::now();
        let err = arbiter.acquire(Duration::from_millis(50)).await.unwrap_err();
        assert_eq!(err, CaptureError::AcquireTimeout(50));
        assert!(started.elapsed() < Duration::from_millis(400));

        // The abandoned open is waited out before the device is reopened
        let lease = arbiter.acquire(TIMEOUT).await;
        assert!(lease.is_ok());
    }

    #[tokio::test]
    async fn test_abandoned_acquire_frees_device() {
        let backend = SyntheticBackend::new().with_open_delay(Duration::from_millis(30));
        let arbiter = CaptureArbiter::new(Arc::new(backend.clone()), config(DevicePolicy::Shared));

        let mut pending = Box::pin(arbiter.acquire(TIMEOUT));
        assert!(futures::poll!(&mut pending).is_pending());
        // The device opens while nobody polls the acquirer
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(pending);
        assert_eq!(backend.open_count(), 1);
        assert_eq!(arbiter.active_leases(), 0);

        let lease = arbiter.acquire(Duration::from_millis(500)).await;
        assert!(lease.is_ok());
        assert_eq!(backend.open_count(), 2);
        assert_eq!(arbiter.active_leases(), 1);
    }

    #[tokio::test]
    async fn test_dead_loop_is_restarted() {
        let backend = SyntheticBackend::new().with_frame_limit(3);
        let arbiter =
            CaptureArbiter::new(Arc::new(backend.clone()), config(DevicePolicy::Exclusive));

        let mut source = FrameSource::new(arbiter.acquire(TIMEOUT).await.unwrap());
        let mut frames = 0;
        while source.next_frame().await.is_some() {
            frames += 1;
        }
        assert!(frames <= 3);
        assert!(!arbiter.is_capturing());

        // The stale lease is still held, but its loop is gone
        let fresh = arbiter.acquire(TIMEOUT).await;
        assert!(fresh.is_ok());
        assert_eq!(backend.open_count(), 2);
    }
}
