//! Camera capture
//!
//! The arbiter owns the physical device; frame sources read from it through
//! leases. Backends exist for a real webcam and for a synthetic test pattern.

pub mod arbiter;
pub mod source;
pub mod synthetic;
pub mod traits;
pub mod webcam;

pub use arbiter::{ArbiterConfig, CaptureArbiter, DevicePolicy, Lease};
pub use source::FrameSource;
pub use synthetic::SyntheticBackend;
pub use traits::{
    CameraBackend, CaptureError, CaptureFormat, CaptureResult, Frame, FrameReader, RawFrame,
};
pub use webcam::{list_cameras, CameraInfo, WebcamBackend};
