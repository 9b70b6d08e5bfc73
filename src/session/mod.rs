//! Client sessions and recording notifications

pub mod notification;
pub mod registry;

pub use notification::{check_notification, Notification, NotificationStatus};
pub use registry::{ClientSession, SessionHandle, SessionRegistry};
