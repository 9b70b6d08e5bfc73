//! Notification protocol
//!
//! Clients poll; each poll drains the single pending slot. A finished
//! recording is therefore reported at most once, and a client that never
//! polls can still find the clip in its history.

use super::registry::SessionRegistry;
use crate::storage::ClipReference;
use serde::{Deserialize, Serialize};

/// Outcome of a recording, waiting to be collected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Done(ClipReference),
    Failed { folder: String, message: String },
}

/// Wire form of a poll result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Done { link: String },
    Error { folder: String, message: String },
}

impl From<Option<Notification>> for NotificationStatus {
    fn from(notification: Option<Notification>) -> Self {
        match notification {
            None => NotificationStatus::Pending,
            Some(Notification::Done(clip)) => NotificationStatus::Done { link: clip.link() },
            Some(Notification::Failed { folder, message }) => {
                NotificationStatus::Error { folder, message }
            }
        }
    }
}

/// Poll for `client_id`, draining whatever is pending
pub fn check_notification(registry: &SessionRegistry, client_id: &str) -> NotificationStatus {
    let status = NotificationStatus::from(registry.take_notification(client_id));
    if status != NotificationStatus::Pending {
        tracing::debug!("Delivered notification to client {}: {:?}", client_id, status);
    }
    status
}
