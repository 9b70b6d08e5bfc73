//! Session registry
//!
//! Per-client recording history and pending notification. The map is
//! guarded by a read-write lock and every session by its own mutex, so
//! unrelated clients never contend and each operation is atomic for the
//! session it touches.

use super::notification::Notification;
use crate::storage::ClipReference;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// State kept for one client
#[derive(Debug, Default)]
pub struct ClientSession {
    /// Finished clips, oldest first, in completion order
    recordings: Vec<ClipReference>,
    pending: Option<Notification>,
}

/// Shared handle to one client's session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    client_id: Arc<str>,
    session: Arc<Mutex<ClientSession>>,
    history_limit: Option<usize>,
}

impl SessionHandle {
    pub fn append_recording(&self, clip: ClipReference) {
        let mut session = self.session.lock();
        push_bounded(&mut session.recordings, clip, self.history_limit);
    }

    /// Replaces any notification the client has not collected yet
    pub fn set_notification(&self, notification: Notification) {
        let replaced = self.session.lock().pending.replace(notification);
        if replaced.is_some() {
            tracing::debug!(
                "Client {} had an uncollected notification; replaced",
                self.client_id
            );
        }
    }

    /// Read and clear the pending notification
    pub fn take_notification(&self) -> Option<Notification> {
        self.session.lock().pending.take()
    }

    /// Record a finished clip and announce it in one step
    pub fn complete(&self, clip: ClipReference) {
        let mut session = self.session.lock();
        push_bounded(&mut session.recordings, clip.clone(), self.history_limit);
        session.pending = Some(Notification::Done(clip));
    }

    pub fn recordings(&self) -> Vec<ClipReference> {
        self.session.lock().recordings.clone()
    }
}

fn push_bounded(recordings: &mut Vec<ClipReference>, clip: ClipReference, limit: Option<usize>) {
    recordings.push(clip);
    if let Some(limit) = limit {
        if recordings.len() > limit {
            let excess = recordings.len() - limit;
            recordings.drain(..excess);
        }
    }
}

/// All client sessions of one server instance
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    /// Maximum history entries kept per client; `None` keeps everything
    history_limit: Option<usize>,
}

impl SessionRegistry {
    pub fn new(history_limit: Option<usize>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            history_limit,
        }
    }

    /// Look up a session, creating it on first use
    pub fn get_or_create(&self, client_id: &str) -> SessionHandle {
        if let Some(handle) = self.sessions.read().get(client_id) {
            return handle.clone();
        }

        let mut sessions = self.sessions.write();
        sessions
            .entry(client_id.to_string())
            .or_insert_with(|| {
                tracing::debug!("New session for client {}", client_id);
                SessionHandle {
                    client_id: Arc::from(client_id),
                    session: Arc::new(Mutex::new(ClientSession::default())),
                    history_limit: self.history_limit,
                }
            })
            .clone()
    }

    /// Look up a session without creating it
    pub fn get(&self, client_id: &str) -> Option<SessionHandle> {
        self.sessions.read().get(client_id).cloned()
    }

    pub fn append_recording(&self, client_id: &str, clip: ClipReference) {
        self.get_or_create(client_id).append_recording(clip);
    }

    pub fn set_notification(&self, client_id: &str, notification: Notification) {
        self.get_or_create(client_id).set_notification(notification);
    }

    /// Unknown clients simply have nothing pending
    pub fn take_notification(&self, client_id: &str) -> Option<Notification> {
        self.get(client_id)?.take_notification()
    }

    pub fn complete(&self, client_id: &str, clip: ClipReference) {
        self.get_or_create(client_id).complete(clip);
    }

    /// Unknown clients have an empty history
    pub fn list_recordings(&self, client_id: &str) -> Vec<ClipReference> {
        self.get(client_id)
            .map(|handle| handle.recordings())
            .unwrap_or_default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn clip(n: usize) -> ClipReference {
        ClipReference::new(format!("folder{n}"), format!("{n}.mp4"))
    }

    #[test]
    fn test_unknown_client_is_empty_and_not_created() {
        let registry = SessionRegistry::default();
        assert!(registry.take_notification("ghost").is_none());
        assert!(registry.list_recordings("ghost").is_empty());
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn test_notification_is_taken_once() {
        let registry = SessionRegistry::default();
        registry.complete("alice", clip(1));

        assert_eq!(registry.take_notification("alice"), Some(Notification::Done(clip(1))));
        assert!(registry.take_notification("alice").is_none());
        assert_eq!(registry.list_recordings("alice"), vec![clip(1)]);
    }

    #[test]
    fn test_recordings_keep_completion_order() {
        let registry = SessionRegistry::default();
        for n in 0..5 {
            registry.complete("bob", clip(n));
        }
        let listed = registry.list_recordings("bob");
        assert_eq!(listed, (0..5).map(clip).collect::<Vec<_>>());
    }

    #[test]
    fn test_history_limit_drops_oldest() {
        let registry = SessionRegistry::new(Some(2));
        for n in 0..4 {
            registry.append_recording("carol", clip(n));
        }
        assert_eq!(registry.list_recordings("carol"), vec![clip(2), clip(3)]);
    }

    #[test]
    fn test_get_or_create_returns_same_session() {
        let registry = SessionRegistry::default();
        let a = registry.get_or_create("dave");
        let b = registry.get_or_create("dave");
        a.append_recording(clip(7));
        assert_eq!(b.recordings(), vec![clip(7)]);
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn test_concurrent_set_and_take_delivers_exactly_once() {
        let registry = Arc::new(SessionRegistry::default());
        registry.get_or_create("eve");
        let observed = Arc::new(AtomicUsize::new(0));

        let setter = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                registry.set_notification("eve", Notification::Done(clip(1)))
            })
        };

        let takers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let observed = Arc::clone(&observed);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        if registry.take_notification("eve").is_some() {
                            observed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        setter.join().unwrap();
        for taker in takers {
            taker.join().unwrap();
        }
        // Whatever the interleaving, the clip is seen once in total
        if registry.take_notification("eve").is_some() {
            observed.fetch_add(1, Ordering::SeqCst);
        }
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_clients_do_not_interfere() {
        let registry = Arc::new(SessionRegistry::default());
        let workers: Vec<_> = (0..4)
            .map(|c| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let id = format!("client{c}");
                    for n in 0..50 {
                        registry.complete(&id, clip(n));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(registry.session_count(), 4);
        for c in 0..4 {
            assert_eq!(registry.list_recordings(&format!("client{c}")).len(), 50);
        }
    }
}
