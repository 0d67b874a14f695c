use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info, warn};
use once_cell::sync::Lazy;

use super::config::SessionConfig;
use super::session::EngineSession;
use super::types::{BridgeResult, EngineLog};

/// Opaque session handle handed across the foreign-call boundary.
/// `0` is never issued and means "no session".
pub type SessionHandle = u64;

/// Handle registry for engine sessions
///
/// This manager provides:
/// - Handle allocation (monotonic, never reused)
/// - Lookup that tolerates stale or zero handles
/// - Cleanup on release
pub struct SessionManager {
    /// Live sessions indexed by handle
    sessions: DashMap<SessionHandle, Arc<EngineSession>>,

    /// Last issued handle
    next_handle: AtomicU64,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_handle: AtomicU64::new(0),
        }
    }

    /// Build a session and register it. Does not start the engine.
    pub fn create(&self, config: SessionConfig) -> BridgeResult<SessionHandle> {
        let session = EngineSession::new(config)?;
        Ok(self.insert(session))
    }

    pub fn insert(&self, session: EngineSession) -> SessionHandle {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        info!("Registered session {} ({})", handle, session.engine_name());
        self.sessions.insert(handle, Arc::new(session));
        handle
    }

    /// The session behind `handle`, if it is still registered.
    pub fn get(&self, handle: SessionHandle) -> Option<Arc<EngineSession>> {
        let session = self.sessions.get(&handle).map(|entry| entry.value().clone());
        if session.is_none() {
            debug!("Unknown session handle: {}", handle);
        }
        session
    }

    /// Stop the session (if needed) and forget the handle.
    pub fn release(&self, handle: SessionHandle) -> bool {
        match self.sessions.remove(&handle) {
            Some((_, session)) => {
                session.stop();
                info!("Released session {}", handle);
                true
            }
            None => {
                warn!("Release of unknown session handle: {}", handle);
                false
            }
        }
    }

    /// Stop and forget every session.
    pub fn release_all(&self) {
        let handles: Vec<SessionHandle> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for handle in handles {
            self.release(handle);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get_logs(&self, handle: SessionHandle) -> Vec<EngineLog> {
        self.get(handle).map(|session| session.logs()).unwrap_or_default()
    }
}

/// Registry backing the C entry points
pub static SESSIONS: Lazy<SessionManager> = Lazy::new(SessionManager::new);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::embedded::tests::scripted;
    use crate::engine::embedded::EmbeddedTransport;
    use crate::engine::types::SessionState;
    use std::time::Duration;

    fn scripted_session() -> EngineSession {
        EngineSession::with_transport(
            SessionConfig::default(),
            Box::new(EmbeddedTransport::new(scripted())),
        )
    }

    #[test]
    fn test_handles_are_unique_and_nonzero() {
        let manager = SessionManager::new();
        let a = manager.insert(scripted_session());
        let b = manager.insert(scripted_session());
        assert_ne!(a, 0);
        assert_ne!(a, b);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_unknown_handles_are_tolerated() {
        let manager = SessionManager::new();
        assert!(manager.get(0).is_none());
        assert!(manager.get(42).is_none());
        assert!(!manager.release(42));
        assert!(manager.get_logs(42).is_empty());
    }

    #[test]
    fn test_release_stops_running_session() {
        let manager = SessionManager::new();
        let handle = manager.insert(scripted_session());
        let session = manager.get(handle).unwrap();
        session.start().unwrap();
        session.send("isready");
        assert_eq!(session.receive(Duration::from_secs(5)), Some("readyok".to_string()));

        assert!(manager.release(handle));
        assert!(!session.is_running());
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(manager.get(handle).is_none());
        assert!(!manager.release(handle));
    }

    #[test]
    fn test_release_all() {
        let manager = SessionManager::new();
        for _ in 0..3 {
            let handle = manager.insert(scripted_session());
            manager.get(handle).unwrap().start().unwrap();
        }
        manager.release_all();
        assert!(manager.is_empty());
    }
}
