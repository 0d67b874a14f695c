//! Tokio facade over [`EngineSession`].
//!
//! Blocking session calls run on the blocking thread pool so async callers
//! never park a runtime worker on a queue wait or a worker join.

use std::sync::Arc;
use std::time::Duration;

use tokio::task;

use super::handshake::{uci_handshake, EngineIdentity};
use super::session::EngineSession;
use super::types::{BridgeError, BridgeResult, EngineLog, SessionState};

#[derive(Clone)]
pub struct AsyncEngineSession {
    inner: Arc<EngineSession>,
}

impl AsyncEngineSession {
    pub fn new(session: EngineSession) -> Self {
        Self {
            inner: Arc::new(session),
        }
    }

    pub fn from_shared(session: Arc<EngineSession>) -> Self {
        Self { inner: session }
    }

    pub fn session(&self) -> &Arc<EngineSession> {
        &self.inner
    }

    async fn blocking<T, F>(&self, f: F) -> BridgeResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&EngineSession) -> T + Send + 'static,
    {
        let session = self.inner.clone();
        task::spawn_blocking(move || f(&session))
            .await
            .map_err(|e| BridgeError::Join(e.to_string()))
    }

    pub async fn start(&self) -> BridgeResult<()> {
        self.blocking(|session| session.start()).await?
    }

    /// Never blocks, so it stays synchronous.
    pub fn send(&self, line: &str) {
        self.inner.send(line);
    }

    pub async fn receive(&self, timeout: Duration) -> BridgeResult<Option<String>> {
        self.blocking(move |session| session.receive(timeout)).await
    }

    pub async fn drain(&self, timeout: Duration) -> BridgeResult<usize> {
        self.blocking(move |session| session.drain(timeout)).await
    }

    pub async fn drain_until(&self, token: impl Into<String>, timeout: Duration) -> BridgeResult<bool> {
        let token = token.into();
        self.blocking(move |session| session.drain_until(&token, timeout)).await
    }

    pub async fn wait_for(
        &self,
        token: impl Into<String>,
        timeout: Duration,
    ) -> BridgeResult<Option<String>> {
        let token = token.into();
        self.blocking(move |session| session.wait_for(&token, timeout)).await
    }

    pub async fn handshake(&self, timeout: Duration) -> BridgeResult<EngineIdentity> {
        self.blocking(move |session| uci_handshake(session, timeout)).await?
    }

    pub async fn stop(&self) -> BridgeResult<()> {
        self.blocking(|session| session.stop()).await
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn logs(&self) -> Vec<EngineLog> {
        self.inner.logs()
    }
}
