use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info, warn};

use super::config::SessionConfig;
use super::queue::LineQueue;
use super::transport::{self, Transport, WorkerChannels};
use super::types::{
    deadline_after, remaining_until, terminate_line, BridgeError, BridgeResult, EngineLog,
    SessionState, DRAIN_POLL_INTERVAL, DRAIN_UNTIL_SLICE, MAX_TRANSCRIPT_ENTRIES, QUIT_COMMAND,
};

/// One engine instance behind a pair of line queues
///
/// This struct handles:
/// - Worker lifecycle (start, stop, join)
/// - Newline-normalised command delivery
/// - Timeout-bounded reads of engine output
/// - A bounded transcript of both directions
///
/// Every method takes `&self`; a session can be shared across threads
/// (the foreign-call registry hands out `Arc<EngineSession>`).
pub struct EngineSession {
    config: SessionConfig,
    transport: Box<dyn Transport>,
    input: Arc<LineQueue>,
    output: Arc<LineQueue>,
    running: Arc<AtomicBool>,
    lifecycle: Mutex<Lifecycle>,
    transcript: Mutex<VecDeque<EngineLog>>,
}

struct Lifecycle {
    state: SessionState,
    worker: Option<JoinHandle<()>>,
}

impl Lifecycle {
    fn transition(&mut self, new_state: SessionState) -> BridgeResult<()> {
        let valid_transition = match (&self.state, &new_state) {
            (SessionState::Idle, SessionState::Starting) => true,
            (SessionState::Starting, SessionState::Running) => true,
            (SessionState::Starting, SessionState::Idle) => true, // Launch failed
            (SessionState::Running, SessionState::Stopping) => true,
            (SessionState::Stopping, SessionState::Stopped) => true,
            _ => false,
        };

        if !valid_transition {
            return Err(BridgeError::InvalidTransition {
                from: self.state,
                to: new_state,
            });
        }

        debug!("Session state transition: {:?} -> {:?}", self.state, new_state);
        self.state = new_state;
        Ok(())
    }
}

impl EngineSession {
    /// Create a session for the backend described by `config`.
    ///
    /// Nothing is launched yet; the configuration commands are queued so they
    /// are the first lines the engine reads after [`EngineSession::start`].
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::NoEmbeddedEngine` when the embedded backend is
    /// requested but no engine was registered.
    pub fn new(config: SessionConfig) -> BridgeResult<Self> {
        let transport = transport::from_config(&config)?;
        Ok(Self::with_transport(config, transport))
    }

    /// Create a session over an explicit backend.
    pub fn with_transport(config: SessionConfig, transport: Box<dyn Transport>) -> Self {
        let session = Self {
            transport,
            input: Arc::new(LineQueue::new()),
            output: Arc::new(LineQueue::new()),
            running: Arc::new(AtomicBool::new(false)),
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Idle,
                worker: None,
            }),
            transcript: Mutex::new(VecDeque::new()),
            config,
        };

        for command in session.config.pending_commands() {
            session.record(EngineLog::Gui(command.trim_end().to_string()));
            session.input.push(command);
        }
        info!(
            "Engine session created: {} ({} pending commands)",
            session.transport.name(),
            session.input.len()
        );
        session
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn engine_name(&self) -> &str {
        self.transport.name()
    }

    pub fn state(&self) -> SessionState {
        self.lock_lifecycle().state
    }

    /// True while the worker is executing. Goes false on `stop()` and when
    /// the engine exits, crashes or closes its output on its own.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Launch the worker.
    ///
    /// A no-op while already running. Launch failures leave the session
    /// `Idle` with its pending commands intact, so `start` can be retried.
    ///
    /// # Errors
    ///
    /// - `BridgeError::SessionClosed` once the session has been stopped
    /// - any spawn or pipe error from the backend
    pub fn start(&self) -> BridgeResult<()> {
        let mut lifecycle = self.lock_lifecycle();
        match lifecycle.state {
            SessionState::Running | SessionState::Starting => {
                if !self.is_running() {
                    warn!("Engine {} has already exited; stop this session and create a new one", self.engine_name());
                }
                return Ok(());
            }
            SessionState::Stopping | SessionState::Stopped => return Err(BridgeError::SessionClosed),
            SessionState::Idle => {}
        }

        lifecycle.transition(SessionState::Starting)?;
        info!("Starting engine: {}", self.engine_name());

        // Set before launch: a worker that dies immediately must leave it false
        self.running.store(true, Ordering::Release);
        let channels = WorkerChannels {
            input: self.input.clone(),
            output: self.output.clone(),
            running: self.running.clone(),
        };

        match self.transport.launch(channels) {
            Ok(worker) => {
                lifecycle.worker = Some(worker);
                lifecycle.transition(SessionState::Running)?;
                info!("Engine started: {}", self.engine_name());
                Ok(())
            }
            Err(e) => {
                error!("Failed to start engine {}: {}", self.engine_name(), e);
                self.running.store(false, Ordering::Release);
                lifecycle.transition(SessionState::Idle)?;
                Err(e)
            }
        }
    }

    /// Queue a command for the engine. Never blocks.
    ///
    /// Appends `\n` when missing. Dropped when the engine is not running.
    pub fn send(&self, line: &str) {
        if !self.is_running() {
            warn!("Engine not running, dropping command: {}", line.trim_end());
            return;
        }
        let line = terminate_line(line.to_string());
        debug!("GUI: {}", line.trim_end());
        self.record(EngineLog::Gui(line.trim_end().to_string()));
        self.input.push(line);
    }

    /// Next engine output line, waiting at most `timeout`.
    ///
    /// `None` on timeout, or immediately once the engine has exited and its
    /// remaining output has been read. A zero timeout polls once.
    pub fn receive(&self, timeout: Duration) -> Option<String> {
        let line = self.output.pop_blocking(timeout)?;
        debug!("Engine: {}", line);
        self.record(EngineLog::Engine(line.clone()));
        Some(line)
    }

    /// Discard engine output until `timeout` passes or the engine goes quiet
    /// for [`DRAIN_POLL_INTERVAL`]. Returns the number of discarded lines.
    pub fn drain(&self, timeout: Duration) -> usize {
        let deadline = deadline_after(timeout);
        let queued = self.output.len();
        let mut discarded = 0;

        loop {
            let remaining = remaining_until(deadline);
            if remaining.is_zero() && discarded >= queued {
                break;
            }
            match self.output.pop_blocking(remaining.min(DRAIN_POLL_INTERVAL)) {
                Some(line) => {
                    self.record(EngineLog::Engine(line));
                    discarded += 1;
                }
                None => break,
            }
        }

        debug!("Drained {} lines from {}", discarded, self.engine_name());
        discarded
    }

    /// Discard engine output up to and including the first line containing
    /// `token`. Returns whether it was seen before `timeout`.
    pub fn drain_until(&self, token: &str, timeout: Duration) -> bool {
        self.wait_for(token, timeout).is_some()
    }

    /// Like [`EngineSession::drain_until`], but hands back the matching line.
    ///
    /// An empty token never matches. Returns early once the engine has exited
    /// and its output is exhausted.
    pub fn wait_for(&self, token: &str, timeout: Duration) -> Option<String> {
        let deadline = deadline_after(timeout);
        let queued = self.output.len();
        let mut consumed = 0;

        loop {
            let remaining = remaining_until(deadline);
            if remaining.is_zero() && consumed >= queued {
                break;
            }
            match self.output.pop_blocking(remaining.min(DRAIN_UNTIL_SLICE)) {
                Some(line) => {
                    consumed += 1;
                    self.record(EngineLog::Engine(line.clone()));
                    if !token.is_empty() && line.contains(token) {
                        debug!("Found '{}' after {} lines", token, consumed);
                        return Some(line);
                    }
                }
                None if self.output.is_exhausted() => {
                    debug!("Engine output ended while waiting for '{}'", token);
                    return None;
                }
                None => {}
            }
        }

        debug!("Timed out waiting for '{}' after {} lines", token, consumed);
        None
    }

    /// Shut the engine down and join the worker.
    ///
    /// Sends `quit`, closes the input stream, waits for the worker (the
    /// process backend kills a child that ignores `quit` for longer than the
    /// configured stop timeout), then discards whatever is left in both
    /// queues. Idempotent; a no-op unless the session is running.
    pub fn stop(&self) {
        let mut lifecycle = self.lock_lifecycle();
        if lifecycle.state != SessionState::Running {
            debug!("Stop ignored in state {:?}", lifecycle.state);
            return;
        }
        if let Err(e) = lifecycle.transition(SessionState::Stopping) {
            warn!("Failed to transition to stopping state: {}", e);
        }
        info!("Stopping engine: {}", self.engine_name());

        self.running.store(false, Ordering::Release);
        self.record(EngineLog::Gui(QUIT_COMMAND.to_string()));
        self.input.push(terminate_line(QUIT_COMMAND.to_string()));
        self.input.stop();

        if let Some(worker) = lifecycle.worker.take() {
            if worker.join().is_err() {
                error!("Engine worker for {} panicked", self.engine_name());
            }
        }

        self.output.stop();
        let dropped = self.input.drain() + self.output.drain();
        if dropped > 0 {
            debug!("Discarded {} queued lines at stop", dropped);
        }

        if let Err(e) = lifecycle.transition(SessionState::Stopped) {
            warn!("Failed to transition to stopped state: {}", e);
        }
        info!("Engine stopped: {}", self.engine_name());
    }

    /// Snapshot of the transcript, oldest first.
    pub fn logs(&self) -> Vec<EngineLog> {
        self.lock_transcript().iter().cloned().collect()
    }

    // =============================================================================
    // Private Implementation
    // =============================================================================

    fn record(&self, entry: EngineLog) {
        let mut transcript = self.lock_transcript();
        if transcript.len() >= MAX_TRANSCRIPT_ENTRIES {
            transcript.pop_front();
        }
        transcript.push_back(entry);
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_transcript(&self) -> MutexGuard<'_, VecDeque<EngineLog>> {
        self.transcript.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        // the worker must never outlive its session
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::embedded::tests::scripted;
    use crate::engine::embedded::EmbeddedTransport;
    use std::thread;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(5);

    fn scripted_session(config: SessionConfig) -> EngineSession {
        EngineSession::with_transport(config, Box::new(EmbeddedTransport::new(scripted())))
    }

    fn started() -> EngineSession {
        let session = scripted_session(SessionConfig::default());
        session.start().unwrap();
        session
    }

    struct FailingTransport;

    impl Transport for FailingTransport {
        fn name(&self) -> &str {
            "failing"
        }

        fn launch(&self, _channels: WorkerChannels) -> BridgeResult<JoinHandle<()>> {
            Err(BridgeError::NoEmbeddedEngine)
        }
    }

    fn wait_until_exited(session: &EngineSession) {
        let deadline = Instant::now() + WAIT;
        while session.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_uci_handshake_end_to_end() {
        let session = scripted_session(SessionConfig::default().with_threads(2));
        assert_eq!(session.state(), SessionState::Idle);
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert!(session.is_running());

        session.send("uci");
        let mut lines = Vec::new();
        while let Some(line) = session.receive(WAIT) {
            let done = line == "uciok";
            lines.push(line);
            if done {
                break;
            }
        }
        // the Threads option is the very first thing the engine reads
        assert_eq!(lines[0], "echo [setoption name Threads value 2] 31");
        assert_eq!(lines.last().map(String::as_str), Some("uciok"));

        session.send("quit");
        let start = Instant::now();
        session.stop();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!session.is_running());
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[test]
    fn test_output_order_matches_send_order() {
        let session = started();
        for i in 0..50 {
            session.send(&format!("cmd{i}"));
        }
        for i in 0..50 {
            let expected = format!("echo [cmd{i}] {}", format!("cmd{i}").len() + 1);
            assert_eq!(session.receive(WAIT), Some(expected));
        }
    }

    #[test]
    fn test_receive_respects_timeout() {
        let session = started();
        let start = Instant::now();
        assert_eq!(session.receive(Duration::from_millis(100)), None);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(1000));

        let start = Instant::now();
        assert_eq!(session.receive(Duration::ZERO), None);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_newline_normalisation() {
        let session = started();
        session.send("ping");
        session.send("ping\n");
        assert_eq!(session.receive(WAIT), Some("echo [ping] 5".to_string()));
        assert_eq!(session.receive(WAIT), Some("echo [ping] 5".to_string()));
        assert_eq!(session.receive(Duration::from_millis(100)), None);
    }

    #[test]
    fn test_stop_is_idempotent_and_final() {
        let session = started();
        session.stop();
        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(!session.is_running());
        assert!(matches!(session.start(), Err(BridgeError::SessionClosed)));
    }

    #[test]
    fn test_send_after_stop_is_dropped() {
        let session = started();
        session.stop();
        session.send("isready");
        assert_eq!(session.input.len(), 0);
        assert_eq!(session.receive(Duration::from_millis(100)), None);
    }

    #[test]
    fn test_drain_until_consumes_through_token() {
        let session = started();
        session.send("isready");
        session.send("go depth 1");
        // readyok, info, bestmove
        assert!(session.drain_until("bestmove", WAIT));
        assert_eq!(session.receive(Duration::from_millis(100)), None);
    }

    #[test]
    fn test_wait_for_returns_matching_line() {
        let session = started();
        session.send("go movetime 10");
        assert_eq!(session.wait_for("bestmove", WAIT), Some("bestmove e2e4".to_string()));
    }

    #[test]
    fn test_empty_token_never_matches() {
        let session = started();
        session.send("isready");
        let start = Instant::now();
        assert!(!session.drain_until("", Duration::from_millis(200)));
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn test_drain_discards_output() {
        let session = started();
        session.send("uci");
        assert!(session.wait_for("id name", WAIT).is_some());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(session.drain(Duration::ZERO), 3);
        assert_eq!(session.receive(Duration::from_millis(50)), None);
    }

    #[test]
    fn test_worker_exit_is_observed() {
        let session = started();
        session.send("panic");
        wait_until_exited(&session);
        assert!(!session.is_running());

        let start = Instant::now();
        assert_eq!(session.receive(Duration::from_secs(10)), None);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(!session.drain_until("bestmove", Duration::from_secs(10)));

        // start on a crashed session is a no-op, stop still cleans up
        session.start().unwrap();
        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[test]
    fn test_unbounded_waits_end_when_engine_exits() {
        let session = started();
        session.send("isready");
        assert_eq!(session.wait_for("readyok", Duration::MAX), Some("readyok".to_string()));

        session.send("go depth 1");
        session.send("panic");
        assert!(session.drain_until("bestmove", Duration::MAX));
        wait_until_exited(&session);
        assert!(!session.drain_until("bestmove", Duration::MAX));
        assert_eq!(session.drain(Duration::MAX), 0);
        session.stop();
    }

    #[test]
    fn test_sessions_are_isolated() {
        let a = started();
        let b = started();
        a.send("alpha");
        b.send("beta");
        assert_eq!(a.receive(WAIT), Some("echo [alpha] 6".to_string()));
        assert_eq!(b.receive(WAIT), Some("echo [beta] 5".to_string()));
        a.stop();
        assert!(b.is_running());
        b.send("isready");
        assert_eq!(b.receive(WAIT), Some("readyok".to_string()));
    }

    #[test]
    fn test_start_failure_is_retry_safe() {
        let session = EngineSession::with_transport(
            SessionConfig::default().with_threads(4),
            Box::new(FailingTransport),
        );
        assert!(session.start().is_err());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.is_running());
        assert_eq!(session.input.len(), 1);
        assert!(session.start().is_err());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_start_twice_is_noop() {
        let session = started();
        session.start().unwrap();
        session.send("isready");
        assert_eq!(session.receive(WAIT), Some("readyok".to_string()));
    }

    #[test]
    fn test_transcript_records_both_directions() {
        let session = started();
        session.send("isready");
        assert_eq!(session.receive(WAIT), Some("readyok".to_string()));
        assert_eq!(
            session.logs(),
            vec![
                EngineLog::Gui("isready".to_string()),
                EngineLog::Engine("readyok".to_string()),
            ]
        );
    }

    #[test]
    fn test_transcript_is_bounded() {
        let session = scripted_session(SessionConfig::default());
        for i in 0..MAX_TRANSCRIPT_ENTRIES + 10 {
            session.record(EngineLog::Engine(i.to_string()));
        }
        let logs = session.logs();
        assert_eq!(logs.len(), MAX_TRANSCRIPT_ENTRIES);
        assert_eq!(logs[0], EngineLog::Engine("10".to_string()));
    }

    #[test]
    fn test_idle_session_stop_and_drop() {
        let session = scripted_session(SessionConfig::default());
        session.stop();
        assert_eq!(session.state(), SessionState::Idle);
        drop(session);

        let running = started();
        drop(running);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_session_round_trip() {
        use crate::engine::process::tests::{script_transport, SHELL_ENGINE};

        let dir = tempfile::tempdir().unwrap();
        let session = EngineSession::with_transport(
            SessionConfig::default(),
            Box::new(script_transport(&dir, SHELL_ENGINE)),
        );
        session.start().unwrap();
        session.send("uci");
        assert_eq!(session.wait_for("id name", WAIT), Some("id name ShellFish".to_string()));
        assert!(session.drain_until("uciok", WAIT));
        session.send("isready");
        assert_eq!(session.receive(WAIT), Some("readyok".to_string()));

        let start = Instant::now();
        session.stop();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!session.is_running());
    }
}
