use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

// =============================================================================
// Constants
// =============================================================================

/// Timeout for the UCI handshake (`uci` → `uciok`, `isready` → `readyok`)
pub const ENGINE_INIT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `stop()` waits for a child process to honour `quit` before killing it
pub const ENGINE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval while waiting for a child process to exit
pub const ENGINE_EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Slice used by the engine-side input reader while waiting for commands.
/// The reader loops on it, so this only bounds a single wait, not the total.
pub const INPUT_WAIT_SLICE: Duration = Duration::from_secs(24 * 60 * 60);

/// Sleep between empty reads of the non-blocking output pipe
pub const READER_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// `drain()` stops once no line arrives within this interval
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Per-pop wait used by `drain_until()` / `wait_for()`
pub const DRAIN_UNTIL_SLICE: Duration = Duration::from_millis(100);

/// Maximum number of transcript entries kept per session
pub const MAX_TRANSCRIPT_ENTRIES: usize = 1000;

/// Read buffer size for the engine output pipe
pub const READ_BUFFER_SIZE: usize = 4096;

/// The only lifecycle command injected by the bridge
pub const QUIT_COMMAND: &str = "quit";

// =============================================================================
// Error Types
// =============================================================================

/// Error type for bridge operations
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to spawn engine process {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn worker thread: {0}")]
    ThreadSpawn(std::io::Error),

    #[error("Pipe setup failed: {0}")]
    Pipe(std::io::Error),

    #[error("No stdin handle available")]
    NoStdin,

    #[error("No embedded engine registered")]
    NoEmbeddedEngine,

    #[error("Engine is not running")]
    NotRunning,

    #[error("Session has been stopped and cannot be restarted")]
    SessionClosed,

    #[error("Invalid state transition: from {from:?} to {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("Engine did not answer within the timeout")]
    Timeout,

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Join(String),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

// =============================================================================
// Core Types
// =============================================================================

/// Lifecycle states of an engine session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Queues allocated, no worker yet
    Idle,
    /// Worker is being launched
    Starting,
    /// Worker launched (it may since have exited on its own, see `is_running`)
    Running,
    /// `stop()` in progress
    Stopping,
    /// Terminal; a new session is needed to run the engine again
    Stopped,
}

/// Which backend runs the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransportKind {
    /// Engine loop linked into this process, driven on a worker thread
    Embedded,
    /// Engine binary spawned as a child process
    #[default]
    Process,
}

/// Individual engine UCI option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOption {
    pub name: String,
    pub value: String,
}

/// Transcript entry for debugging and monitoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum EngineLog {
    Gui(String),
    Engine(String),
}

// =============================================================================
// Platform-specific Constants
// =============================================================================

#[cfg(target_os = "windows")]
pub const CREATE_NO_WINDOW: u32 = 0x08000000;

// =============================================================================
// Helper Functions
// =============================================================================

/// Append a newline unless the command already ends with one
pub fn terminate_line(mut line: String) -> String {
    if !line.ends_with('\n') {
        line.push('\n');
    }
    line
}

/// Clamp a millisecond timeout coming from a foreign caller.
/// Negative values are treated as zero ("poll once").
pub fn timeout_from_millis(timeout_ms: i64) -> Duration {
    Duration::from_millis(timeout_ms.max(0) as u64)
}

/// Deadline `timeout` from now. `None` when it lies beyond what `Instant`
/// can represent, i.e. no deadline at all.
pub fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Time left until `deadline`; unbounded when there is none.
pub fn remaining_until(deadline: Option<Instant>) -> Duration {
    match deadline {
        Some(deadline) => deadline.saturating_duration_since(Instant::now()),
        None => Duration::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminate_line() {
        assert_eq!(terminate_line("go".to_string()), "go\n");
        assert_eq!(terminate_line("go\n".to_string()), "go\n");
        assert_eq!(terminate_line(String::new()), "\n");
    }

    #[test]
    fn test_timeout_from_millis_clamps_negative() {
        assert_eq!(timeout_from_millis(-5), Duration::ZERO);
        assert_eq!(timeout_from_millis(0), Duration::ZERO);
        assert_eq!(timeout_from_millis(250), Duration::from_millis(250));
    }

    #[test]
    fn test_deadline_after_huge_timeout_is_unbounded() {
        assert_eq!(deadline_after(Duration::MAX), None);
        assert_eq!(remaining_until(None), Duration::MAX);

        let deadline = deadline_after(Duration::from_millis(50));
        assert!(deadline.is_some());
        assert!(remaining_until(deadline) <= Duration::from_millis(50));
        assert_eq!(remaining_until(deadline_after(Duration::ZERO)), Duration::ZERO);
    }

    #[test]
    fn test_engine_log_serialization() {
        let json = serde_json::to_string(&EngineLog::Gui("uci".to_string())).unwrap();
        assert_eq!(json, r#"{"type":"gui","value":"uci"}"#);
    }
}
