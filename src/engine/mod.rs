// =============================================================================
// UCI Engine Bridge Module
// =============================================================================
//
// This module turns a line-oriented chess engine into a pair of blocking line
// queues, so a caller can drive it with plain `send` / `receive` calls and a
// timeout, whether the engine is linked into the process or runs as a child.
//
// ## Architecture Overview
//
// ```
// ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
// │    Manager      │    │     Session     │    │   Handshake     │
// │ (Handle table)  │────│ (State machine) │────│ (uci/isready)   │
// └─────────────────┘    └─────────────────┘    └─────────────────┘
//                                 │
//                        ┌─────────────────┐
//                        │   Line Queues   │  input ──► worker ──► output
//                        └─────────────────┘
//                                 │
//          ┌──────────────────────┴──────────────────────┐
// ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
// │    Embedded     │    │     Stream      │    │    Process      │
// │ (Worker thread) │────│ (Read / Write)  │────│ (Child + pipe)  │
// └─────────────────┘    └─────────────────┘    └─────────────────┘
// ```
//
// ## Module Responsibilities
//
// - **types**: Shared constants, error types and enums
// - **queue**: Blocking FIFO of lines with timeout-bounded pops
// - **stream**: `BufRead` / `Write` facades over a queue
// - **transport**: Backend trait and backend selection
// - **embedded**: In-process engine loop on a worker thread
// - **process**: Child-process engine with merged stdout/stderr
// - **locate**: Engine binary discovery
// - **config**: Per-session configuration
// - **session**: The session state machine
// - **handshake**: UCI handshake helper
// - **manager**: Handle registry used by the C entry points
// - **async_session**: Tokio facade
//
// ## Usage Examples
//
// ```rust
// use engine::{EngineSession, SessionConfig};
//
// let session = EngineSession::new(SessionConfig::default().with_threads(2))?;
// session.start()?;
// session.send("uci");
// let found = session.drain_until("uciok", Duration::from_secs(5));
// session.stop();
// ```

pub mod types;
pub mod queue;
pub mod stream;
pub mod transport;
pub mod embedded;
pub mod process;
pub mod locate;
pub mod config;
pub mod session;
pub mod handshake;
pub mod manager;
pub mod async_session;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use types::{
    // Error handling
    BridgeError, BridgeResult,

    // States and kinds
    SessionState, TransportKind,

    // Configuration and transcript
    EngineOption, EngineLog,

    // Constants
    ENGINE_INIT_TIMEOUT, ENGINE_STOP_TIMEOUT, MAX_TRANSCRIPT_ENTRIES, QUIT_COMMAND,
};

pub use queue::LineQueue;
pub use stream::{QueueReader, QueueWriter};
pub use transport::{Transport, WorkerChannels};
pub use embedded::{register_engine, registered_engine, EmbeddedEngine, EmbeddedTransport, EngineLoop};
pub use process::ProcessTransport;
pub use locate::EngineLocator;
pub use config::{recommended_threads, SessionConfig};
pub use session::EngineSession;
pub use handshake::{uci_handshake, EngineIdentity};
pub use manager::{SessionHandle, SessionManager};
pub use async_session::AsyncEngineSession;
