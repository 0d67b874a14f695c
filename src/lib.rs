//! Blocking line-channel bridge for UCI chess engines.
//!
//! [`EngineSession`] drives one engine through two line queues. The engine is
//! either linked into the process ([`EngineLoop`], registered once with
//! [`register_engine`]) or spawned as a child process. [`ffi`] exposes the
//! same operations as C entry points over opaque handles.

pub mod engine;
pub mod ffi;

use std::io::Write;

use once_cell::sync::OnceCell;

pub use engine::{
    register_engine, uci_handshake, AsyncEngineSession, BridgeError, BridgeResult, EngineIdentity,
    EngineLocator, EngineLog, EngineLoop, EngineSession, SessionConfig, SessionState,
    TransportKind,
};

static LOGGER: OnceCell<()> = OnceCell::new();

/// Install `env_logger` on stderr, honouring `RUST_LOG` (default `info`).
///
/// Idempotent. A logger installed by the host application is left alone.
pub fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(
            env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
        );
        builder
            .format(|buf, record| {
                writeln!(buf, "[{}] {}: {}", record.level(), record.target(), record.args())
            })
            .write_style(env_logger::WriteStyle::Never)
            .target(env_logger::Target::Stderr);
        if builder.try_init().is_err() {
            log::debug!("Logger already installed, keeping it");
        }
    });
}
