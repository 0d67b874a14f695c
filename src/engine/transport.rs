//! Backend abstraction shared by the embedded and child-process variants.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{info, warn};

use super::config::SessionConfig;
use super::embedded::{registered_engine, EmbeddedTransport};
use super::locate::EngineLocator;
use super::process::ProcessTransport;
use super::queue::LineQueue;
use super::types::{BridgeError, BridgeResult, TransportKind};

/// Everything a worker needs to talk to its session.
///
/// The worker is the only consumer of `input` and the only producer of
/// `output`. It must call [`WorkerChannels::mark_exited`] before returning.
#[derive(Clone)]
pub struct WorkerChannels {
    pub input: Arc<LineQueue>,
    pub output: Arc<LineQueue>,
    pub running: Arc<AtomicBool>,
}

impl WorkerChannels {
    /// Flip `running` off and end the output stream so readers stop waiting.
    pub fn mark_exited(&self) {
        self.running.store(false, Ordering::Release);
        self.output.stop();
    }
}

/// Capability interface implemented by every backend.
pub trait Transport: Send + Sync {
    /// Short label used in logs
    fn name(&self) -> &str;

    /// Launch the worker. Failures must be reported here, synchronously,
    /// without consuming anything from `channels.input`.
    fn launch(&self, channels: WorkerChannels) -> BridgeResult<JoinHandle<()>>;
}

/// Pick the backend described by `config`.
pub fn from_config(config: &SessionConfig) -> BridgeResult<Box<dyn Transport>> {
    match config.transport {
        TransportKind::Embedded => {
            let engine = registered_engine().ok_or(BridgeError::NoEmbeddedEngine)?;
            info!("Using embedded engine: {}", engine.name());
            Ok(Box::new(EmbeddedTransport::new(engine)))
        }
        TransportKind::Process => {
            let path = EngineLocator::from_env()
                .with_custom_path(config.engine_path.clone())
                .with_base_dir(config.base_dir.clone())
                .with_native_lib_dir(config.native_lib_dir.clone())
                .resolve();
            info!("Using engine process: {:?}", path);
            Ok(Box::new(ProcessTransport::new(path, config.engine_args.clone())
                .with_stop_timeout(config.stop_timeout())))
        }
    }
}

/// Resolve the FFI `prefer_builtin` hint into a transport kind.
pub fn select_kind(prefer_builtin: bool) -> TransportKind {
    if prefer_builtin {
        if registered_engine().is_some() {
            return TransportKind::Embedded;
        }
        warn!("Builtin engine requested but none is registered, falling back to a process");
    }
    TransportKind::Process
}
