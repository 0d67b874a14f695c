//! In-process backend: runs a linked engine loop on a worker thread.

use std::io::{self, BufRead, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{error, info};
use once_cell::sync::OnceCell;

use super::stream::{QueueReader, QueueWriter};
use super::transport::{Transport, WorkerChannels};
use super::types::{BridgeError, BridgeResult};

/// A line-protocol engine that can be driven through any reader/writer pair.
///
/// `run` should return once it reads `quit` or hits end-of-input.
pub trait EngineLoop: Send + Sync {
    fn name(&self) -> &str;

    /// Process-wide setup. Runs once, before the first session starts the loop.
    fn initialize(&self) {}

    fn run(&self, input: &mut dyn BufRead, output: &mut dyn Write) -> io::Result<()>;
}

/// An engine loop plus its one-time initialisation guard.
pub struct EmbeddedEngine {
    engine: Arc<dyn EngineLoop>,
    initialized: OnceCell<()>,
}

impl EmbeddedEngine {
    pub fn new(engine: Arc<dyn EngineLoop>) -> Self {
        Self {
            engine,
            initialized: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.engine.name()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.get().is_some()
    }

    fn ensure_initialized(&self) {
        self.initialized.get_or_init(|| {
            info!("Initializing embedded engine: {}", self.engine.name());
            self.engine.initialize();
        });
    }
}

static REGISTERED_ENGINE: OnceCell<Arc<EmbeddedEngine>> = OnceCell::new();

/// Register the engine linked into this binary. Only the first call wins.
pub fn register_engine(engine: Arc<dyn EngineLoop>) -> bool {
    let name = engine.name().to_string();
    let accepted = REGISTERED_ENGINE
        .set(Arc::new(EmbeddedEngine::new(engine)))
        .is_ok();
    if accepted {
        info!("Registered embedded engine: {}", name);
    } else {
        error!("Embedded engine already registered, ignoring {}", name);
    }
    accepted
}

pub fn registered_engine() -> Option<Arc<EmbeddedEngine>> {
    REGISTERED_ENGINE.get().cloned()
}

pub struct EmbeddedTransport {
    engine: Arc<EmbeddedEngine>,
}

impl EmbeddedTransport {
    pub fn new(engine: Arc<EmbeddedEngine>) -> Self {
        Self { engine }
    }
}

impl Transport for EmbeddedTransport {
    fn name(&self) -> &str {
        self.engine.name()
    }

    fn launch(&self, channels: WorkerChannels) -> BridgeResult<JoinHandle<()>> {
        let engine = self.engine.clone();
        thread::Builder::new()
            .name("uci-engine".to_string())
            .spawn(move || run_engine_loop(&engine, channels))
            .map_err(BridgeError::ThreadSpawn)
    }
}

/// Worker body. Errors and panics inside the loop end here; the session only
/// sees `running` go false and the output stream end.
fn run_engine_loop(engine: &EmbeddedEngine, channels: WorkerChannels) {
    info!("Engine loop started: {}", engine.name());
    let mut reader = QueueReader::new(channels.input.clone());
    let mut writer = QueueWriter::new(channels.output.clone());

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        engine.ensure_initialized();
        engine.engine.run(&mut reader, &mut writer)
    }));
    writer.finish();

    match result {
        Ok(Ok(())) => info!("Engine loop finished: {}", engine.name()),
        Ok(Err(e)) => error!("Engine loop {} failed: {}", engine.name(), e),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Engine loop {} panicked: {}", engine.name(), message);
        }
    }
    channels.mark_exited();
}
