use std::path::PathBuf;
use std::time::Duration;

use derivative::Derivative;
use log::debug;
use serde::{Deserialize, Serialize};

use super::types::{BridgeResult, EngineOption, TransportKind, ENGINE_STOP_TIMEOUT};

/// Per-session configuration
///
/// Accepted as camelCase JSON by the foreign-call boundary; every field is
/// optional there and falls back to the defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Derivative)]
#[serde(rename_all = "camelCase", default)]
#[derivative(Default)]
pub struct SessionConfig {
    /// `Threads` option sent before anything else; 0 leaves the engine default
    pub threads: u32,
    pub hash_mb: Option<u32>,
    /// Extra `setoption` lines, in order
    pub options: Vec<EngineOption>,
    pub transport: TransportKind,
    /// Engine binary for the process backend; located automatically when unset
    pub engine_path: Option<PathBuf>,
    pub engine_args: Vec<String>,
    /// Grace period for a child process after `quit`. `null` waits forever.
    #[derivative(Default(value = "Some(ENGINE_STOP_TIMEOUT.as_millis() as u64)"))]
    pub stop_timeout_ms: Option<u64>,
    /// Host application data directory, probed for `engines/<abi>/stockfish`
    pub base_dir: Option<PathBuf>,
    /// Host application native library directory, probed for `libstockfish.so`
    pub native_lib_dir: Option<PathBuf>,
}

impl SessionConfig {
    /// Parse a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Config` when the document is not valid JSON or
    /// a field has the wrong type.
    pub fn from_json(json: &str) -> BridgeResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        debug!("Parsed session config: {:?}", config);
        Ok(config)
    }

    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_engine_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.engine_path = Some(path.into());
        self
    }

    pub fn stop_timeout(&self) -> Option<Duration> {
        self.stop_timeout_ms.map(Duration::from_millis)
    }

    /// Commands queued at construction so they are the first lines the
    /// engine reads: Threads, then Hash, then the extra options.
    pub fn pending_commands(&self) -> Vec<String> {
        let mut commands = Vec::with_capacity(self.options.len() + 2);
        if self.threads > 0 {
            commands.push(setoption("Threads", &self.threads.to_string()));
        }
        if let Some(hash) = self.hash_mb {
            commands.push(setoption("Hash", &hash.to_string()));
        }
        commands.extend(
            self.options
                .iter()
                .map(|option| setoption(&option.name, &option.value)),
        );
        commands
    }
}

fn setoption(name: &str, value: &str) -> String {
    format!("setoption name {} value {}\n", name, value)
}

/// Thread count suggestion based on the host's available parallelism
pub fn recommended_threads() -> u32 {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4) as u32;
    let recommended = cores.clamp(1, 16);
    debug!("Recommended threads: {} (detected cores: {})", recommended, cores);
    recommended
}
