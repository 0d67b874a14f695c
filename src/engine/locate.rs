//! Engine binary discovery for the process backend.

use std::path::{Path, PathBuf};

use log::{debug, warn};

/// adb-pushed binary used for quick on-device checks
pub const DEVICE_TMP_ENGINE: &str = "/data/local/tmp/stockfish";

/// Last resort: let the OS search `PATH`
pub const FALLBACK_ENGINE: &str = "stockfish";

const ENV_ENGINE_VARS: [&str; 2] = ["STOCKFISH_BIN", "STOCKFISH_PATH"];

/// Probes the usual install locations for an engine binary
///
/// Order: custom path, device tmp dir, `<base_dir>/engines/<abi>/stockfish`,
/// `<native_lib_dir>/libstockfish.so`, then the environment variables.
/// Resolution never fails; spawning reports a missing binary instead.
#[derive(Debug, Clone)]
pub struct EngineLocator {
    custom_path: Option<PathBuf>,
    device_tmp: PathBuf,
    base_dir: Option<PathBuf>,
    native_lib_dir: Option<PathBuf>,
    env_paths: Vec<PathBuf>,
    abi: &'static str,
}

impl Default for EngineLocator {
    fn default() -> Self {
        Self {
            custom_path: None,
            device_tmp: PathBuf::from(DEVICE_TMP_ENGINE),
            base_dir: None,
            native_lib_dir: None,
            env_paths: Vec::new(),
            abi: android_abi(),
        }
    }
}

impl EngineLocator {
    /// A locator without any environment lookups.
    pub fn new() -> Self {
        Self::default()
    }

    /// A locator that also considers `STOCKFISH_BIN` and `STOCKFISH_PATH`.
    pub fn from_env() -> Self {
        let env_paths = ENV_ENGINE_VARS
            .iter()
            .filter_map(|var| std::env::var_os(var))
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .collect();
        Self {
            env_paths,
            ..Self::default()
        }
    }

    pub fn with_custom_path(mut self, path: Option<PathBuf>) -> Self {
        self.custom_path = path.filter(|p| !p.as_os_str().is_empty());
        self
    }

    pub fn with_base_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.base_dir = dir;
        self
    }

    pub fn with_native_lib_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.native_lib_dir = dir;
        self
    }

    pub fn with_device_tmp(mut self, path: PathBuf) -> Self {
        self.device_tmp = path;
        self
    }

    pub fn with_env_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.env_paths = paths;
        self
    }

    /// Candidate locations in probe order
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        candidates.extend(self.custom_path.clone());
        candidates.push(self.device_tmp.clone());
        if let Some(base) = &self.base_dir {
            candidates.push(base.join("engines").join(self.abi).join("stockfish"));
        }
        if let Some(lib_dir) = &self.native_lib_dir {
            candidates.push(lib_dir.join("libstockfish.so"));
        }
        candidates.extend(self.env_paths.iter().cloned());
        candidates
    }

    /// First candidate that is an executable file. Otherwise the custom path as given, or
    /// [`FALLBACK_ENGINE`] when there is none.
    pub fn resolve(&self) -> PathBuf {
        let mut tried = Vec::new();
        for candidate in self.candidates() {
            if is_executable(&candidate) {
                debug!("Using engine binary: {:?}", candidate);
                return candidate;
            }
            tried.push(candidate);
        }

        // a custom path may still be a bare command name for the PATH search
        let fallback = self
            .custom_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(FALLBACK_ENGINE));
        warn!("Engine not found in common locations, falling back to {:?} on PATH", fallback);
        warn!("Tried: {}", display_paths(&tried));
        fallback
    }
}

/// A regular file with at least one execute bit set
#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Android ABI directory name for the running architecture
fn android_abi() -> &'static str {
    match std::env::consts::ARCH {
        "aarch64" => "arm64-v8a",
        "arm" => "armeabi-v7a",
        "x86_64" => "x86_64",
        "x86" => "x86",
        _ => "arm64-v8a",
    }
}
