//! C entry points.
//!
//! Every function takes the opaque handle returned by `uci_bridge_init*`.
//! A zero or unknown handle turns the call into a no-op returning the safe
//! default (`0`, `false` or null). No panic crosses this boundary.

use std::ffi::{c_char, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::ptr;

use log::{error, warn};

use crate::engine::manager::{SessionHandle, SESSIONS};
use crate::engine::session::EngineSession;
use crate::engine::transport::select_kind;
use crate::engine::types::timeout_from_millis;
use crate::engine::SessionConfig;

/// Run `f`, turning a panic into `default`.
fn guarded<T>(entry: &str, default: T, f: impl FnOnce() -> T) -> T {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        error!("Panic caught in {}", entry);
        default
    })
}

/// Run `f` against the session behind `handle`, or return `default`.
fn with_session<T>(
    entry: &str,
    handle: SessionHandle,
    default: T,
    f: impl FnOnce(&EngineSession) -> T,
) -> T {
    if handle == 0 {
        return default;
    }
    guarded(entry, None, || SESSIONS.get(handle).map(|session| f(&session))).unwrap_or(default)
}

/// # Safety
///
/// `ptr` must be null or a valid NUL-terminated string.
unsafe fn string_arg(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

fn register(config: SessionConfig) -> SessionHandle {
    match SESSIONS.create(config) {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to create engine session: {}", e);
            0
        }
    }
}

/// Create a session. Does not start the engine.
///
/// `engine_path` may be null or empty to locate the binary automatically.
/// A positive `threads` queues `setoption name Threads value N`.
/// Returns `0` on failure.
///
/// # Safety
///
/// `engine_path` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn uci_bridge_init(
    engine_path: *const c_char,
    prefer_builtin: bool,
    threads: i32,
) -> u64 {
    let engine_path = string_arg(engine_path)
        .filter(|path| !path.is_empty())
        .map(PathBuf::from);
    guarded("uci_bridge_init", 0, || {
        let config = SessionConfig {
            threads: threads.max(0) as u32,
            transport: select_kind(prefer_builtin),
            engine_path,
            ..SessionConfig::default()
        };
        register(config)
    })
}

/// Create a session from a JSON `SessionConfig`. Returns `0` on failure.
///
/// # Safety
///
/// `config_json` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn uci_bridge_init_with_config(config_json: *const c_char) -> u64 {
    let Some(json) = string_arg(config_json) else {
        warn!("uci_bridge_init_with_config called with a null config");
        return 0;
    };
    guarded("uci_bridge_init_with_config", 0, || {
        match SessionConfig::from_json(&json) {
            Ok(config) => register(config),
            Err(e) => {
                error!("Rejected session config: {}", e);
                0
            }
        }
    })
}

/// Launch the engine. `true` when it is running afterwards.
#[no_mangle]
pub extern "C" fn uci_bridge_start(handle: u64) -> bool {
    with_session("uci_bridge_start", handle, false, |session| {
        match session.start() {
            Ok(()) => session.is_running(),
            Err(e) => {
                error!("Failed to start session {}: {}", handle, e);
                false
            }
        }
    })
}

/// Queue a command line. Dropped when the engine is not running.
///
/// # Safety
///
/// `line` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn uci_bridge_write_line(handle: u64, line: *const c_char) {
    let Some(line) = string_arg(line) else {
        return;
    };
    with_session("uci_bridge_write_line", handle, (), |session| session.send(&line));
}

/// Next output line, or null on timeout. Negative timeouts poll once.
/// The caller owns the result and frees it with [`uci_bridge_free_string`].
#[no_mangle]
pub extern "C" fn uci_bridge_read_line(handle: u64, timeout_ms: i64) -> *mut c_char {
    let line = with_session("uci_bridge_read_line", handle, None, |session| {
        session.receive(timeout_from_millis(timeout_ms))
    });
    match line {
        // interior NULs cannot cross as a C string
        Some(line) => match CString::new(line.replace('\0', "")) {
            Ok(line) => line.into_raw(),
            Err(_) => ptr::null_mut(),
        },
        None => ptr::null_mut(),
    }
}

/// Release a string returned by [`uci_bridge_read_line`] or
/// [`uci_bridge_logs`]. Null is ignored.
///
/// # Safety
///
/// `line` must be null or a pointer obtained from one of those functions
/// that has not been freed yet.
#[no_mangle]
pub unsafe extern "C" fn uci_bridge_free_string(line: *mut c_char) {
    if !line.is_null() {
        drop(CString::from_raw(line));
    }
}

/// Discard engine output for up to `timeout_ms`.
#[no_mangle]
pub extern "C" fn uci_bridge_drain(handle: u64, timeout_ms: i64) {
    with_session("uci_bridge_drain", handle, (), |session| {
        session.drain(timeout_from_millis(timeout_ms));
    });
}

/// Discard output through the first line containing `token`.
/// A null or empty token never matches.
///
/// # Safety
///
/// `token` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn uci_bridge_drain_until(
    handle: u64,
    token: *const c_char,
    timeout_ms: i64,
) -> bool {
    let token = string_arg(token).unwrap_or_default();
    with_session("uci_bridge_drain_until", handle, false, |session| {
        session.drain_until(&token, timeout_from_millis(timeout_ms))
    })
}

/// Stop the engine and join its worker. Idempotent.
#[no_mangle]
pub extern "C" fn uci_bridge_stop(handle: u64) {
    with_session("uci_bridge_stop", handle, (), |session| session.stop());
}

/// Stop the engine if needed and invalidate the handle.
#[no_mangle]
pub extern "C" fn uci_bridge_release(handle: u64) {
    if handle == 0 {
        return;
    }
    guarded("uci_bridge_release", (), || {
        SESSIONS.release(handle);
    });
}

/// Stop and release every session. For host shutdown.
#[no_mangle]
pub extern "C" fn uci_bridge_release_all() {
    guarded("uci_bridge_release_all", (), || SESSIONS.release_all());
}

/// The session transcript as a JSON array of `{"type": "gui" | "engine",
/// "value": line}`, oldest first. Null for a zero or unknown handle.
/// Free the result with [`uci_bridge_free_string`].
#[no_mangle]
pub extern "C" fn uci_bridge_logs(handle: u64) -> *mut c_char {
    if handle == 0 {
        return ptr::null_mut();
    }
    let json = guarded("uci_bridge_logs", None, || {
        SESSIONS.get(handle)?;
        match serde_json::to_string(&SESSIONS.get_logs(handle)) {
            Ok(json) => Some(json),
            Err(e) => {
                error!("Failed to serialize transcript of session {}: {}", handle, e);
                None
            }
        }
    });
    json.and_then(|json| CString::new(json).ok())
        .map_or(ptr::null_mut(), CString::into_raw)
}

#[no_mangle]
pub extern "C" fn uci_bridge_is_running(handle: u64) -> bool {
    with_session("uci_bridge_is_running", handle, false, |session| session.is_running())
}

/// Install the `env_logger` backend. Safe to call more than once.
#[no_mangle]
pub extern "C" fn uci_bridge_init_logging() {
    guarded("uci_bridge_init_logging", (), crate::init_logging);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::embedded::tests::scripted;
    use crate::engine::embedded::EmbeddedTransport;

    fn scripted_handle() -> u64 {
        SESSIONS.insert(EngineSession::with_transport(
            SessionConfig::default().with_threads(2),
            Box::new(EmbeddedTransport::new(scripted())),
        ))
    }

    fn read(handle: u64, timeout_ms: i64) -> Option<String> {
        let ptr = uci_bridge_read_line(handle, timeout_ms);
        if ptr.is_null() {
            return None;
        }
        let line = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
        unsafe { uci_bridge_free_string(ptr) };
        Some(line)
    }

    #[test]
    fn test_invalid_handles_are_noops() {
        for handle in [0, u64::MAX] {
            assert!(!uci_bridge_start(handle));
            assert!(!uci_bridge_is_running(handle));
            assert!(read(handle, 10).is_none());
            unsafe {
                uci_bridge_write_line(handle, c"uci".as_ptr());
                assert!(!uci_bridge_drain_until(handle, c"uciok".as_ptr(), 10));
            }
            uci_bridge_drain(handle, 10);
            uci_bridge_stop(handle);
            uci_bridge_release(handle);
        }
        unsafe { uci_bridge_free_string(ptr::null_mut()) };
    }

    #[test]
    fn test_full_session_over_c_abi() {
        let handle = scripted_handle();
        assert!(!uci_bridge_is_running(handle));
        assert!(uci_bridge_start(handle));
        assert!(uci_bridge_start(handle));

        unsafe { uci_bridge_write_line(handle, c"uci".as_ptr()) };
        assert_eq!(
            read(handle, 5000).as_deref(),
            Some("echo [setoption name Threads value 2] 31")
        );
        assert!(unsafe { uci_bridge_drain_until(handle, c"uciok".as_ptr(), 5000) });
        assert!(read(handle, -1).is_none());

        unsafe { uci_bridge_write_line(handle, c"isready".as_ptr()) };
        assert_eq!(read(handle, 5000).as_deref(), Some("readyok"));

        uci_bridge_stop(handle);
        uci_bridge_stop(handle);
        assert!(!uci_bridge_is_running(handle));
        uci_bridge_release(handle);
        assert!(SESSIONS.get(handle).is_none());
    }

    #[test]
    fn test_null_token_never_matches() {
        let handle = scripted_handle();
        assert!(uci_bridge_start(handle));
        unsafe { uci_bridge_write_line(handle, c"isready".as_ptr()) };
        assert!(!unsafe { uci_bridge_drain_until(handle, ptr::null(), 100) });
        uci_bridge_release(handle);
    }

    #[test]
    fn test_transcript_over_c_abi() {
        assert!(uci_bridge_logs(0).is_null());
        assert!(uci_bridge_logs(u64::MAX).is_null());

        let handle = scripted_handle();
        assert!(uci_bridge_start(handle));
        unsafe { uci_bridge_write_line(handle, c"isready".as_ptr()) };
        assert!(read(handle, 5000).is_some());
        assert_eq!(read(handle, 5000).as_deref(), Some("readyok"));

        let ptr = uci_bridge_logs(handle);
        assert!(!ptr.is_null());
        let json = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
        unsafe { uci_bridge_free_string(ptr) };
        let logs: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            logs,
            serde_json::json!([
                {"type": "gui", "value": "setoption name Threads value 2"},
                {"type": "gui", "value": "isready"},
                {"type": "engine", "value": "echo [setoption name Threads value 2] 31"},
                {"type": "engine", "value": "readyok"},
            ])
        );
        uci_bridge_release(handle);
    }

    #[test]
    fn test_init_with_bad_json_fails() {
        assert_eq!(unsafe { uci_bridge_init_with_config(c"{not json".as_ptr()) }, 0);
        assert_eq!(unsafe { uci_bridge_init_with_config(ptr::null()) }, 0);
    }

    #[test]
    fn test_init_process_session_does_not_spawn() {
        let handle = unsafe { uci_bridge_init(c"/nonexistent/engine".as_ptr(), false, 2) };
        assert_ne!(handle, 0);
        assert!(!uci_bridge_is_running(handle));
        // the binary is missing, so start fails and the session stays usable
        assert!(!uci_bridge_start(handle));
        assert!(!uci_bridge_is_running(handle));
        uci_bridge_release(handle);
    }

    #[test]
    fn test_logging_init_is_idempotent() {
        uci_bridge_init_logging();
        uci_bridge_init_logging();
    }
}
