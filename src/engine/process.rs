use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use super::queue::LineQueue;
use super::stream::QueueWriter;
use super::transport::{Transport, WorkerChannels};
use super::types::{
    deadline_after, remaining_until, BridgeError, BridgeResult, ENGINE_EXIT_POLL_INTERVAL,
    ENGINE_STOP_TIMEOUT, INPUT_WAIT_SLICE, READER_POLL_INTERVAL, READ_BUFFER_SIZE,
};

#[cfg(target_os = "windows")]
use super::types::CREATE_NO_WINDOW;

/// Child-process backend
///
/// The engine binary gets a piped stdin and a single pipe carrying both its
/// stdout and stderr. Two threads serve each started process:
/// - the worker pumps the session's input queue into the child's stdin and,
///   once the queue is stopped, closes stdin, reaps the child and joins the reader
/// - the reader polls the (non-blocking) output pipe and splits it into lines
#[derive(Debug, Clone)]
pub struct ProcessTransport {
    path: PathBuf,
    args: Vec<String>,
    label: String,
    stop_timeout: Option<Duration>,
}

impl ProcessTransport {
    pub fn new(path: PathBuf, args: Vec<String>) -> Self {
        let label = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("engine")
            .to_string();
        Self {
            path,
            args,
            label,
            stop_timeout: Some(ENGINE_STOP_TIMEOUT),
        }
    }

    /// How long shutdown waits for the child before killing it.
    /// `None` waits without bound.
    pub fn with_stop_timeout(mut self, stop_timeout: Option<Duration>) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stop_timeout(&self) -> Option<Duration> {
        self.stop_timeout
    }

    fn spawn_engine_process(&self) -> BridgeResult<(Child, pipe::OutputPipe)> {
        debug!("Spawning engine process: {:?} {:?}", self.path, self.args);

        let mut command = Command::new(&self.path);
        command.args(&self.args);
        // Only absolute paths: a relative program path would be resolved after the chdir
        if self.path.is_absolute() {
            if let Some(parent) = self.path.parent() {
                command.current_dir(parent);
            }
        }
        command
            .stdin(Stdio::piped())
            .env("TERM", "dumb"); // Prevent terminal feature usage

        let (output, stdout, stderr) = pipe::merged_output_pipe().map_err(BridgeError::Pipe)?;
        command.stdout(stdout).stderr(stderr);

        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        let spawned = command.spawn();
        // Drops the parent's copies of the output pipe write ends
        drop(command);

        let child = spawned.map_err(|e| {
            error!("Failed to spawn engine process {:?}: {}", self.path, e);
            BridgeError::Spawn {
                path: self.path.display().to_string(),
                source: e,
            }
        })?;
        info!("Engine process spawned: {:?} (pid {})", self.path, child.id());

        Ok((child, output))
    }
}

impl Transport for ProcessTransport {
    fn name(&self) -> &str {
        &self.label
    }

    fn launch(&self, channels: WorkerChannels) -> BridgeResult<JoinHandle<()>> {
        let (mut child, output) = self.spawn_engine_process()?;
        let stdin = match child.stdin.take() {
            Some(stdin) => stdin,
            None => {
                error!("Failed to get stdin handle from engine process");
                let _ = child.kill();
                let _ = child.wait();
                return Err(BridgeError::NoStdin);
            }
        };

        let mut worker = ProcessWorker {
            child,
            stdin: Some(stdin),
            reader: None,
            child_gone: Arc::new(AtomicBool::new(false)),
            stop_timeout: self.stop_timeout,
            label: self.label.clone(),
        };

        let reader_channels = channels.clone();
        let child_gone = worker.child_gone.clone();
        let label = self.label.clone();
        // On failure `worker` is dropped, which closes stdin and reaps the child
        let reader = thread::Builder::new()
            .name("uci-engine-reader".to_string())
            .spawn(move || read_engine_output(output, reader_channels, child_gone, label))
            .map_err(BridgeError::ThreadSpawn)?;
        worker.reader = Some(reader);

        thread::Builder::new()
            .name("uci-engine-writer".to_string())
            .spawn(move || worker.run(&channels.input))
            .map_err(BridgeError::ThreadSpawn)
    }
}

/// Owns the child process, its stdin and the reader thread.
struct ProcessWorker {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: Option<JoinHandle<()>>,
    child_gone: Arc<AtomicBool>,
    stop_timeout: Option<Duration>,
    label: String,
}

impl ProcessWorker {
    fn run(mut self, input: &LineQueue) {
        #[cfg(unix)]
        let _sigpipe = sigpipe::SigpipeBlock::new()
            .map_err(|e| warn!("Failed to block SIGPIPE for {}: {}", self.label, e))
            .ok();

        debug!("Input pump started for {}", self.label);
        self.pump_input(input);
        self.shutdown();
    }

    fn pump_input(&mut self, input: &LineQueue) {
        loop {
            let line = match input.pop_blocking(INPUT_WAIT_SLICE) {
                Some(line) => line,
                None if input.is_stopped() => break,
                None => continue,
            };
            let Some(stdin) = self.stdin.as_mut() else {
                break;
            };
            if let Err(e) = write_command(stdin, &line) {
                // the engine is gone; whatever is left in the queue is dropped at stop()
                warn!("Failed to send command '{}' to {}: {}", line.trim_end(), self.label, e);
                break;
            }
        }
    }

    fn shutdown(&mut self) {
        // EOF on stdin also ends engines that ignore `quit`
        drop(self.stdin.take());
        self.wait_for_exit();
        self.child_gone.store(true, Ordering::Release);

        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                error!("Output reader for {} panicked", self.label);
            }
        }
        debug!("Engine process resources released: {}", self.label);
    }

    fn wait_for_exit(&mut self) {
        let Some(timeout) = self.stop_timeout else {
            match self.child.wait() {
                Ok(status) => info!("Engine {} exited: {}", self.label, status),
                Err(e) => warn!("Error waiting for engine {}: {}", self.label, e),
            }
            return;
        };

        let deadline = deadline_after(timeout);
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    info!("Engine {} exited: {}", self.label, status);
                    return;
                }
                Ok(None) if !remaining_until(deadline).is_zero() => {
                    thread::sleep(ENGINE_EXIT_POLL_INTERVAL)
                }
                Ok(None) => {
                    warn!("Engine {} did not exit within {:?}, killing it", self.label, timeout);
                    self.kill();
                    return;
                }
                Err(e) => {
                    warn!("Error checking engine {} status: {}, killing it", self.label, e);
                    self.kill();
                    return;
                }
            }
        }
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            warn!("Failed to kill engine {}: {}", self.label, e);
        }
        match self.child.wait() {
            Ok(status) => debug!("Engine {} reaped after kill: {}", self.label, status),
            Err(e) => warn!("Error waiting for killed engine {}: {}", self.label, e),
        }
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        if self.stdin.is_some() || self.reader.is_some() {
            self.shutdown();
        }
    }
}

fn write_command(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    debug!("Sending UCI command: {}", line.trim_end());
    stdin.write_all(line.as_bytes())?;
    if !line.ends_with('\n') {
        stdin.write_all(b"\n")?;
    }
    stdin.flush()
}

/// Reader loop: bytes from the engine become lines in the output queue.
/// Exits on EOF, on a read error, or once the child has been reaped.
fn read_engine_output(
    mut source: pipe::OutputPipe,
    channels: WorkerChannels,
    child_gone: Arc<AtomicBool>,
    label: String,
) {
    debug!("Output reader started for {}", label);
    let mut writer = QueueWriter::new(channels.output.clone());
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        match source.read(&mut buf) {
            Ok(0) => {
                debug!("Engine {} closed its output", label);
                break;
            }
            Ok(n) => {
                let _ = writer.write_all(&buf[..n]);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                // a grandchild may still hold the pipe open after the engine is reaped
                if child_gone.load(Ordering::Acquire) {
                    break;
                }
                thread::sleep(READER_POLL_INTERVAL);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Error reading from engine {}: {}", label, e);
                break;
            }
        }
    }

    writer.finish();
    channels.mark_exited();
    info!("Engine output finished: {}", label);
}

#[cfg(unix)]
mod pipe {
    use std::fs::File;
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
    use std::process::Stdio;

    pub(super) type OutputPipe = File;

    /// One pipe for the child's stdout and stderr.
    /// Returns the non-blocking read end plus two `Stdio` write ends.
    pub(super) fn merged_output_pipe() -> io::Result<(OutputPipe, Stdio, Stdio)> {
        let mut fds: [libc::c_int; 2] = [-1; 2];

        #[cfg(any(target_os = "linux", target_os = "android"))]
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };

        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        let read_end = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        let write_end = unsafe { OwnedFd::from_raw_fd(fds[1]) };

        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            set_cloexec(read_end.as_raw_fd())?;
            set_cloexec(write_end.as_raw_fd())?;
        }
        set_nonblocking(read_end.as_raw_fd())?;

        let stderr_end = write_end.try_clone()?;
        Ok((
            File::from(read_end),
            Stdio::from(write_end),
            Stdio::from(stderr_end),
        ))
    }

    fn set_nonblocking(fd: RawFd) -> io::Result<()> {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn set_cloexec(fd: RawFd) -> io::Result<()> {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        let rc = unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(not(unix))]
mod pipe {
    use std::io;
    use std::process::Stdio;

    /// Blocking here; the reader ends on EOF once every writer is gone.
    pub(super) type OutputPipe = io::PipeReader;

    /// One anonymous pipe for the child's stdout and stderr.
    pub(super) fn merged_output_pipe() -> io::Result<(OutputPipe, Stdio, Stdio)> {
        let (read_end, write_end) = io::pipe()?;
        let stderr_end = write_end.try_clone()?;
        Ok((read_end, Stdio::from(write_end), Stdio::from(stderr_end)))
    }
}

/// SIGPIPE handling for the writer thread.
///
/// A write to a dead engine's stdin raises SIGPIPE, which terminates a host
/// that left the default disposition in place. The writer blocks it for its
/// own thread, so such writes fail with `EPIPE` instead.
#[cfg(unix)]
mod sigpipe {
    use std::io;
    use std::mem::MaybeUninit;

    fn sigpipe_set() -> libc::sigset_t {
        let mut set = MaybeUninit::<libc::sigset_t>::uninit();
        unsafe {
            libc::sigemptyset(set.as_mut_ptr());
            libc::sigaddset(set.as_mut_ptr(), libc::SIGPIPE);
            set.assume_init()
        }
    }

    /// Block SIGPIPE for the calling thread. Dropping the guard consumes a
    /// SIGPIPE left pending by a failed write.
    pub(super) struct SigpipeBlock(());

    impl SigpipeBlock {
        pub(super) fn new() -> io::Result<Self> {
            let set = sigpipe_set();
            let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
            if rc != 0 {
                return Err(io::Error::from_raw_os_error(rc));
            }
            Ok(Self(()))
        }
    }

    impl Drop for SigpipeBlock {
        fn drop(&mut self) {
            let mut pending = MaybeUninit::<libc::sigset_t>::uninit();
            let has_pending = unsafe {
                libc::sigemptyset(pending.as_mut_ptr());
                libc::sigpending(pending.as_mut_ptr()) == 0
                    && libc::sigismember(pending.as_ptr(), libc::SIGPIPE) == 1
            };
            if has_pending {
                let set = sigpipe_set();
                let mut signal: libc::c_int = 0;
                // returns at once, the signal is already pending
                unsafe { libc::sigwait(&set, &mut signal) };
            }
        }
    }
}
