//! Thread-safe line channel shared between the caller and the engine worker.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Unbounded FIFO of protocol lines with blocking, timeout-bounded pops.
///
/// A single mutex guards both the lines and the `stopped` flag; the condition
/// variable is signalled on every push and on `stop()`.
#[derive(Debug, Default)]
pub struct LineQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
}

#[derive(Debug, Default)]
struct QueueInner {
    lines: VecDeque<String>,
    stopped: bool,
}

impl LineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a line and wake one waiter. Accepted even after `stop()`.
    pub fn push(&self, line: impl Into<String>) {
        self.lock().lines.push_back(line.into());
        self.available.notify_one();
    }

    /// Pop the head, waiting up to `timeout` for one to arrive.
    ///
    /// A zero timeout polls once without waiting. Returns `None` on timeout,
    /// or immediately when the queue is stopped and empty.
    pub fn pop_blocking(&self, timeout: Duration) -> Option<String> {
        let guard = self.lock();
        let (mut guard, _) = self
            .available
            .wait_timeout_while(guard, timeout, |inner| {
                inner.lines.is_empty() && !inner.stopped
            })
            .unwrap_or_else(PoisonError::into_inner);
        guard.lines.pop_front()
    }

    /// Pop the head without waiting.
    pub fn try_pop(&self) -> Option<String> {
        self.lock().lines.pop_front()
    }

    /// Mark the queue stopped and wake every waiter.
    pub fn stop(&self) {
        self.lock().stopped = true;
        self.available.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Discard every queued line, leaving the `stopped` flag untouched.
    /// Returns how many lines were dropped.
    pub fn drain(&self) -> usize {
        let mut guard = self.lock();
        let dropped = guard.lines.len();
        guard.lines.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().lines.is_empty()
    }

    /// True once the queue is stopped and nothing is left to read.
    pub fn is_exhausted(&self) -> bool {
        let guard = self.lock();
        guard.stopped && guard.lines.is_empty()
    }
}
