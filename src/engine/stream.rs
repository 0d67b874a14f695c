//! Byte-stream facades over [`LineQueue`].
//!
//! An engine protocol loop written against `BufRead` / `Write` can run on a
//! worker thread without knowing it is talking to queues instead of stdio.

use std::io::{self, BufRead, Read, Write};
use std::sync::Arc;

use log::trace;

use super::queue::LineQueue;
use super::types::INPUT_WAIT_SLICE;

/// Input facade: serves queued lines as a continuous byte source.
///
/// Each line is delivered with exactly one trailing `\n`. End-of-stream is
/// reported once the queue is stopped and empty.
pub struct QueueReader {
    queue: Arc<LineQueue>,
    buf: Vec<u8>,
    pos: usize,
}

impl QueueReader {
    pub fn new(queue: Arc<LineQueue>) -> Self {
        Self {
            queue,
            buf: Vec::new(),
            pos: 0,
        }
    }

    /// Block until the next line arrives. `false` means end-of-stream.
    fn refill(&mut self) -> bool {
        loop {
            match self.queue.pop_blocking(INPUT_WAIT_SLICE) {
                Some(mut line) => {
                    if !line.ends_with('\n') {
                        line.push('\n');
                    }
                    trace!("engine <- {}", line.trim_end());
                    self.buf = line.into_bytes();
                    self.pos = 0;
                    return true;
                }
                None if self.queue.is_stopped() => return false,
                None => continue,
            }
        }
    }
}

impl Read for QueueReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for QueueReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos >= self.buf.len() && !self.refill() {
            return Ok(&[]);
        }
        Ok(&self.buf[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.buf.len());
    }
}

/// Output facade: splits written bytes into lines and pushes them to a queue.
///
/// A trailing `\r` is stripped from every line. Bytes after the last newline
/// stay buffered until [`QueueWriter::finish`], which also runs on drop.
pub struct QueueWriter {
    queue: Arc<LineQueue>,
    partial: Vec<u8>,
}

impl QueueWriter {
    pub fn new(queue: Arc<LineQueue>) -> Self {
        Self {
            queue,
            partial: Vec::new(),
        }
    }

    fn emit(&mut self) {
        if self.partial.last() == Some(&b'\r') {
            self.partial.pop();
        }
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        trace!("engine -> {}", line);
        self.queue.push(line);
        self.partial.clear();
    }

    /// Push any unterminated partial line.
    pub fn finish(&mut self) {
        if !self.partial.is_empty() {
            self.emit();
        }
    }

    /// Number of bytes waiting for a newline.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }
}

impl Write for QueueWriter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        for chunk in bytes.split_inclusive(|b| *b == b'\n') {
            match chunk.split_last() {
                Some((&b'\n', body)) => {
                    self.partial.extend_from_slice(body);
                    self.emit();
                }
                _ => self.partial.extend_from_slice(chunk),
            }
        }
        Ok(bytes.len())
    }

    // Completed lines are already queued; a partial line waits for its newline.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for QueueWriter {
    fn drop(&mut self) {
        self.finish();
    }
}
