//! An in-memory duplex transport. Used by the orchestrator's dry-run mode
//! and by tests: `push_inbound_line` simulates firmware output, `take_written`
//! inspects exactly what bytes the driver put on the wire.

use crate::machines::grbl::error::TransportError;
use crate::machines::grbl::transport::{ReadOutcome, Transport};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

#[derive(Default)]
struct Inner {
    inbound: VecDeque<u8>,
    written: Vec<Vec<u8>>,
    closed: bool,
}

pub struct LoopbackTransport {
    inner: Mutex<Inner>,
    cv: Condvar,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            cv: Condvar::new(),
        }
    }

    /// Feeds one line of simulated firmware output (a trailing `\n` is
    /// appended if not already present).
    pub fn push_inbound_line(&self, line: &str) {
        let mut inner = self.inner.lock();
        inner.inbound.extend(line.as_bytes());
        if !line.ends_with('\n') {
            inner.inbound.push_back(b'\n');
        }
        self.cv.notify_all();
    }

    /// Drains and returns every byte sequence written so far, in order.
    pub fn take_written(&self) -> Vec<Vec<u8>> {
        let mut inner = self.inner.lock();
        std::mem::take(&mut inner.written)
    }
}

impl Transport for LoopbackTransport {
    fn open(&self, _device: &str, _baud: u32) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        inner.closed = false;
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.cv.notify_all();
        Ok(())
    }

    fn read_line(&self) -> Result<ReadOutcome, TransportError> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(pos) = inner.inbound.iter().position(|&b| b == b'\n') {
                let line_bytes: Vec<u8> = inner.inbound.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]).into_owned();
                return Ok(ReadOutcome::Line(text));
            }
            if inner.closed {
                return Ok(ReadOutcome::Sentinel);
            }
            self.cv.wait(&mut inner);
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        inner.written.push(bytes.to_vec());
        Ok(())
    }

    fn write_realtime(&self, byte: u8) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        inner.written.push(vec![byte]);
        Ok(())
    }
}
