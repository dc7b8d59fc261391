//! In-memory serial transport.
//!
//! [`memory_serial`] returns a transport for the bridge plus a
//! [`MemoryDevice`] for the other end of the wire: inject bytes the bridge
//! should read, inspect frames it wrote, and force open/write/close failures.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;

use super::{SerialHandle, SerialReader, SerialTransport};
use crate::config::SerialOptions;
use crate::error::{BridgeError, Result};

/// How long a read waits for injected data before reporting a timeout.
const READ_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct DeviceState {
    inbound: VecDeque<Bytes>,
    written: Vec<Bytes>,
    open: bool,
    fail_open: bool,
    fail_write: bool,
    fail_close: bool,
    opens: usize,
    closes: usize,
    options: Option<SerialOptions>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<DeviceState>,
    readable: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Create a connected transport/device pair.
pub fn memory_serial() -> (MemorySerial, MemoryDevice) {
    let shared = Arc::new(Shared::default());
    (
        MemorySerial {
            shared: shared.clone(),
        },
        MemoryDevice { shared },
    )
}

/// Bridge side of the in-memory device.
#[derive(Debug, Clone)]
pub struct MemorySerial {
    shared: Arc<Shared>,
}

/// Wire side of the in-memory device.
#[derive(Debug, Clone)]
pub struct MemoryDevice {
    shared: Arc<Shared>,
}

impl MemoryDevice {
    /// Queue bytes for the bridge to read.
    pub fn inject(&self, data: &[u8]) {
        self.shared.lock().inbound.push_back(Bytes::copy_from_slice(data));
        self.shared.readable.notify_all();
    }

    /// Frames the bridge has written, oldest first.
    pub fn written(&self) -> Vec<Bytes> {
        self.shared.lock().written.clone()
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().open
    }

    /// Number of successful opens.
    pub fn open_count(&self) -> usize {
        self.shared.lock().opens
    }

    /// Number of successful closes.
    pub fn close_count(&self) -> usize {
        self.shared.lock().closes
    }

    /// Options last applied through open or `set_options`.
    pub fn options(&self) -> Option<SerialOptions> {
        self.shared.lock().options.clone()
    }

    pub fn fail_open(&self, fail: bool) {
        self.shared.lock().fail_open = fail;
    }

    pub fn fail_write(&self, fail: bool) {
        self.shared.lock().fail_write = fail;
    }

    pub fn fail_close(&self, fail: bool) {
        self.shared.lock().fail_close = fail;
    }

    /// Simulate the device vanishing: pending reads return end-of-stream.
    pub fn disconnect(&self) {
        self.shared.lock().open = false;
        self.shared.readable.notify_all();
    }
}

impl SerialTransport for MemorySerial {
    fn open(
        &mut self,
        options: &SerialOptions,
    ) -> Result<(Box<dyn SerialHandle>, Box<dyn SerialReader>)> {
        let mut state = self.shared.lock();
        if state.fail_open {
            return Err(BridgeError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such device: {}", options.path),
            )));
        }
        state.open = true;
        state.opens += 1;
        state.options = Some(options.clone());
        drop(state);

        Ok((
            Box::new(MemoryHandle {
                shared: self.shared.clone(),
            }),
            Box::new(MemoryReader {
                shared: self.shared.clone(),
            }),
        ))
    }
}

struct MemoryHandle {
    shared: Arc<Shared>,
}

impl SerialHandle for MemoryHandle {
    fn write(&mut self, frame: &[u8]) -> Result<()> {
        let mut state = self.shared.lock();
        if state.fail_write || !state.open {
            return Err(BridgeError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write failed",
            )));
        }
        state.written.push(Bytes::copy_from_slice(frame));
        Ok(())
    }

    fn set_options(&mut self, options: &SerialOptions) -> Result<()> {
        self.shared.lock().options = Some(options.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.shared.lock();
        if state.fail_close {
            return Err(BridgeError::Io(io::Error::new(
                io::ErrorKind::Other,
                "close failed",
            )));
        }
        state.open = false;
        state.closes += 1;
        drop(state);
        self.shared.readable.notify_all();
        Ok(())
    }
}

struct MemoryReader {
    shared: Arc<Shared>,
}

impl SerialReader for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.shared.lock();
        if state.inbound.is_empty() && state.open {
            state = self
                .shared
                .readable
                .wait_timeout(state, READ_POLL)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }

        if !state.open {
            return Ok(0);
        }

        match state.inbound.pop_front() {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    let rest = chunk.split_off(n);
                    state.inbound.push_front(rest);
                }
                Ok(n)
            }
            None => Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out")),
        }
    }
}
