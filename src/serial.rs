//! Serial side of the bridge.
//!
//! [`SerialBridge`] owns the open device for the control loop. Reads happen
//! on a dedicated thread that posts [`SerialEvent`]s back into the loop:
//!
//! ```text
//! Reader thread ──► mpsc::Sender<SerialEvent> ──► control loop ──► Framer ──► RxQ
//! ```
//!
//! Each open starts a new session generation. Events carry the generation
//! they were read under. Closing a session keeps its framer until the reader
//! reports `Closed` or `Failed`, so bytes already read before the close are
//! still framed in order and the remainder is flushed only at the end of the
//! generation. Bytes from any other generation are stale.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::SerialOptions;
use crate::error::{BridgeError, Result};
use crate::framing::{Frame, Framer};
use crate::status::BridgeResource;
use crate::transport::{SerialHandle, SerialReader, SerialTransport};

/// Size of the reader thread's buffer.
const READ_BUFFER_SIZE: usize = 4096;

/// Default capacity of the serial event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Posted by the reader thread.
#[derive(Debug, Clone, PartialEq)]
pub enum SerialEvent {
    /// Raw bytes read from the wire.
    Data { generation: u64, bytes: Bytes },
    /// The reader stopped because the session was closed.
    Closed { generation: u64 },
    /// The reader stopped on an error or because the device went away.
    Failed { generation: u64, error: String },
}

impl SerialEvent {
    pub fn generation(&self) -> u64 {
        match self {
            SerialEvent::Data { generation, .. }
            | SerialEvent::Closed { generation }
            | SerialEvent::Failed { generation, .. } => *generation,
        }
    }
}

/// What a [`SerialEvent`] amounted to once checked against the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    /// Complete frames for RxQ.
    Frames(Vec<Frame>),
    /// Bytes read under a session that is no longer open.
    Stale(Bytes),
    /// Nothing to do.
    Nothing,
}

struct Session {
    handle: Box<dyn SerialHandle>,
    cancel: Arc<AtomicBool>,
    generation: u64,
}

/// A closed session whose reader has not stopped yet.
#[derive(Debug)]
struct Draining {
    generation: u64,
    framer: Framer,
}

/// The serial device as seen by the control loop.
pub struct SerialBridge {
    transport: Box<dyn SerialTransport>,
    options: SerialOptions,
    session: Option<Session>,
    generation: u64,
    framer: Framer,
    draining: Vec<Draining>,
    events: mpsc::Sender<SerialEvent>,
}

impl SerialBridge {
    pub fn new(
        transport: Box<dyn SerialTransport>,
        options: SerialOptions,
        events: mpsc::Sender<SerialEvent>,
    ) -> Self {
        let framer = Framer::new(options.payload_mode, options.read_size);
        Self {
            transport,
            options,
            session: None,
            generation: 0,
            framer,
            draining: Vec::new(),
            events,
        }
    }

    /// Open the device and start the reader thread. No-op when already open.
    pub fn open(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let (mut handle, reader) = self.transport.open(&self.options)?;
        let generation = self.generation + 1;
        let cancel = Arc::new(AtomicBool::new(false));

        let thread_cancel = cancel.clone();
        let events = self.events.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("serial-reader-{}", generation))
            .spawn(move || read_loop(reader, thread_cancel, generation, events));

        if let Err(e) = spawned {
            if let Err(close_err) = handle.close() {
                tracing::debug!("Close after failed reader spawn also failed: {}", close_err);
            }
            return Err(BridgeError::Io(e));
        }

        self.generation = generation;
        self.framer.clear();
        self.session = Some(Session {
            handle,
            cancel,
            generation,
        });
        tracing::debug!(path = %self.options.path, generation, "Serial session opened");
        Ok(())
    }

    /// Close the device and stop the reader thread.
    ///
    /// Once this returns the device is released and no further reads are
    /// made. Data the reader already posted is still framed when its events
    /// arrive; the partial frame left at the end comes out with the final
    /// `Closed`/`Failed` event. Closing a closed bridge succeeds. If the
    /// device refuses to close, the session stays open.
    pub fn close(&mut self) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };

        session.handle.close()?;
        session.cancel.store(true, Ordering::Release);
        let generation = session.generation;
        self.session = None;

        let framer = std::mem::replace(
            &mut self.framer,
            Framer::new(self.options.payload_mode, self.options.read_size),
        );
        self.draining.push(Draining { generation, framer });

        tracing::debug!(generation, "Serial session closed");
        Ok(())
    }

    /// Write one frame to the wire.
    pub fn write(&mut self, frame: &[u8]) -> Result<()> {
        match self.session.as_mut() {
            Some(session) => session.handle.write(frame),
            None => Err(BridgeError::NotOpen),
        }
    }

    /// Replace the serial options.
    ///
    /// Line options are pushed to an open device right away; framing changes
    /// apply to the next bytes read. Returns the partial frame the old
    /// framing was holding.
    pub fn reconfigure(&mut self, options: SerialOptions) -> Result<Option<Frame>> {
        if let Some(session) = self.session.as_mut() {
            session.handle.set_options(&options)?;
        }
        if options.path != self.options.path {
            tracing::warn!(
                current = %self.options.path,
                requested = %options.path,
                "Serial path change takes effect on next open"
            );
        }
        let leftover = self
            .framer
            .reconfigure(options.payload_mode, options.read_size);
        self.options = options;
        Ok(leftover)
    }

    /// Check an event against the current session and frame its data.
    ///
    /// A read failure on the live session is returned as an error.
    pub fn handle_event(&mut self, event: SerialEvent) -> Result<Received> {
        let generation = event.generation();
        let live = self.session.as_ref().map(|s| s.generation) == Some(generation);
        let draining = self.draining.iter().position(|d| d.generation == generation);

        match event {
            SerialEvent::Data { bytes, .. } if live => Ok(Received::Frames(self.framer.push(&bytes))),
            SerialEvent::Data { bytes, .. } => match draining {
                Some(idx) => Ok(Received::Frames(self.draining[idx].framer.push(&bytes))),
                None => {
                    tracing::debug!(generation, len = bytes.len(), "Discarding bytes from closed session");
                    Ok(Received::Stale(bytes))
                }
            },
            SerialEvent::Failed { error, .. } if live => {
                tracing::warn!(generation, "Serial reader failed: {}", error);
                Err(BridgeError::ReadFailed(error))
            }
            SerialEvent::Closed { .. } => {
                tracing::debug!(generation, "Serial reader stopped");
                Ok(self.finish_draining(draining))
            }
            SerialEvent::Failed { error, .. } => {
                tracing::debug!(generation, "Reader of closed session failed: {}", error);
                Ok(self.finish_draining(draining))
            }
        }
    }

    /// Retire a closed session once its reader has stopped, flushing the
    /// partial frame its framer still holds.
    fn finish_draining(&mut self, idx: Option<usize>) -> Received {
        let Some(idx) = idx else {
            return Received::Nothing;
        };
        let mut done = self.draining.swap_remove(idx);
        match done.framer.flush() {
            Some(frame) => Received::Frames(vec![frame]),
            None => Received::Nothing,
        }
    }

    /// Whether a closed session still has a reader to hear from.
    pub fn is_draining(&self) -> bool {
        !self.draining.is_empty()
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn options(&self) -> &SerialOptions {
        &self.options
    }

    /// Generation of the most recent session.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl BridgeResource for SerialBridge {
    fn open(&mut self) -> Result<()> {
        SerialBridge::open(self)
    }

    fn close(&mut self) -> Result<()> {
        SerialBridge::close(self)
    }
}

impl std::fmt::Debug for SerialBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialBridge")
            .field("options", &self.options)
            .field("open", &self.is_open())
            .field("generation", &self.generation)
            .field("framer", &self.framer)
            .field("draining", &self.draining.len())
            .finish()
    }
}

/// Body of the reader thread.
fn read_loop(
    mut reader: Box<dyn SerialReader>,
    cancel: Arc<AtomicBool>,
    generation: u64,
    events: mpsc::Sender<SerialEvent>,
) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    let last = loop {
        if cancel.load(Ordering::Acquire) {
            break SerialEvent::Closed { generation };
        }

        match reader.read(&mut buf) {
            Ok(0) if cancel.load(Ordering::Acquire) => break SerialEvent::Closed { generation },
            Ok(0) => {
                break SerialEvent::Failed {
                    generation,
                    error: "device disconnected".to_string(),
                }
            }
            Ok(n) => {
                let event = SerialEvent::Data {
                    generation,
                    bytes: Bytes::copy_from_slice(&buf[..n]),
                };
                if events.blocking_send(event).is_err() {
                    // Control loop is gone.
                    return;
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(_) if cancel.load(Ordering::Acquire) => break SerialEvent::Closed { generation },
            Err(e) => {
                break SerialEvent::Failed {
                    generation,
                    error: e.to_string(),
                }
            }
        }
    };

    let _ = events.blocking_send(last);
}
