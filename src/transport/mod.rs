//! Transport module - serial device abstraction.
//!
//! The bridge treats the serial transceiver as an opaque capability:
//! - [`SerialTransport`] opens the device and hands back a write half and a
//!   read half
//! - [`SerialHandle`] writes frames, applies line options, and closes
//! - [`SerialReader`] performs blocking reads with a short timeout on a
//!   dedicated thread
//!
//! Implementations:
//! - [`SystemSerial`] - real devices through the `serialport` crate
//! - [`MemorySerial`] - in-process device for tests and dry runs
//!
//! # Example
//!
//! ```ignore
//! use serial_bridge::config::SerialOptions;
//! use serial_bridge::transport::{SerialTransport, SystemSerial};
//!
//! let mut transport = SystemSerial::new();
//! let (mut handle, reader) = transport.open(&SerialOptions::default())?;
//! handle.write(b"hello")?;
//! ```

mod memory;
mod system;

pub use memory::{memory_serial, MemoryDevice, MemorySerial};
pub use system::SystemSerial;

use crate::config::SerialOptions;
use crate::error::Result;

/// Write half of an open serial device.
pub trait SerialHandle: Send {
    /// Write one frame to the wire.
    fn write(&mut self, frame: &[u8]) -> Result<()>;

    /// Apply line options (baud rate, timeouts) to the open device.
    fn set_options(&mut self, options: &SerialOptions) -> Result<()>;

    /// Close the device. Pending reads must return promptly afterwards.
    fn close(&mut self) -> Result<()>;
}

/// Read half of an open serial device.
///
/// `read` blocks for at most the configured read timeout and reports it as
/// `ErrorKind::TimedOut`. `Ok(0)` means the device is gone.
pub trait SerialReader: Send + 'static {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

/// Opens serial devices.
pub trait SerialTransport: Send {
    fn open(
        &mut self,
        options: &SerialOptions,
    ) -> Result<(Box<dyn SerialHandle>, Box<dyn SerialReader>)>;
}
