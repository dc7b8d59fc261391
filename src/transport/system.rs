//! Serial transport backed by the `serialport` crate.
//!
//! The device is opened once and cloned. The clone serves the reader thread
//! through a shared slot; the primary handle stays with the control loop for
//! writes. Ports are opened exclusively and the clone shares that lock, so
//! closing the handle takes the clone out of the slot and drops it: once
//! `close` returns the device can be opened again and the reader gets
//! `NotConnected` on its next read.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use serialport::{ClearBuffer, SerialPort as DevicePort};

use super::{SerialHandle, SerialReader, SerialTransport};
use crate::config::SerialOptions;
use crate::error::{BridgeError, Result};

/// The reader's half of the port; empty once closed.
type ReaderSlot = Arc<Mutex<Option<Box<dyn DevicePort>>>>;

fn lock(slot: &ReaderSlot) -> MutexGuard<'_, Option<Box<dyn DevicePort>>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// Opens real serial devices.
#[derive(Debug, Default)]
pub struct SystemSerial;

impl SystemSerial {
    pub fn new() -> Self {
        Self
    }
}

impl SerialTransport for SystemSerial {
    fn open(
        &mut self,
        options: &SerialOptions,
    ) -> Result<(Box<dyn SerialHandle>, Box<dyn SerialReader>)> {
        let port = serialport::new(&options.path, options.baud_rate)
            .timeout(options.read_timeout())
            .open()?;
        let slot: ReaderSlot = Arc::new(Mutex::new(Some(port.try_clone()?)));

        tracing::info!(
            path = %options.path,
            baud = options.baud_rate,
            "Opened serial device"
        );

        Ok((
            Box::new(SystemHandle {
                port: Some(port),
                reader: slot.clone(),
            }),
            Box::new(SystemReader { port: slot }),
        ))
    }
}

struct SystemHandle {
    port: Option<Box<dyn DevicePort>>,
    reader: ReaderSlot,
}

impl SystemHandle {
    fn port(&mut self) -> Result<&mut Box<dyn DevicePort>> {
        self.port.as_mut().ok_or(BridgeError::NotOpen)
    }
}

impl SerialHandle for SystemHandle {
    fn write(&mut self, frame: &[u8]) -> Result<()> {
        let port = self.port()?;
        port.write_all(frame)?;
        port.flush()?;
        Ok(())
    }

    fn set_options(&mut self, options: &SerialOptions) -> Result<()> {
        let port = self.port()?;
        port.set_baud_rate(options.baud_rate)?;
        port.set_timeout(options.read_timeout())?;
        // Waits out a read in progress, bounded by the old timeout.
        if let Some(reader) = lock(&self.reader).as_mut() {
            reader.set_timeout(options.read_timeout())?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(port) = self.port.as_mut() {
            port.clear(ClearBuffer::All)?;
        }
        // Waits out a read in progress, bounded by the read timeout.
        let reader = lock(&self.reader).take();
        drop(reader);
        self.port = None;
        Ok(())
    }
}

struct SystemReader {
    port: ReaderSlot,
}

impl SerialReader for SystemReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match lock(&self.port).as_mut() {
            Some(port) => port.read(buf),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "serial port closed",
            )),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pty() -> (serialport::TTYPort, serialport::TTYPort, SerialOptions) {
        let (master, slave) = serialport::TTYPort::pair().expect("pty pair");
        let path = slave.name().expect("pty has a name");
        let options = SerialOptions {
            path,
            ..SerialOptions::default()
        };
        (master, slave, options)
    }

    #[test]
    fn test_reopen_right_after_close() {
        let (_master, _slave, options) = pty();
        let mut transport = SystemSerial::new();

        let (mut handle, mut reader) = transport.open(&options).unwrap();
        let reading = std::thread::spawn(move || {
            let mut buf = [0u8; 16];
            loop {
                match reader.read(&mut buf) {
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                    Err(e) => return e.kind(),
                    Ok(_) => continue,
                }
            }
        });
        // Let the reader block inside a read.
        std::thread::sleep(Duration::from_millis(20));

        handle.close().unwrap();
        drop(handle);

        let reopened = transport.open(&options);
        assert!(reopened.is_ok(), "reopen failed: {:?}", reopened.err());
        assert_eq!(reading.join().unwrap(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_write_after_close_is_rejected() {
        let (_master, _slave, options) = pty();
        let mut transport = SystemSerial::new();

        let (mut handle, _reader) = transport.open(&options).unwrap();
        handle.close().unwrap();

        assert!(matches!(handle.write(b"x"), Err(BridgeError::NotOpen)));
    }

    #[test]
    fn test_written_bytes_reach_other_end() {
        let (mut master, _slave, options) = pty();
        let mut transport = SystemSerial::new();

        let (mut handle, _reader) = transport.open(&options).unwrap();
        handle.write(b"ping").unwrap();

        let mut buf = [0u8; 4];
        master.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }
}
