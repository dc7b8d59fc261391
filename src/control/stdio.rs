//! Stdio I/O for the line protocol.
//!
//! # Important
//!
//! - **stdout**: JSON messages (one per line)
//! - **stderr**: Logs, debug output (not parsed by the peer)
//! - **Never use `println!`**: It may add `\r\n` on Windows
//!
//! # Example
//!
//! ```ignore
//! use serial_bridge::control::{write_stdout_json, OutboundLine};
//! use serial_bridge::status::StatusEvent;
//!
//! write_stdout_json(&OutboundLine::Status { event: StatusEvent::Paused })?;
//! ```

use std::io::Write;

use serde::Serialize;

use super::StatusReport;
use crate::error::Result;
use crate::framing::Frame;
use crate::link::RemoteLink;
use crate::status::StatusEvent;

/// One line written to stdout.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundLine {
    /// A frame leaving RxQ for the remote side.
    Frame { len: usize, data: String },
    Status { event: StatusEvent },
    Report(StatusReport),
    Error { message: String },
}

impl OutboundLine {
    /// Frame payloads are written as text; invalid UTF-8 is replaced.
    pub fn frame(frame: &[u8]) -> Self {
        OutboundLine::Frame {
            len: frame.len(),
            data: String::from_utf8_lossy(frame).into_owned(),
        }
    }
}

/// Write a line to stdout.
///
/// Writes the string followed by a single `\n` and flushes.
///
/// # Errors
///
/// Returns IO error if write or flush fails.
pub fn write_stdout_line(line: &str) -> std::io::Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    write_line(&mut handle, line)
}

/// Write a JSON value to stdout as a single line.
pub fn write_stdout_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string(value)?;
    write_stdout_line(&json)?;
    Ok(())
}

fn write_line<W: Write>(out: &mut W, line: &str) -> std::io::Result<()> {
    out.write_all(line.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()
}

/// Remote link that prints outbound frames as JSON lines on stdout.
#[derive(Debug, Default)]
pub struct StdioLink;

impl RemoteLink for StdioLink {
    fn send(&mut self, frame: &Frame) -> Result<()> {
        write_stdout_json(&OutboundLine::frame(frame))
    }
}
