//! Diagnostic surface and stdio line protocol.
//!
//! - [`DiagnosticCommand`] / [`StatusReport`] - `enable`, `disable` and
//!   `status`, served by the control loop
//! - [`ConsoleInput`] - everything a stdin line can ask for
//! - [`StdioLink`], [`OutboundLine`] - JSON lines on stdout
//!
//! # Example
//!
//! ```
//! use serial_bridge::control::DiagnosticCommand;
//! use std::time::Duration;
//!
//! let command = DiagnosticCommand::parse("disable 10").unwrap();
//! assert_eq!(command, DiagnosticCommand::Disable(Some(Duration::from_secs(10))));
//! ```

mod command;
mod console;
mod stdio;

pub use command::{DiagnosticCommand, QueueReport, StatusReport};
pub use console::ConsoleInput;
pub use stdio::{write_stdout_json, write_stdout_line, OutboundLine, StdioLink};
