//! Diagnostic commands and the status report.
//!
//! ```text
//! enable [secs]    enable now, or pause and re-evaluate after `secs`
//! disable [secs]   disable now, or pause for `secs`
//! status           dump state, pause count and queue counters
//! ```
//!
//! An empty command line is a status dump.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::error::{BridgeError, Result};
use crate::queue::{OverflowPolicy, QueueStats};
use crate::status::BridgeStatus;

/// A parsed diagnostic command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiagnosticCommand {
    Enable(Option<Duration>),
    Disable(Option<Duration>),
    Status,
}

impl DiagnosticCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let command = match words.next() {
            None => return Ok(DiagnosticCommand::Status),
            Some(word) => word.to_ascii_lowercase(),
        };
        let timeout = words.next().map(parse_timeout).transpose()?;
        if let Some(extra) = words.next() {
            return Err(BridgeError::InvalidCommand(format!(
                "unexpected argument: {}",
                extra
            )));
        }

        match command.as_str() {
            "enable" => Ok(DiagnosticCommand::Enable(timeout)),
            "disable" => Ok(DiagnosticCommand::Disable(timeout)),
            "status" if timeout.is_none() => Ok(DiagnosticCommand::Status),
            "status" => Err(BridgeError::InvalidCommand(
                "status takes no arguments".to_string(),
            )),
            other => Err(BridgeError::InvalidCommand(format!(
                "unknown command: {}",
                other
            ))),
        }
    }
}

impl FromStr for DiagnosticCommand {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Seconds, fractional allowed.
fn parse_timeout(word: &str) -> Result<Duration> {
    let secs: f64 = word
        .parse()
        .map_err(|_| BridgeError::InvalidCommand(format!("invalid timeout: {}", word)))?;
    // Rejects negative, NaN, infinite and overflowing values.
    Duration::try_from_secs_f64(secs)
        .map_err(|_| BridgeError::InvalidCommand(format!("invalid timeout: {}", word)))
}

/// One queue in a [`StatusReport`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QueueReport {
    pub depth: usize,
    pub size: usize,
    pub policy: OverflowPolicy,
    #[serde(flatten)]
    pub stats: QueueStats,
}

/// Snapshot served by the `status` command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    /// `None` before the first transition.
    pub status: Option<BridgeStatus>,
    pub pause_count: u64,
    pub serial_open: bool,
    pub rx: QueueReport,
    pub tx: QueueReport,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => writeln!(f, "status: {}", status)?,
            None => writeln!(f, "status: unknown")?,
        }
        writeln!(f, "pause count: {}", self.pause_count)?;
        writeln!(f, "serial: {}", if self.serial_open { "open" } else { "closed" })?;
        write_queue(f, "rx", &self.rx)?;
        write_queue(f, "tx", &self.tx)
    }
}

fn write_queue(f: &mut fmt::Formatter<'_>, name: &str, q: &QueueReport) -> fmt::Result {
    writeln!(f, "{} queue: {}/{} ({:?})", name, q.depth, q.size, q.policy)?;
    writeln!(
        f,
        "  sent: {} msgs, {} bytes, last {}",
        q.stats.msg_sent,
        q.stats.bytes_sent,
        Since(q.stats.last_sent)
    )?;
    writeln!(
        f,
        "  lost: {} msgs, {} bytes, last {}",
        q.stats.msg_lost,
        q.stats.bytes_lost,
        Since(q.stats.last_lost)
    )
}

/// Timestamp as seconds since the epoch, or `never`.
struct Since(Option<SystemTime>);

impl fmt::Display for Since {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.and_then(|t| t.duration_since(UNIX_EPOCH).ok()) {
            Some(d) => write!(f, "{}.{:03}", d.as_secs(), d.subsec_millis()),
            None => f.write_str("never"),
        }
    }
}
