//! Bridge configuration.
//!
//! Supports both programmatic and file-based (JSON) configuration. Runtime
//! changes arrive as batches of [`PropertyChange`]s and are applied by
//! [`apply_changes`], which also classifies them into [`ConfigEvent`]s.

mod changes;

pub use changes::{apply_changes, ConfigEvent, Property, PropertyChange};

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::framing::PayloadMode;
use crate::queue::OverflowPolicy;

/// Default RxQ element count.
pub const DEFAULT_RX_QUEUE_SIZE: usize = 64;

/// Default TxQ element count.
pub const DEFAULT_TX_QUEUE_SIZE: usize = 64;

/// Pause applied after any handler failure.
pub const DEFAULT_PAUSE_COOLDOWN: Duration = Duration::from_secs(5);

/// Delay before retrying a remote link that refused a frame.
pub const DEFAULT_LINK_RETRY: Duration = Duration::from_secs(1);

/// Default serial device.
pub const DEFAULT_SERIAL_PATH: &str = "/dev/ttyUSB1";

/// Default line speed.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default maximum frame length.
pub const DEFAULT_READ_SIZE: usize = 256;

/// Largest accepted frame length.
pub const MAX_READ_SIZE: usize = 64 * 1024;

/// Serial read timeout; bounds how long a close waits for the reader.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Top-level bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Desired enablement; re-applied whenever a pause expires.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum frames buffered serial → remote.
    #[serde(default = "default_rx_queue_size")]
    pub rx_queue_size: usize,

    /// Maximum frames buffered remote → serial.
    #[serde(default = "default_tx_queue_size")]
    pub tx_queue_size: usize,

    /// What a full TxQ does with a new inbound frame.
    #[serde(default = "default_tx_overflow")]
    pub tx_overflow: OverflowPolicy,

    /// Pause after a handler failure (milliseconds).
    #[serde(default = "default_pause_cooldown_ms")]
    pub pause_cooldown_ms: u64,

    /// Retry delay after the remote link refuses a frame (milliseconds).
    #[serde(default = "default_link_retry_ms")]
    pub link_retry_ms: u64,

    /// Serial device and framing options.
    #[serde(default)]
    pub serial: SerialOptions,
}

/// Serial device and framing options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialOptions {
    #[serde(default = "default_serial_path")]
    pub path: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Maximum frame length in bytes.
    #[serde(default = "default_read_size")]
    pub read_size: usize,

    #[serde(default)]
    pub payload_mode: PayloadMode,
}

fn default_true() -> bool {
    true
}

fn default_rx_queue_size() -> usize {
    DEFAULT_RX_QUEUE_SIZE
}

fn default_tx_queue_size() -> usize {
    DEFAULT_TX_QUEUE_SIZE
}

fn default_tx_overflow() -> OverflowPolicy {
    OverflowPolicy::Reject
}

fn default_pause_cooldown_ms() -> u64 {
    DEFAULT_PAUSE_COOLDOWN.as_millis() as u64
}

fn default_link_retry_ms() -> u64 {
    DEFAULT_LINK_RETRY.as_millis() as u64
}

fn default_serial_path() -> String {
    DEFAULT_SERIAL_PATH.to_string()
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT.as_millis() as u64
}

fn default_read_size() -> usize {
    DEFAULT_READ_SIZE
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rx_queue_size: DEFAULT_RX_QUEUE_SIZE,
            tx_queue_size: DEFAULT_TX_QUEUE_SIZE,
            tx_overflow: default_tx_overflow(),
            pause_cooldown_ms: default_pause_cooldown_ms(),
            link_retry_ms: default_link_retry_ms(),
            serial: SerialOptions::default(),
        }
    }
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self {
            path: default_serial_path(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: default_read_timeout_ms(),
            read_size: DEFAULT_READ_SIZE,
            payload_mode: PayloadMode::default(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.rx_queue_size == 0 {
            return Err(BridgeError::InvalidConfig(
                "rx_queue_size must be greater than zero".into(),
            ));
        }
        if self.tx_queue_size == 0 {
            return Err(BridgeError::InvalidConfig(
                "tx_queue_size must be greater than zero".into(),
            ));
        }
        if self.pause_cooldown_ms == 0 {
            return Err(BridgeError::InvalidConfig(
                "pause_cooldown_ms must be greater than zero".into(),
            ));
        }
        self.serial.validate()
    }

    pub fn pause_cooldown(&self) -> Duration {
        Duration::from_millis(self.pause_cooldown_ms)
    }

    pub fn link_retry(&self) -> Duration {
        Duration::from_millis(self.link_retry_ms)
    }
}

impl SerialOptions {
    /// Validate serial options.
    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(BridgeError::InvalidConfig("serial path is empty".into()));
        }
        if self.baud_rate == 0 {
            return Err(BridgeError::InvalidConfig(
                "baud_rate must be greater than zero".into(),
            ));
        }
        if self.read_size == 0 {
            return Err(BridgeError::InvalidConfig(
                "read_size must be greater than zero".into(),
            ));
        }
        if self.read_size > MAX_READ_SIZE {
            return Err(BridgeError::InvalidConfig(format!(
                "read_size must not exceed {}",
                MAX_READ_SIZE
            )));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
