//! Runtime configuration changes.
//!
//! The configuration store delivers a batch of changed properties at a time.
//! [`apply_changes`] writes each recognized property into the live
//! [`BridgeConfig`] and classifies the whole batch into at most one event per
//! kind:
//! - `Enabled` → [`ConfigEvent::Status`]
//! - `RxQueueSize`, `TxQueueSize`, `TxOverflow` → [`ConfigEvent::QueueSize`]
//! - `ReadSize`, `PayloadMode`, `BaudRate` → [`ConfigEvent::SerialConfig`]
//!
//! Unknown names and malformed values are logged and skipped.
//!
//! # Example
//!
//! ```
//! use serial_bridge::config::{apply_changes, BridgeConfig, ConfigEvent, PropertyChange};
//! use serde_json::json;
//!
//! let mut config = BridgeConfig::default();
//! let events = apply_changes(&mut config, &[
//!     PropertyChange::new("RxQueueSize", json!(8)),
//!     PropertyChange::new("TxQueueSize", json!(4)),
//! ]);
//!
//! assert_eq!(events, vec![ConfigEvent::QueueSize { rx: true, tx: true }]);
//! assert_eq!(config.rx_queue_size, 8);
//! ```

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{BridgeConfig, MAX_READ_SIZE};
use crate::error::{BridgeError, Result};
use crate::framing::{PayloadMode, DEFAULT_DELIMITER};
use crate::queue::OverflowPolicy;

/// One changed property: name plus new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    pub name: String,
    pub value: Value,
}

impl PropertyChange {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Typed internal event derived from a configuration batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigEvent {
    /// Desired enablement changed.
    Status,
    /// Queue sizing or policy changed for Rx, Tx or both.
    QueueSize { rx: bool, tx: bool },
    /// Serial framing or line options changed.
    SerialConfig,
}

/// Recognized configuration properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    Enabled,
    RxQueueSize,
    TxQueueSize,
    TxOverflow,
    ReadSize,
    PayloadMode,
    BaudRate,
}

impl FromStr for Property {
    type Err = BridgeError;

    /// Accepts the store's property names and the JSON config keys.
    fn from_str(name: &str) -> Result<Self> {
        match name {
            "Enabled" | "enabled" => Ok(Property::Enabled),
            "RxQueueSize" | "rx_queue_size" => Ok(Property::RxQueueSize),
            "TxQueueSize" | "tx_queue_size" => Ok(Property::TxQueueSize),
            "TxOverflow" | "tx_overflow" => Ok(Property::TxOverflow),
            "ReadSize" | "read_size" => Ok(Property::ReadSize),
            "PayloadMode" | "payload_mode" => Ok(Property::PayloadMode),
            "BaudRate" | "baud_rate" => Ok(Property::BaudRate),
            other => Err(BridgeError::InvalidConfig(format!(
                "unknown property: {}",
                other
            ))),
        }
    }
}

impl Property {
    /// Write `value` into `config`.
    pub fn apply(self, config: &mut BridgeConfig, value: &Value) -> Result<()> {
        match self {
            Property::Enabled => config.enabled = parse_bool(value)?,
            Property::RxQueueSize => config.rx_queue_size = parse_count(value)?,
            Property::TxQueueSize => config.tx_queue_size = parse_count(value)?,
            Property::TxOverflow => {
                config.tx_overflow = serde_json::from_value::<OverflowPolicy>(value.clone())?
            }
            Property::ReadSize => {
                let size = parse_count(value)?;
                if size > MAX_READ_SIZE {
                    return Err(BridgeError::InvalidConfig(format!(
                        "read size {} exceeds {}",
                        size, MAX_READ_SIZE
                    )));
                }
                config.serial.read_size = size;
            }
            Property::PayloadMode => config.serial.payload_mode = parse_payload_mode(value)?,
            Property::BaudRate => {
                let baud = parse_positive(value)?;
                config.serial.baud_rate = u32::try_from(baud).map_err(|_| {
                    BridgeError::InvalidConfig(format!("baud rate out of range: {}", baud))
                })?;
            }
        }
        Ok(())
    }
}

/// Apply a batch of changes and classify it.
///
/// Events come out in a fixed order (status, queue size, serial config), each
/// at most once, no matter how many properties of a kind changed.
pub fn apply_changes(config: &mut BridgeConfig, batch: &[PropertyChange]) -> Vec<ConfigEvent> {
    let mut status = false;
    let mut rx = false;
    let mut tx = false;
    let mut serial = false;

    for change in batch {
        let property = match change.name.parse::<Property>() {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!(name = %change.name, "Ignoring unknown configuration property");
                continue;
            }
        };

        if let Err(e) = property.apply(config, &change.value) {
            tracing::warn!(
                name = %change.name,
                value = %change.value,
                "Ignoring malformed configuration value: {}",
                e
            );
            continue;
        }

        tracing::debug!(name = %change.name, value = %change.value, "Configuration property applied");
        match property {
            Property::Enabled => status = true,
            Property::RxQueueSize => rx = true,
            Property::TxQueueSize | Property::TxOverflow => tx = true,
            Property::ReadSize | Property::PayloadMode | Property::BaudRate => serial = true,
        }
    }

    let mut events = Vec::new();
    if status {
        events.push(ConfigEvent::Status);
    }
    if rx || tx {
        events.push(ConfigEvent::QueueSize { rx, tx });
    }
    if serial {
        events.push(ConfigEvent::SerialConfig);
    }
    events
}

fn parse_bool(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        other => Err(BridgeError::InvalidConfig(format!(
            "expected boolean, got {}",
            other
        ))),
    }
}

fn parse_positive(value: &Value) -> Result<u64> {
    let n = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match n {
        Some(n) if n > 0 => Ok(n),
        _ => Err(BridgeError::InvalidConfig(format!(
            "expected positive integer, got {}",
            value
        ))),
    }
}

/// A positive integer that fits the platform's `usize`.
fn parse_count(value: &Value) -> Result<usize> {
    let n = parse_positive(value)?;
    usize::try_from(n)
        .map_err(|_| BridgeError::InvalidConfig(format!("count out of range: {}", n)))
}

fn parse_payload_mode(value: &Value) -> Result<PayloadMode> {
    match value {
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(PayloadMode::Raw),
            "delimited" => Ok(PayloadMode::Delimited {
                delimiter: DEFAULT_DELIMITER,
            }),
            other => Err(BridgeError::InvalidConfig(format!(
                "unknown payload mode: {}",
                other
            ))),
        },
        other => Ok(serde_json::from_value(other.clone())?),
    }
}
