//! Error types for serial-bridge.

use thiserror::Error;

/// Main error type for all bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// I/O error during serial or stdio operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config files, stdio link).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error reported by the serial port driver.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation needs an open serial port.
    #[error("Serial port not open")]
    NotOpen,

    /// The serial reader thread stopped with an error.
    #[error("Serial read failed: {0}")]
    ReadFailed(String),

    /// The remote link refused or failed a hand-off.
    #[error("Remote link error: {0}")]
    Link(String),

    /// Diagnostic or console input could not be parsed.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// The control loop is no longer running.
    #[error("Bridge stopped")]
    Stopped,
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
