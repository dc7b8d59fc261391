//! Line-oriented console input.
//!
//! Each stdin line is one of:
//! - a diagnostic command (`enable [secs]`, `disable [secs]`, `status`)
//! - `send <text>` - deliver `<text>` as an inbound frame for the serial side
//! - `set <Property> <json-value>` - a one-property configuration batch
//! - `quit`

use bytes::Bytes;
use serde_json::Value;

use super::DiagnosticCommand;
use crate::config::PropertyChange;
use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    Command(DiagnosticCommand),
    Send(Bytes),
    Set(PropertyChange),
    Quit,
}

impl ConsoleInput {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim_start()),
            None => (line, ""),
        };

        match word.to_ascii_lowercase().as_str() {
            "send" if rest.is_empty() => Err(BridgeError::InvalidCommand(
                "send needs a payload".to_string(),
            )),
            "send" => Ok(ConsoleInput::Send(Bytes::copy_from_slice(rest.as_bytes()))),
            "set" => parse_set(rest),
            "quit" | "exit" if rest.is_empty() => Ok(ConsoleInput::Quit),
            _ => DiagnosticCommand::parse(line).map(ConsoleInput::Command),
        }
    }
}

/// `<Property> <value>`; a value that is not valid JSON is taken as a string.
fn parse_set(rest: &str) -> Result<ConsoleInput> {
    let (name, value) = rest
        .split_once(char::is_whitespace)
        .map(|(name, value)| (name, value.trim()))
        .filter(|(_, value)| !value.is_empty())
        .ok_or_else(|| BridgeError::InvalidCommand("usage: set <Property> <value>".to_string()))?;

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok(ConsoleInput::Set(PropertyChange::new(name, value)))
}
