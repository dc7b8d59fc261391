//! # serial-bridge
//!
//! Tunnels a local serial device over a constrained remote link.
//!
//! Serial bytes are framed and buffered in a bounded receive queue (RxQ)
//! until the remote link takes them; frames from the remote side wait in a
//! bounded transmit queue (TxQ) until the serial device is open. The bridge
//! runs unattended: it enables, pauses and re-enables itself in response to
//! configuration changes and failures.
//!
//! ## Architecture
//!
//! - **Control loop** ([`dispatch`]): one task, one `select!` over every event
//!   source; handlers get exclusive access to [`BridgeContext`]
//! - **Status** ([`status`]): Disabled / Enabled / Paused with a one-shot
//!   re-evaluation timer
//! - **Queues** ([`queue`]): bounded FIFOs with sent/lost accounting
//! - **Serial** ([`serial`], [`transport`]): blocking reads on a dedicated
//!   thread, framed on the control loop ([`framing`])
//!
//! ## Example
//!
//! ```ignore
//! use serial_bridge::{Bridge, BridgeConfig};
//! use serial_bridge::link::ChannelLink;
//!
//! #[tokio::main]
//! async fn main() -> serial_bridge::Result<()> {
//!     let (link, mut uplink) = ChannelLink::new(64);
//!     let bridge = Bridge::builder(BridgeConfig::from_file("bridge.json")?)
//!         .link(link)
//!         .start()
//!         .await?;
//!
//!     while let Some(frame) = uplink.recv().await {
//!         println!("{} bytes for the uplink", frame.len());
//!     }
//!     bridge.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod framing;
pub mod link;
pub mod queue;
pub mod serial;
pub mod status;
pub mod transport;

mod context;
mod service;

pub use config::BridgeConfig;
pub use context::BridgeContext;
pub use error::{BridgeError, Result};
pub use service::{Bridge, BridgeBuilder, BridgeHandle, REMOTE_INBOUND_SOURCE};
pub use status::{BridgeStatus, StatusEvent};
