//! Framing module - frame type and serial framer.
//!
//! A [`Frame`] is an opaque byte sequence and the atomic unit of transfer in
//! both directions. Queues never split or merge frames; only the [`Framer`]
//! decides where frame boundaries fall in the serial byte stream.

mod framer;

pub use framer::{Framer, PayloadMode, DEFAULT_DELIMITER};

/// One discrete unit of serial data exchanged with the remote link.
pub type Frame = bytes::Bytes;
