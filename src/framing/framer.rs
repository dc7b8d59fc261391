//! Serial framer for turning read chunks into frames.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management. Serial reads
//! arrive in arbitrary chunks; the framer accumulates them and cuts frames
//! according to the configured [`PayloadMode`]:
//! - `Raw`: every chunk becomes one or more frames of at most `read_size` bytes
//! - `Delimited`: frames end at the delimiter byte (which is dropped); a run
//!   longer than `read_size` without a delimiter is cut at `read_size`
//!
//! # Example
//!
//! ```
//! use serial_bridge::framing::{Framer, PayloadMode};
//!
//! let mut framer = Framer::new(PayloadMode::Delimited { delimiter: b':' }, 64);
//!
//! let frames = framer.push(b"abc:de");
//! assert_eq!(frames.len(), 1);
//! assert_eq!(&frames[0][..], b"abc");
//!
//! let frames = framer.push(b"f:");
//! assert_eq!(&frames[0][..], b"def");
//! ```

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

use super::Frame;

/// Upper bound on the buffer reserved up front.
const INITIAL_CAPACITY: usize = 4096;

/// Default delimiter for delimited framing (`:`).
pub const DEFAULT_DELIMITER: u8 = 0x3a;

fn default_delimiter() -> u8 {
    DEFAULT_DELIMITER
}

/// How serial bytes are cut into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum PayloadMode {
    /// Each read is forwarded as-is, split at `read_size`.
    Raw,
    /// Frames are separated by `delimiter`.
    Delimited {
        #[serde(default = "default_delimiter")]
        delimiter: u8,
    },
}

impl Default for PayloadMode {
    fn default() -> Self {
        PayloadMode::Raw
    }
}

/// Accumulates serial bytes and extracts complete frames.
#[derive(Debug)]
pub struct Framer {
    /// Bytes not yet part of a complete frame.
    buffer: BytesMut,
    mode: PayloadMode,
    /// Maximum frame length.
    read_size: usize,
}

impl Framer {
    /// Create a framer. A `read_size` of zero is treated as one.
    pub fn new(mode: PayloadMode, read_size: usize) -> Self {
        let read_size = read_size.max(1);
        Self {
            buffer: BytesMut::with_capacity(read_size.saturating_mul(2).min(INITIAL_CAPACITY)),
            mode,
            read_size,
        }
    }

    /// Push a chunk of serial bytes and extract all complete frames.
    ///
    /// Partial data is kept for the next push.
    pub fn push(&mut self, data: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        match self.mode {
            PayloadMode::Raw => {
                while !self.buffer.is_empty() {
                    let n = self.buffer.len().min(self.read_size);
                    frames.push(self.buffer.split_to(n).freeze());
                }
            }
            PayloadMode::Delimited { delimiter } => {
                while let Some(frame) = self.try_extract_delimited(delimiter) {
                    if !frame.is_empty() {
                        frames.push(frame);
                    }
                }
            }
        }
        frames
    }

    /// Try to cut a single delimited frame from the buffer.
    ///
    /// Returns an empty frame for back-to-back delimiters; the caller skips it.
    fn try_extract_delimited(&mut self, delimiter: u8) -> Option<Frame> {
        // A delimiter right after a full-length frame still terminates it.
        let window = self.buffer.len().min(self.read_size.saturating_add(1));
        if let Some(pos) = self.buffer[..window].iter().position(|&b| b == delimiter) {
            let frame = self.buffer.split_to(pos).freeze();
            self.buffer.advance(1);
            return Some(frame);
        }

        if self.buffer.len() > self.read_size {
            return Some(self.buffer.split_to(self.read_size).freeze());
        }

        None
    }

    /// Take whatever partial data is buffered as a final frame.
    pub fn flush(&mut self) -> Option<Frame> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(self.buffer.split().freeze())
    }

    /// Switch framing options, flushing partial data cut under the old ones.
    pub fn reconfigure(&mut self, mode: PayloadMode, read_size: usize) -> Option<Frame> {
        let leftover = self.flush();
        self.mode = mode;
        self.read_size = read_size.max(1);
        leftover
    }

    /// Drop buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Number of buffered bytes.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn mode(&self) -> PayloadMode {
        self.mode
    }

    pub fn read_size(&self) -> usize {
        self.read_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLON: PayloadMode = PayloadMode::Delimited {
        delimiter: DEFAULT_DELIMITER,
    };

    fn as_slices(frames: &[Frame]) -> Vec<&[u8]> {
        frames.iter().map(|f| f.as_ref()).collect()
    }

    #[test]
    fn test_huge_read_size_does_not_preallocate() {
        let mut framer = Framer::new(PayloadMode::Raw, usize::MAX);

        let frames = framer.push(b"abc");

        assert_eq!(as_slices(&frames), vec![&b"abc"[..]]);
    }

    #[test]
    fn test_raw_chunk_is_one_frame() {
        let mut framer = Framer::new(PayloadMode::Raw, 16);

        let frames = framer.push(b"hello");

        assert_eq!(as_slices(&frames), vec![&b"hello"[..]]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_raw_splits_at_read_size() {
        let mut framer = Framer::new(PayloadMode::Raw, 4);

        let frames = framer.push(b"0123456789");

        assert_eq!(as_slices(&frames), vec![&b"0123"[..], b"4567", b"89"]);
        assert!(framer.flush().is_none());
    }

    #[test]
    fn test_delimited_across_chunks() {
        let mut framer = Framer::new(COLON, 64);

        assert!(framer.push(b"ab").is_empty());
        assert!(framer.push(b"cd").is_empty());
        let frames = framer.push(b"e:fg");

        assert_eq!(as_slices(&frames), vec![&b"abcde"[..]]);
        assert_eq!(framer.pending(), 2);
    }

    #[test]
    fn test_delimited_multiple_in_one_chunk() {
        let mut framer = Framer::new(COLON, 64);

        let frames = framer.push(b"a:bb:ccc:");

        assert_eq!(as_slices(&frames), vec![&b"a"[..], b"bb", b"ccc"]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_delimited_skips_empty_frames() {
        let mut framer = Framer::new(COLON, 64);

        let frames = framer.push(b"::x::");

        assert_eq!(as_slices(&frames), vec![&b"x"[..]]);
    }

    #[test]
    fn test_delimited_caps_long_runs() {
        let mut framer = Framer::new(COLON, 4);

        let frames = framer.push(b"abcdefghij");

        assert_eq!(as_slices(&frames), vec![&b"abcd"[..], b"efgh"]);
        assert_eq!(framer.pending(), 2);
    }

    #[test]
    fn test_delimiter_right_after_full_frame() {
        let mut framer = Framer::new(COLON, 4);

        let frames = framer.push(b"abcd:efgh:");

        assert_eq!(as_slices(&frames), vec![&b"abcd"[..], b"efgh"]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_custom_delimiter() {
        let mut framer = Framer::new(PayloadMode::Delimited { delimiter: b'\n' }, 64);

        let frames = framer.push(b"line one\nline:two\n");

        assert_eq!(as_slices(&frames), vec![&b"line one"[..], b"line:two"]);
    }

    #[test]
    fn test_flush_returns_partial() {
        let mut framer = Framer::new(COLON, 64);
        framer.push(b"abc:partial");

        let leftover = framer.flush();

        assert_eq!(leftover.as_deref(), Some(&b"partial"[..]));
        assert_eq!(framer.pending(), 0);
        assert!(framer.flush().is_none());
    }

    #[test]
    fn test_reconfigure_flushes_under_old_mode() {
        let mut framer = Framer::new(COLON, 64);
        framer.push(b"half");

        let leftover = framer.reconfigure(PayloadMode::Raw, 2);

        assert_eq!(leftover.as_deref(), Some(&b"half"[..]));
        assert_eq!(framer.mode(), PayloadMode::Raw);
        assert_eq!(framer.read_size(), 2);
        assert_eq!(as_slices(&framer.push(b"xyz")), vec![&b"xy"[..], b"z"]);
    }

    #[test]
    fn test_zero_read_size_treated_as_one() {
        let mut framer = Framer::new(PayloadMode::Raw, 0);

        let frames = framer.push(b"ab");

        assert_eq!(frames.len(), 2);
        assert_eq!(framer.read_size(), 1);
    }

    #[test]
    fn test_payload_mode_serde() {
        let raw: PayloadMode = serde_json::from_str(r#"{"mode":"raw"}"#).unwrap();
        let delimited: PayloadMode = serde_json::from_str(r#"{"mode":"delimited"}"#).unwrap();
        let newline: PayloadMode =
            serde_json::from_str(r#"{"mode":"delimited","delimiter":10}"#).unwrap();

        assert_eq!(raw, PayloadMode::Raw);
        assert_eq!(delimited, COLON);
        assert_eq!(newline, PayloadMode::Delimited { delimiter: 10 });
    }
}
