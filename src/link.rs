//! Remote side of the bridge.
//!
//! The uplink itself (radio, modem, message transport) lives outside this
//! crate. The control loop hands it frames drained from RxQ through
//! [`RemoteLink`]; a refused frame stays queued and is offered again after
//! the link retry delay.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{BridgeError, Result};
use crate::framing::Frame;

/// Outbound hand-off to the remote transport.
///
/// `send` must not block: it either accepts the frame or reports why not.
pub trait RemoteLink: Send {
    fn send(&mut self, frame: &Frame) -> Result<()>;
}

/// Link that forwards frames into a bounded channel.
///
/// A full channel is reported as a refused hand-off, so the frame stays at
/// the head of RxQ until the consumer catches up.
#[derive(Debug, Clone)]
pub struct ChannelLink {
    tx: mpsc::Sender<Frame>,
}

impl ChannelLink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl RemoteLink for ChannelLink {
    fn send(&mut self, frame: &Frame) -> Result<()> {
        self.tx.try_send(frame.clone()).map_err(|e| match e {
            TrySendError::Full(_) => BridgeError::Link("link busy".to_string()),
            TrySendError::Closed(_) => BridgeError::Link("link closed".to_string()),
        })
    }
}
