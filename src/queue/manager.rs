//! Rx/Tx queue pair owned by the control loop.

use std::fmt;

use serde::Serialize;

use super::{FrameQueue, OverflowPolicy, PushOutcome, QueueStats};
use crate::framing::Frame;

/// Which of the two bridge queues an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    /// Serial → remote.
    Rx,
    /// Remote → serial.
    Tx,
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKind::Rx => f.write_str("rx"),
            QueueKind::Tx => f.write_str("tx"),
        }
    }
}

/// Owns the RxQ and TxQ.
///
/// Rx always evicts the oldest frame when full: serial data is time
/// sensitive and the serial side cannot be told to wait. Tx uses the
/// configured policy.
#[derive(Debug)]
pub struct QueueManager {
    rx: FrameQueue,
    tx: FrameQueue,
}

impl QueueManager {
    pub fn new(rx_size: usize, tx_size: usize, tx_policy: OverflowPolicy) -> Self {
        Self {
            rx: FrameQueue::new(rx_size, OverflowPolicy::EvictOldest),
            tx: FrameQueue::new(tx_size, tx_policy),
        }
    }

    /// Borrow one queue.
    pub fn queue(&self, kind: QueueKind) -> &FrameQueue {
        match kind {
            QueueKind::Rx => &self.rx,
            QueueKind::Tx => &self.tx,
        }
    }

    fn queue_mut(&mut self, kind: QueueKind) -> &mut FrameQueue {
        match kind {
            QueueKind::Rx => &mut self.rx,
            QueueKind::Tx => &mut self.tx,
        }
    }

    pub fn push(&mut self, kind: QueueKind, frame: Frame) -> PushOutcome {
        self.queue_mut(kind).push(frame)
    }

    pub fn front(&self, kind: QueueKind) -> Option<&Frame> {
        self.queue(kind).front()
    }

    /// Remove the oldest frame, accounting it as sent.
    pub fn pop(&mut self, kind: QueueKind) -> Option<Frame> {
        self.queue_mut(kind).pop()
    }

    /// Resize a queue. `false` means frames were discarded.
    pub fn set_size(&mut self, kind: QueueKind, size: usize) -> bool {
        self.queue_mut(kind).set_size(size)
    }

    pub fn set_policy(&mut self, kind: QueueKind, policy: OverflowPolicy) {
        self.queue_mut(kind).set_policy(policy);
    }

    pub fn clear(&mut self, kind: QueueKind, reset_sent: bool, reset_lost: bool) {
        self.queue_mut(kind).clear(reset_sent, reset_lost);
    }

    /// Empty both queues and zero every counter (service start).
    pub fn reset(&mut self) {
        self.rx.clear(true, true);
        self.tx.clear(true, true);
    }

    pub fn record_lost(&mut self, kind: QueueKind, frame: &[u8]) {
        self.queue_mut(kind).record_lost(frame);
    }

    pub fn stats(&self, kind: QueueKind) -> QueueStats {
        self.queue(kind).stats()
    }

    pub fn len(&self, kind: QueueKind) -> usize {
        self.queue(kind).len()
    }
}
