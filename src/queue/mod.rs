//! Queue module - bounded Rx/Tx frame queues.
//!
//! Provides:
//! - [`FrameQueue`] - a bounded FIFO with sent/lost accounting
//! - [`QueueManager`] - the RxQ (serial → remote) and TxQ (remote → serial) pair
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use serial_bridge::queue::{OverflowPolicy, QueueKind, QueueManager};
//!
//! let mut queues = QueueManager::new(2, 2, OverflowPolicy::Reject);
//! queues.push(QueueKind::Rx, Bytes::from_static(b"a"));
//! queues.push(QueueKind::Rx, Bytes::from_static(b"b"));
//! queues.push(QueueKind::Rx, Bytes::from_static(b"c"));
//!
//! // Rx evicts the oldest frame when full.
//! assert_eq!(queues.stats(QueueKind::Rx).msg_lost, 1);
//! assert_eq!(queues.pop(QueueKind::Rx), Some(Bytes::from_static(b"b")));
//! assert_eq!(queues.stats(QueueKind::Rx).msg_sent, 1);
//! ```

mod frame_queue;
mod manager;

pub use frame_queue::{FrameQueue, OverflowPolicy, PushOutcome, QueueStats};
pub use manager::{QueueKind, QueueManager};
