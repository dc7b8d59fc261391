//! Bounded frame queue with lifetime accounting.
//!
//! A [`FrameQueue`] holds whole frames in FIFO order up to a configurable
//! element count. When full it either rejects the new frame or evicts the
//! oldest one, depending on its [`OverflowPolicy`]. Every frame that leaves
//! the queue is accounted exactly once: as sent when the caller pops it for
//! transmission, or as lost when it is evicted, trimmed by a resize, or
//! reported lost by the caller.

use std::collections::VecDeque;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::framing::Frame;

/// What a full queue does with a new frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Refuse the new frame and leave the queue untouched.
    Reject,
    /// Drop the oldest frame to make room for the new one.
    #[serde(alias = "evict")]
    EvictOldest,
}

/// Result of a [`FrameQueue::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Frame queued, nothing lost.
    Queued,
    /// Frame queued after evicting `evicted` older frames.
    Evicted { evicted: usize },
    /// Queue full under [`OverflowPolicy::Reject`]; frame not queued.
    Rejected,
}

impl PushOutcome {
    /// Whether the pushed frame ended up in the queue.
    #[inline]
    pub fn is_accepted(&self) -> bool {
        !matches!(self, PushOutcome::Rejected)
    }

    /// Whether any frame was lost by this push.
    #[inline]
    pub fn lost_data(&self) -> bool {
        matches!(self, PushOutcome::Evicted { .. })
    }
}

/// Cumulative counters for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub bytes_sent: u64,
    pub msg_sent: u64,
    pub bytes_lost: u64,
    pub msg_lost: u64,
    pub last_sent: Option<SystemTime>,
    pub last_lost: Option<SystemTime>,
}

/// Bounded FIFO of frames.
#[derive(Debug)]
pub struct FrameQueue {
    frames: VecDeque<Frame>,
    size: usize,
    policy: OverflowPolicy,
    stats: QueueStats,
}

impl FrameQueue {
    /// Create an empty queue holding at most `size` frames.
    pub fn new(size: usize, policy: OverflowPolicy) -> Self {
        Self {
            frames: VecDeque::with_capacity(size.min(1024)),
            size,
            policy,
            stats: QueueStats::default(),
        }
    }

    /// Push a frame, applying the overflow policy if the queue is full.
    pub fn push(&mut self, frame: Frame) -> PushOutcome {
        if self.frames.len() < self.size {
            self.frames.push_back(frame);
            return PushOutcome::Queued;
        }

        match self.policy {
            OverflowPolicy::Reject => PushOutcome::Rejected,
            OverflowPolicy::EvictOldest => {
                if self.size == 0 {
                    // Nothing can ever be held; the new frame is the one lost.
                    self.record_lost(&frame);
                    return PushOutcome::Evicted { evicted: 1 };
                }
                let mut evicted = 0;
                while self.frames.len() >= self.size {
                    if let Some(old) = self.frames.pop_front() {
                        self.record_lost(&old);
                        evicted += 1;
                    }
                }
                self.frames.push_back(frame);
                PushOutcome::Evicted { evicted }
            }
        }
    }

    /// Oldest frame, without removing it.
    #[inline]
    pub fn front(&self) -> Option<&Frame> {
        self.frames.front()
    }

    /// Remove the oldest frame and account it as sent.
    ///
    /// Call this once the frame has been handed off successfully.
    pub fn pop(&mut self) -> Option<Frame> {
        let frame = self.frames.pop_front()?;
        self.stats.bytes_sent += frame.len() as u64;
        self.stats.msg_sent += 1;
        self.stats.last_sent = Some(SystemTime::now());
        Some(frame)
    }

    /// Change the maximum element count.
    ///
    /// Shrinking below the current occupancy discards the oldest excess
    /// frames, accounts them as lost and returns `false`. Growing or an
    /// unchanged size returns `true`.
    pub fn set_size(&mut self, size: usize) -> bool {
        self.size = size;
        let mut intact = true;
        while self.frames.len() > size {
            if let Some(old) = self.frames.pop_front() {
                self.record_lost(&old);
                intact = false;
            }
        }
        intact
    }

    /// Discard all frames and optionally reset counters.
    ///
    /// Discarded frames are not accounted as lost.
    pub fn clear(&mut self, reset_sent: bool, reset_lost: bool) {
        self.frames.clear();
        if reset_sent {
            self.stats.bytes_sent = 0;
            self.stats.msg_sent = 0;
            self.stats.last_sent = None;
        }
        if reset_lost {
            self.stats.bytes_lost = 0;
            self.stats.msg_lost = 0;
            self.stats.last_lost = None;
        }
    }

    /// Account a frame that never entered (or already left) the queue as lost.
    pub fn record_lost(&mut self, frame: &[u8]) {
        self.stats.bytes_lost += frame.len() as u64;
        self.stats.msg_lost += 1;
        self.stats.last_lost = Some(SystemTime::now());
    }

    pub fn set_policy(&mut self, policy: OverflowPolicy) {
        self.policy = policy;
    }

    #[inline]
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    #[inline]
    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    /// Maximum element count.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Current occupancy.
    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.size
    }

    /// Iterate frames oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }
}
