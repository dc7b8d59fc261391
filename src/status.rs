//! Enable/disable/pause state machine.
//!
//! [`StatusController`] decides whether the serial side of the bridge is
//! active. It opens and closes the bridge through the [`BridgeResource`]
//! trait, keeps a one-shot re-evaluation deadline, and publishes every state
//! change except the very first on a [`StatusNotifier`].
//!
//! ```text
//!             enable                        disable(t > 0)
//! Disabled ───────────► Enabled ────────────────────────► Paused
//!    ▲                   │  ▲                               │  │
//!    └────── disable ────┘  └────── enable / expiry ────────┘  │
//!    ▲                                                         │
//!    └──────────────────── disable / expiry ───────────────────┘
//! ```
//!
//! Disabled never moves to Paused. A delayed enable requested while Disabled
//! arms the deadline and leaves the state Disabled.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::Result;
use crate::queue::QueueKind;

/// Default capacity of the status notification channel.
pub const DEFAULT_NOTIFY_CAPACITY: usize = 64;

/// Current bridge state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeStatus {
    Disabled,
    Enabled,
    Paused,
}

impl fmt::Display for BridgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeStatus::Disabled => f.write_str("disabled"),
            BridgeStatus::Enabled => f.write_str("enabled"),
            BridgeStatus::Paused => f.write_str("paused"),
        }
    }
}

/// Outbound link-health signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusEvent {
    Enabled,
    Disabled,
    Paused,
    RxDataLost,
    TxDataLost,
}

impl From<BridgeStatus> for StatusEvent {
    fn from(status: BridgeStatus) -> Self {
        match status {
            BridgeStatus::Disabled => StatusEvent::Disabled,
            BridgeStatus::Enabled => StatusEvent::Enabled,
            BridgeStatus::Paused => StatusEvent::Paused,
        }
    }
}

impl StatusEvent {
    /// Loss event for a queue.
    pub fn data_lost(kind: QueueKind) -> Self {
        match kind {
            QueueKind::Rx => StatusEvent::RxDataLost,
            QueueKind::Tx => StatusEvent::TxDataLost,
        }
    }
}

/// Fan-out of [`StatusEvent`]s to external collaborators.
///
/// Cheaply cloneable; all clones feed the same channel.
#[derive(Debug, Clone)]
pub struct StatusNotifier {
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn notify(&self, event: StatusEvent) {
        // No subscribers is normal while nothing is listening.
        if self.tx.send(event).is_err() {
            tracing::trace!(?event, "No status subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }
}

impl Default for StatusNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFY_CAPACITY)
    }
}

/// The thing the controller switches on and off.
pub trait BridgeResource {
    fn open(&mut self) -> Result<()>;

    /// Close the resource. Closing an already closed resource succeeds.
    fn close(&mut self) -> Result<()>;
}

/// Enable/disable/pause state machine.
#[derive(Debug)]
pub struct StatusController {
    /// `None` until the first `set_status`.
    current: Option<BridgeStatus>,
    /// Armed re-evaluation deadline.
    deadline: Option<Instant>,
    /// Monotonic count of disable-with-delay requests.
    pause_count: u64,
    notifier: StatusNotifier,
}

impl StatusController {
    pub fn new(notifier: StatusNotifier) -> Self {
        Self {
            current: None,
            deadline: None,
            pause_count: 0,
            notifier,
        }
    }

    /// Request a state.
    ///
    /// `timeout` of `None` or zero applies immediately; a positive timeout
    /// pauses and arms the deadline instead. Errors from the resource are
    /// returned unchanged; the controller never retries on its own.
    pub fn set_status(
        &mut self,
        enabled: bool,
        timeout: Option<Duration>,
        resource: &mut dyn BridgeResource,
    ) -> Result<()> {
        let delay = timeout.filter(|t| !t.is_zero());
        if enabled {
            self.enable(delay, resource)
        } else {
            self.disable(delay, resource)
        }
    }

    fn enable(&mut self, delay: Option<Duration>, resource: &mut dyn BridgeResource) -> Result<()> {
        if self.current == Some(BridgeStatus::Enabled) {
            return Ok(());
        }

        if let Some(delay) = delay {
            self.arm(delay);
            if self.current != Some(BridgeStatus::Disabled) {
                self.transition(BridgeStatus::Paused);
            }
            tracing::debug!(?delay, status = ?self.current, "Delayed enable armed");
            return Ok(());
        }

        self.disarm();
        match resource.open() {
            Ok(()) => {
                self.transition(BridgeStatus::Enabled);
                Ok(())
            }
            Err(e) => {
                if let Err(close_err) = resource.close() {
                    tracing::debug!("Close after failed open also failed: {}", close_err);
                }
                self.transition(BridgeStatus::Disabled);
                Err(e)
            }
        }
    }

    fn disable(&mut self, delay: Option<Duration>, resource: &mut dyn BridgeResource) -> Result<()> {
        if self.current == Some(BridgeStatus::Disabled) {
            return Ok(());
        }

        if self.current == Some(BridgeStatus::Enabled) {
            resource.close()?;
        }

        match delay {
            None => {
                self.disarm();
                self.transition(BridgeStatus::Disabled);
            }
            Some(delay) => {
                self.arm(delay);
                self.pause_count += 1;
                self.transition(BridgeStatus::Paused);
            }
        }
        Ok(())
    }

    fn transition(&mut self, next: BridgeStatus) {
        let previous = self.current.replace(next);
        match previous {
            None => tracing::info!(status = %next, "Initial bridge status"),
            Some(prev) if prev != next => {
                tracing::info!(from = %prev, to = %next, "Bridge status changed");
                self.notifier.notify(next.into());
            }
            Some(_) => {}
        }
    }

    /// Arm the one-shot re-evaluation deadline, replacing any armed one.
    ///
    /// Also used by the dispatcher to schedule a retry while Disabled.
    pub fn arm(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now() + delay);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    /// Disarm and report whether the deadline has passed.
    pub fn take_expired(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    #[inline]
    pub fn current(&self) -> Option<BridgeStatus> {
        self.current
    }

    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[inline]
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    #[inline]
    pub fn pause_count(&self) -> u64 {
        self.pause_count
    }

    pub fn notifier(&self) -> &StatusNotifier {
        &self.notifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use tokio::sync::broadcast::error::TryRecvError;

    #[derive(Default)]
    struct MockResource {
        open: bool,
        fail_open: bool,
        fail_close: bool,
        opens: usize,
        closes: usize,
    }

    impl BridgeResource for MockResource {
        fn open(&mut self) -> Result<()> {
            if self.fail_open {
                return Err(BridgeError::NotOpen);
            }
            self.open = true;
            self.opens += 1;
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            if self.fail_close {
                return Err(BridgeError::Link("close refused".into()));
            }
            self.open = false;
            self.closes += 1;
            Ok(())
        }
    }

    fn controller() -> (StatusController, broadcast::Receiver<StatusEvent>) {
        let notifier = StatusNotifier::new(16);
        let rx = notifier.subscribe();
        (StatusController::new(notifier), rx)
    }

    fn drain(rx: &mut broadcast::Receiver<StatusEvent>) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(e) => events.push(e),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return events,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
    }

    #[test]
    fn test_initial_state_undefined() {
        let (ctrl, _rx) = controller();
        assert_eq!(ctrl.current(), None);
        assert!(!ctrl.is_armed());
        assert_eq!(ctrl.pause_count(), 0);
    }

    #[test]
    fn test_first_transition_not_notified() {
        let (mut ctrl, mut rx) = controller();
        let mut res = MockResource::default();

        ctrl.set_status(true, None, &mut res).unwrap();

        assert_eq!(ctrl.current(), Some(BridgeStatus::Enabled));
        assert!(res.open);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_enable_disable_notifies() {
        let (mut ctrl, mut rx) = controller();
        let mut res = MockResource::default();

        ctrl.set_status(false, None, &mut res).unwrap();
        ctrl.set_status(true, None, &mut res).unwrap();
        ctrl.set_status(false, None, &mut res).unwrap();

        assert_eq!(ctrl.current(), Some(BridgeStatus::Disabled));
        assert_eq!(
            drain(&mut rx),
            vec![StatusEvent::Enabled, StatusEvent::Disabled]
        );
        assert_eq!(res.opens, 1);
        assert_eq!(res.closes, 1);
    }

    #[test]
    fn test_enable_when_enabled_is_noop() {
        let (mut ctrl, mut rx) = controller();
        let mut res = MockResource::default();

        ctrl.set_status(true, None, &mut res).unwrap();
        ctrl.set_status(true, None, &mut res).unwrap();
        ctrl.set_status(true, Some(Duration::from_secs(3)), &mut res).unwrap();

        assert_eq!(res.opens, 1);
        assert!(!ctrl.is_armed());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_open_failure_forces_disabled() {
        let (mut ctrl, _rx) = controller();
        let mut res = MockResource {
            fail_open: true,
            ..Default::default()
        };

        let result = ctrl.set_status(true, Some(Duration::ZERO), &mut res);

        assert!(result.is_err());
        assert_eq!(ctrl.current(), Some(BridgeStatus::Disabled));
        assert!(!res.open);
        assert_eq!(res.closes, 1);
        assert!(!ctrl.is_armed());
    }

    #[test]
    fn test_open_failure_from_paused_disarms_and_notifies() {
        let (mut ctrl, mut rx) = controller();
        let mut res = MockResource::default();
        ctrl.set_status(true, None, &mut res).unwrap();
        ctrl.set_status(false, Some(Duration::from_secs(5)), &mut res).unwrap();
        drain(&mut rx);

        res.fail_open = true;
        assert!(ctrl.set_status(true, None, &mut res).is_err());

        assert_eq!(ctrl.current(), Some(BridgeStatus::Disabled));
        assert!(!ctrl.is_armed());
        assert_eq!(drain(&mut rx), vec![StatusEvent::Disabled]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_with_timeout_pauses() {
        let (mut ctrl, mut rx) = controller();
        let mut res = MockResource::default();
        ctrl.set_status(true, None, &mut res).unwrap();

        let before = Instant::now();
        ctrl.set_status(false, Some(Duration::from_secs(10)), &mut res).unwrap();

        assert_eq!(ctrl.current(), Some(BridgeStatus::Paused));
        assert_eq!(ctrl.pause_count(), 1);
        assert!(!res.open);
        assert_eq!(ctrl.deadline(), Some(before + Duration::from_secs(10)));
        assert_eq!(drain(&mut rx), vec![StatusEvent::Paused]);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!ctrl.take_expired(Instant::now()));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(ctrl.take_expired(Instant::now()));
        assert!(!ctrl.is_armed());
    }

    #[test]
    fn test_close_failure_leaves_state() {
        let (mut ctrl, mut rx) = controller();
        let mut res = MockResource::default();
        ctrl.set_status(true, None, &mut res).unwrap();
        res.fail_close = true;

        let result = ctrl.set_status(false, Some(Duration::from_secs(1)), &mut res);

        assert!(result.is_err());
        assert_eq!(ctrl.current(), Some(BridgeStatus::Enabled));
        assert_eq!(ctrl.pause_count(), 0);
        assert!(!ctrl.is_armed());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_disabled_never_pauses() {
        let (mut ctrl, mut rx) = controller();
        let mut res = MockResource::default();
        ctrl.set_status(false, None, &mut res).unwrap();

        ctrl.set_status(false, Some(Duration::from_secs(5)), &mut res).unwrap();
        assert_eq!(ctrl.current(), Some(BridgeStatus::Disabled));
        assert!(!ctrl.is_armed());

        ctrl.set_status(true, Some(Duration::from_secs(5)), &mut res).unwrap();
        assert_eq!(ctrl.current(), Some(BridgeStatus::Disabled));
        assert!(ctrl.is_armed());
        assert_eq!(res.opens, 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_delayed_enable_from_enabled_path() {
        let (mut ctrl, mut rx) = controller();
        let mut res = MockResource::default();
        ctrl.set_status(true, None, &mut res).unwrap();
        ctrl.set_status(false, Some(Duration::from_secs(1)), &mut res).unwrap();

        // Re-arming while paused keeps the state and counts no new pause.
        ctrl.set_status(true, Some(Duration::from_secs(30)), &mut res).unwrap();

        assert_eq!(ctrl.current(), Some(BridgeStatus::Paused));
        assert_eq!(ctrl.pause_count(), 1);
        assert!(ctrl.is_armed());
        assert_eq!(drain(&mut rx), vec![StatusEvent::Paused]);
    }

    #[test]
    fn test_paused_to_enabled_and_disabled() {
        let (mut ctrl, mut rx) = controller();
        let mut res = MockResource::default();
        ctrl.set_status(true, None, &mut res).unwrap();
        ctrl.set_status(false, Some(Duration::from_secs(1)), &mut res).unwrap();

        ctrl.set_status(true, None, &mut res).unwrap();
        assert_eq!(ctrl.current(), Some(BridgeStatus::Enabled));
        assert!(!ctrl.is_armed());

        ctrl.set_status(false, Some(Duration::from_secs(1)), &mut res).unwrap();
        ctrl.set_status(false, None, &mut res).unwrap();
        assert_eq!(ctrl.current(), Some(BridgeStatus::Disabled));
        assert!(!ctrl.is_armed());
        assert_eq!(ctrl.pause_count(), 2);
        assert_eq!(res.closes, 2);

        assert_eq!(
            drain(&mut rx),
            vec![
                StatusEvent::Paused,
                StatusEvent::Enabled,
                StatusEvent::Paused,
                StatusEvent::Disabled
            ]
        );
    }

    #[test]
    fn test_pause_while_paused_counts() {
        let (mut ctrl, _rx) = controller();
        let mut res = MockResource::default();
        ctrl.set_status(true, None, &mut res).unwrap();

        ctrl.set_status(false, Some(Duration::from_secs(1)), &mut res).unwrap();
        ctrl.set_status(false, Some(Duration::from_secs(1)), &mut res).unwrap();

        assert_eq!(ctrl.pause_count(), 2);
        // Only the Enabled → Paused step touched the resource.
        assert_eq!(res.closes, 1);
    }

    #[test]
    fn test_random_sequences_never_pause_from_disabled() {
        let (mut ctrl, _rx) = controller();
        let mut res = MockResource::default();
        let timeouts = [None, Some(Duration::ZERO), Some(Duration::from_secs(2))];

        // Deterministic pseudo-random walk over requests and resource faults.
        let mut seed: u32 = 0x2545_f491;
        for _ in 0..2000 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let enabled = seed & 1 == 0;
            let timeout = timeouts[((seed >> 1) % 3) as usize];
            res.fail_open = (seed >> 4) % 5 == 0;
            res.fail_close = (seed >> 7) % 7 == 0;

            let before = ctrl.current();
            let _ = ctrl.set_status(enabled, timeout, &mut res);
            let after = ctrl.current();

            assert!(after.is_some());
            assert!(
                !(before == Some(BridgeStatus::Disabled) && after == Some(BridgeStatus::Paused)),
                "Disabled moved to Paused"
            );
            if after == Some(BridgeStatus::Paused) {
                assert!(ctrl.is_armed(), "Paused without deadline");
            }
            assert_eq!(after == Some(BridgeStatus::Enabled), res.open);
        }
    }

    #[test]
    fn test_status_event_names() {
        assert_eq!(
            serde_json::to_string(&StatusEvent::RxDataLost).unwrap(),
            "\"rx_data_lost\""
        );
        assert_eq!(StatusEvent::data_lost(QueueKind::Tx), StatusEvent::TxDataLost);
        assert_eq!(StatusEvent::from(BridgeStatus::Paused), StatusEvent::Paused);
    }
}
