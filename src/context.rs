//! State shared by every handler on the control loop.
//!
//! [`BridgeContext`] is owned by the dispatcher and lent to each handler in
//! turn. It holds the live configuration, both queues, the serial bridge,
//! the status controller and the remote link, and implements the operations
//! handlers need:
//! - `set_status` - drive the enable/disable/pause state machine
//! - `enqueue` - push a frame, reporting any loss
//! - `flush_rx` / `flush_tx` - drain the queues towards the link and the wire
//! - `on_serial_event`, `on_config_batch`, `on_config_event`, `on_timer` -
//!   the core event sources
//! - `execute` - diagnostic commands

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::{apply_changes, BridgeConfig, ConfigEvent, PropertyChange};
use crate::control::{DiagnosticCommand, QueueReport, StatusReport};
use crate::dispatch::Registrar;
use crate::error::{BridgeError, Result};
use crate::framing::Frame;
use crate::link::RemoteLink;
use crate::queue::{QueueKind, QueueManager};
use crate::serial::{Received, SerialBridge, SerialEvent};
use crate::status::{BridgeStatus, StatusController, StatusEvent, StatusNotifier};

/// Everything the control loop owns.
pub struct BridgeContext {
    config: BridgeConfig,
    queues: QueueManager,
    serial: SerialBridge,
    status: StatusController,
    link: Box<dyn RemoteLink>,
    notifier: StatusNotifier,
    registrar: Registrar,
    posted: mpsc::UnboundedSender<ConfigEvent>,
    /// Set while the link is backing off after a refused frame.
    link_retry_at: Option<Instant>,
}

impl BridgeContext {
    pub(crate) fn new(
        config: BridgeConfig,
        serial: SerialBridge,
        link: Box<dyn RemoteLink>,
        notifier: StatusNotifier,
        registrar: Registrar,
        posted: mpsc::UnboundedSender<ConfigEvent>,
    ) -> Self {
        let mut queues =
            QueueManager::new(config.rx_queue_size, config.tx_queue_size, config.tx_overflow);
        queues.reset();

        Self {
            config,
            queues,
            serial,
            status: StatusController::new(notifier.clone()),
            link,
            notifier,
            registrar,
            posted,
            link_retry_at: None,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn queues(&self) -> &QueueManager {
        &self.queues
    }

    pub fn status(&self) -> Option<BridgeStatus> {
        self.status.current()
    }

    pub fn pause_count(&self) -> u64 {
        self.status.pause_count()
    }

    pub fn is_serial_open(&self) -> bool {
        self.serial.is_open()
    }

    /// Register or unregister sources from inside a handler.
    pub fn registrar(&self) -> &Registrar {
        &self.registrar
    }

    pub fn notifier(&self) -> &StatusNotifier {
        &self.notifier
    }

    /// Request a bridge state. See [`StatusController::set_status`].
    pub fn set_status(&mut self, enabled: bool, timeout: Option<Duration>) -> Result<()> {
        self.status.set_status(enabled, timeout, &mut self.serial)
    }

    /// Push a frame onto a queue.
    ///
    /// Evictions and rejections are accounted as lost and announced; they
    /// are never reported as errors. Returns whether the frame was queued.
    pub fn enqueue(&mut self, kind: QueueKind, frame: Frame) -> bool {
        enqueue(&mut self.queues, &self.notifier, kind, frame)
    }

    /// Hand RxQ frames to the remote link until it refuses one.
    ///
    /// A refused frame stays at the head of the queue and the link is left
    /// alone until the retry delay has passed.
    pub fn flush_rx(&mut self) {
        if let Some(at) = self.link_retry_at {
            if Instant::now() < at {
                return;
            }
            self.link_retry_at = None;
        }

        while let Some(frame) = self.queues.front(QueueKind::Rx).cloned() {
            match self.link.send(&frame) {
                Ok(()) => {
                    self.queues.pop(QueueKind::Rx);
                }
                Err(e) => {
                    let delay = self.config.link_retry();
                    tracing::warn!(
                        queued = self.queues.len(QueueKind::Rx),
                        ?delay,
                        "Remote link refused frame: {}",
                        e
                    );
                    self.link_retry_at = Some(Instant::now() + delay);
                    break;
                }
            }
        }
    }

    /// Write TxQ frames to the serial device while it is open.
    ///
    /// A failed write leaves the frame at the head of the queue and is
    /// returned so the caller can pause the bridge.
    pub fn flush_tx(&mut self) -> Result<()> {
        if !self.serial.is_open() {
            return Ok(());
        }

        while let Some(frame) = self.queues.front(QueueKind::Tx).cloned() {
            self.serial.write(&frame)?;
            self.queues.pop(QueueKind::Tx);
        }
        Ok(())
    }

    /// Frame serial data into RxQ.
    pub fn on_serial_event(&mut self, event: SerialEvent) -> Result<()> {
        match self.serial.handle_event(event)? {
            Received::Frames(frames) => {
                for frame in frames {
                    self.enqueue(QueueKind::Rx, frame);
                }
            }
            Received::Stale(bytes) => {
                self.queues.record_lost(QueueKind::Rx, &bytes);
                self.notifier.notify(StatusEvent::RxDataLost);
            }
            Received::Nothing => {}
        }
        Ok(())
    }

    /// Apply a configuration batch and post the resulting events.
    pub fn on_config_batch(&mut self, batch: &[PropertyChange]) {
        for event in apply_changes(&mut self.config, batch) {
            tracing::debug!(?event, "Posting configuration event");
            // The receiver lives in the dispatcher that owns this context.
            let _ = self.posted.send(event);
        }
    }

    /// React to one classified configuration event.
    pub fn on_config_event(&mut self, event: ConfigEvent) -> Result<()> {
        match event {
            ConfigEvent::Status => {
                let enabled = self.config.enabled;
                self.set_status(enabled, None)
            }
            ConfigEvent::QueueSize { rx, tx } => {
                if rx {
                    self.resize(QueueKind::Rx, self.config.rx_queue_size);
                }
                if tx {
                    self.queues.set_policy(QueueKind::Tx, self.config.tx_overflow);
                    self.resize(QueueKind::Tx, self.config.tx_queue_size);
                }
                Ok(())
            }
            ConfigEvent::SerialConfig => {
                let leftover = self.serial.reconfigure(self.config.serial.clone())?;
                if let Some(frame) = leftover {
                    self.enqueue(QueueKind::Rx, frame);
                }
                tracing::info!(
                    read_size = self.config.serial.read_size,
                    mode = ?self.config.serial.payload_mode,
                    baud = self.config.serial.baud_rate,
                    "Serial configuration applied"
                );
                Ok(())
            }
        }
    }

    fn resize(&mut self, kind: QueueKind, size: usize) {
        if !self.queues.set_size(kind, size) {
            tracing::warn!(queue = %kind, size, "Queue shrink discarded frames");
            self.notifier.notify(StatusEvent::data_lost(kind));
        } else {
            tracing::debug!(queue = %kind, size, "Queue resized");
        }
    }

    /// Earliest pending deadline: status re-evaluation or link retry.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.status.deadline(), self.link_retry_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fire expired deadlines.
    ///
    /// An expired status deadline re-applies the configured enablement.
    pub fn on_timer(&mut self, now: Instant) -> Result<()> {
        if self.status.take_expired(now) {
            let enabled = self.config.enabled;
            tracing::debug!(enabled, "Status timer expired, re-evaluating");
            self.set_status(enabled, None)?;
        }
        // An expired link back-off is cleared by the next flush_rx.
        Ok(())
    }

    /// Pause after a handler failure.
    ///
    /// If the bridge cannot pause (it is already Disabled, e.g. after an
    /// open failure) the re-evaluation timer is armed anyway, so the bridge
    /// retries on its own after the cool-down.
    pub fn on_handler_failure(&mut self, source: &str, error: &BridgeError) {
        let cooldown = self.config.pause_cooldown();
        tracing::error!(source, ?cooldown, "Handler failed: {}", error);

        if let Err(e) = self.set_status(false, Some(cooldown)) {
            tracing::error!(source, "Pause after failure also failed: {}", e);
        }
        if !self.status.is_armed() {
            self.status.arm(cooldown);
        }
    }

    /// Run a diagnostic command and report the resulting state.
    pub fn execute(&mut self, command: DiagnosticCommand) -> Result<StatusReport> {
        match command {
            DiagnosticCommand::Enable(timeout) => self.set_status(true, timeout)?,
            DiagnosticCommand::Disable(timeout) => self.set_status(false, timeout)?,
            DiagnosticCommand::Status => {}
        }
        Ok(self.report())
    }

    pub fn report(&self) -> StatusReport {
        StatusReport {
            status: self.status.current(),
            pause_count: self.status.pause_count(),
            serial_open: self.serial.is_open(),
            rx: self.queue_report(QueueKind::Rx),
            tx: self.queue_report(QueueKind::Tx),
        }
    }

    fn queue_report(&self, kind: QueueKind) -> QueueReport {
        let queue = self.queues.queue(kind);
        QueueReport {
            depth: queue.len(),
            size: queue.size(),
            policy: queue.policy(),
            stats: queue.stats(),
        }
    }

    /// Close the serial side ahead of a shutdown.
    ///
    /// The caller should feed the remaining serial events back in while
    /// [`is_serial_draining`](Self::is_serial_draining) holds, then make a
    /// last attempt to drain RxQ with [`finish_shutdown`](Self::finish_shutdown).
    pub(crate) fn shutdown(&mut self) {
        if let Err(e) = self.serial.close() {
            tracing::warn!("Serial close on shutdown failed: {}", e);
        }
    }

    pub(crate) fn is_serial_draining(&self) -> bool {
        self.serial.is_draining()
    }

    /// Last attempt to hand RxQ to the link, ignoring any back-off.
    pub(crate) fn finish_shutdown(&mut self) {
        self.link_retry_at = None;
        self.flush_rx();
    }

    /// Inbound payloads from the remote side go to TxQ.
    pub(crate) fn deliver_inbound(&mut self, payload: Bytes) -> Result<()> {
        self.enqueue(QueueKind::Tx, payload);
        Ok(())
    }
}

impl std::fmt::Debug for BridgeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeContext")
            .field("config", &self.config)
            .field("queues", &self.queues)
            .field("serial", &self.serial)
            .field("status", &self.status)
            .field("link_retry_at", &self.link_retry_at)
            .finish()
    }
}

fn enqueue(queues: &mut QueueManager, notifier: &StatusNotifier, kind: QueueKind, frame: Frame) -> bool {
    let len = frame.len();
    let outcome = queues.push(kind, frame.clone());

    if outcome.lost_data() {
        tracing::debug!(queue = %kind, ?outcome, "Queue full, evicted oldest");
        notifier.notify(StatusEvent::data_lost(kind));
    }
    if !outcome.is_accepted() {
        tracing::debug!(queue = %kind, len, "Queue full, frame rejected");
        queues.record_lost(kind, &frame);
        notifier.notify(StatusEvent::data_lost(kind));
    }
    outcome.is_accepted()
}
