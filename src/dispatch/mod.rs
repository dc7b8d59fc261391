//! The control loop.
//!
//! [`EventDispatcher`] owns the [`BridgeContext`] and waits in a single
//! `tokio::select!` on every event source:
//!
//! ```text
//! config batches ──┐
//! posted events ───┤
//! status timer ────┤
//! registrations ───┼──► select! ──► handler(&mut BridgeContext) ──► flush Rx/Tx
//! serial events ───┤                    │
//! commands ────────┤                    └─ Err ──► pause for cool-down
//! sources ─────────┘
//! ```
//!
//! Handlers run to completion one at a time, so nothing in the context needs
//! a lock. A handler error is logged with the name of the source that
//! produced it and pauses the bridge for the configured cool-down.

mod registry;

pub use registry::{Registrar, SourceHandler, SourceId, SourceRegistry};

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use crate::config::{ConfigEvent, PropertyChange};
use crate::context::BridgeContext;
use crate::control::{DiagnosticCommand, StatusReport};
use crate::error::{BridgeError, Result};
use crate::serial::SerialEvent;

/// How far out the timer branch sleeps when nothing is armed.
const IDLE_TIMER: Duration = Duration::from_secs(3600);

/// Upper bound on waiting for closed readers to stop during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Request sent to the control loop by a bridge handle.
#[derive(Debug)]
pub enum Control {
    Command {
        command: DiagnosticCommand,
        reply: oneshot::Sender<Result<StatusReport>>,
    },
    Shutdown {
        reply: oneshot::Sender<StatusReport>,
    },
}

/// Receiving ends of the core event sources.
#[derive(Debug)]
pub struct CoreSources {
    pub config: mpsc::Receiver<Vec<PropertyChange>>,
    pub posted: mpsc::UnboundedReceiver<ConfigEvent>,
    pub serial: mpsc::Receiver<SerialEvent>,
    pub control: mpsc::Receiver<Control>,
}

/// Single-consumer control loop.
pub struct EventDispatcher {
    ctx: BridgeContext,
    registry: SourceRegistry,
    sources: CoreSources,
}

impl EventDispatcher {
    pub fn new(ctx: BridgeContext, sources: CoreSources) -> Self {
        let registry = SourceRegistry::new(ctx.registrar().clone());
        Self {
            ctx,
            registry,
            sources,
        }
    }

    pub fn context(&self) -> &BridgeContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut BridgeContext {
        &mut self.ctx
    }

    /// Run until shut down or until every bridge handle is gone.
    pub async fn run(mut self) -> Result<()> {
        let registrar = self.ctx.registrar().clone();
        self.registry.apply_staged();
        tracing::info!(sources = self.registry.len(), "Control loop started");

        loop {
            let deadline = self
                .ctx
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + IDLE_TIMER);

            tokio::select! {
                Some(batch) = self.sources.config.recv() => {
                    tracing::debug!(changes = batch.len(), "Configuration batch received");
                    self.ctx.on_config_batch(&batch);
                }
                Some(event) = self.sources.posted.recv() => {
                    if let Err(e) = self.ctx.on_config_event(event) {
                        self.ctx.on_handler_failure("config", &e);
                    }
                }
                () = sleep_until(deadline) => {
                    if let Err(e) = self.ctx.on_timer(Instant::now()) {
                        self.ctx.on_handler_failure("status-timer", &e);
                    }
                }
                () = registrar.changed() => {
                    self.registry.apply_staged();
                }
                Some(event) = self.sources.serial.recv() => {
                    if let Err(e) = self.ctx.on_serial_event(event) {
                        self.ctx.on_handler_failure("serial", &e);
                    }
                }
                request = self.sources.control.recv() => match request {
                    Some(Control::Command { command, reply }) => {
                        tracing::debug!(?command, "Diagnostic command");
                        let _ = reply.send(self.ctx.execute(command));
                    }
                    Some(Control::Shutdown { reply }) => {
                        self.stop().await;
                        let _ = reply.send(self.ctx.report());
                        break;
                    }
                    None => {
                        tracing::debug!("All bridge handles dropped");
                        self.stop().await;
                        break;
                    }
                },
                (id, payload) = self.registry.next() => {
                    self.on_source(id, payload);
                }
            }

            self.pump();
        }

        tracing::info!("Control loop stopped");
        Ok(())
    }

    /// Close the serial side, frame what its reader already posted and make
    /// a last attempt to drain RxQ.
    async fn stop(&mut self) {
        self.ctx.shutdown();

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while self.ctx.is_serial_draining() {
            match tokio::time::timeout_at(deadline, self.sources.serial.recv()).await {
                Ok(Some(event)) => {
                    if let Err(e) = self.ctx.on_serial_event(event) {
                        tracing::warn!("Serial event during shutdown failed: {}", e);
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!("Serial reader did not stop in time");
                    break;
                }
            }
        }

        self.ctx.finish_shutdown();
    }

    fn on_source(&mut self, id: SourceId, payload: Option<Bytes>) {
        let Some(payload) = payload else {
            tracing::debug!(source = self.registry.name(id).unwrap_or("?"), %id, "Source closed");
            self.registry.remove(id);
            return;
        };

        if let Err(e) = self.registry.dispatch(&mut self.ctx, id, payload) {
            let source = self
                .registry
                .name(id)
                .map(str::to_string)
                .unwrap_or_else(|| id.to_string());
            self.ctx.on_handler_failure(&source, &e);
        }
    }

    /// Move queued frames towards the link and the wire.
    fn pump(&mut self) {
        self.ctx.flush_rx();
        if let Err(e) = self.ctx.flush_tx() {
            self.ctx.on_handler_failure("serial-writer", &e);
        }
    }
}

/// Send a control request and wait for the reply.
pub(crate) async fn request<T>(
    control: &mpsc::Sender<Control>,
    build: impl FnOnce(oneshot::Sender<T>) -> Control,
) -> Result<T> {
    let (tx, rx) = oneshot::channel();
    control
        .send(build(tx))
        .await
        .map_err(|_| BridgeError::Stopped)?;
    rx.await.map_err(|_| BridgeError::Stopped)
}
