//! Bridge builder and runtime handle.
//!
//! The [`BridgeBuilder`] wires the serial transport and the remote link to a
//! new control loop. [`BridgeBuilder::start`]:
//! 1. Validate the configuration
//! 2. Create (and clear) both queues
//! 3. Apply the configured enablement
//! 4. Register the remote inbound source (remote → TxQ)
//! 5. Spawn the control loop
//!
//! # Example
//!
//! ```ignore
//! use serial_bridge::{Bridge, BridgeConfig};
//! use serial_bridge::control::StdioLink;
//!
//! #[tokio::main]
//! async fn main() -> serial_bridge::Result<()> {
//!     let bridge = Bridge::builder(BridgeConfig::default())
//!         .link(StdioLink)
//!         .start()
//!         .await?;
//!
//!     bridge.handle().deliver(bytes::Bytes::from_static(b"AT\r")).await?;
//!     bridge.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::{BridgeConfig, PropertyChange};
use crate::context::BridgeContext;
use crate::control::{DiagnosticCommand, StatusReport};
use crate::dispatch::{request, Control, CoreSources, EventDispatcher, Registrar};
use crate::error::{BridgeError, Result};
use crate::link::RemoteLink;
use crate::serial::{SerialBridge, DEFAULT_EVENT_CAPACITY};
use crate::status::{StatusEvent, StatusNotifier, DEFAULT_NOTIFY_CAPACITY};
use crate::transport::{SerialTransport, SystemSerial};

/// Name of the source carrying frames from the remote side.
pub const REMOTE_INBOUND_SOURCE: &str = "remote-inbound";

/// Default capacity of the inbound and configuration channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Builder for configuring and starting a bridge.
pub struct BridgeBuilder {
    config: BridgeConfig,
    transport: Option<Box<dyn SerialTransport>>,
    link: Option<Box<dyn RemoteLink>>,
    channel_capacity: usize,
    notify_capacity: usize,
}

impl BridgeBuilder {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            transport: None,
            link: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            notify_capacity: DEFAULT_NOTIFY_CAPACITY,
        }
    }

    /// Serial transport to use. Default: [`SystemSerial`].
    pub fn transport<T: SerialTransport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Remote link for RxQ frames. Required.
    pub fn link<L: RemoteLink + 'static>(mut self, link: L) -> Self {
        self.link = Some(Box::new(link));
        self
    }

    /// Capacity of the inbound, configuration and command channels.
    ///
    /// Default: 64
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Capacity of the status notification channel.
    ///
    /// Default: 64
    pub fn notify_capacity(mut self, capacity: usize) -> Self {
        self.notify_capacity = capacity.max(1);
        self
    }

    /// Build and start the bridge.
    ///
    /// A failure to open the serial device here is not fatal: the bridge
    /// comes up Disabled and retries after the pause cool-down.
    pub async fn start(self) -> Result<Bridge> {
        self.config.validate()?;
        let link = self
            .link
            .ok_or_else(|| BridgeError::InvalidConfig("no remote link configured".to_string()))?;
        let transport: Box<dyn SerialTransport> = match self.transport {
            Some(transport) => transport,
            None => Box::new(SystemSerial::new()),
        };

        let (serial_tx, serial_rx) = mpsc::channel(DEFAULT_EVENT_CAPACITY);
        let (config_tx, config_rx) = mpsc::channel(self.channel_capacity);
        let (control_tx, control_rx) = mpsc::channel(self.channel_capacity);
        let (posted_tx, posted_rx) = mpsc::unbounded_channel();
        let notifier = StatusNotifier::new(self.notify_capacity);
        let registrar = Registrar::new();

        let serial = SerialBridge::new(transport, self.config.serial.clone(), serial_tx);
        let mut ctx = BridgeContext::new(
            self.config,
            serial,
            link,
            notifier.clone(),
            registrar.clone(),
            posted_tx,
        );

        let enabled = ctx.config().enabled;
        if let Err(e) = ctx.set_status(enabled, None) {
            ctx.on_handler_failure("startup", &e);
        }

        let (_, inbound) = registrar.register(
            REMOTE_INBOUND_SOURCE,
            self.channel_capacity,
            |ctx: &mut BridgeContext, payload: Bytes| -> Result<()> { ctx.deliver_inbound(payload) },
        );

        let dispatcher = EventDispatcher::new(
            ctx,
            CoreSources {
                config: config_rx,
                posted: posted_rx,
                serial: serial_rx,
                control: control_rx,
            },
        );
        let task = tokio::spawn(dispatcher.run());

        Ok(Bridge {
            handle: BridgeHandle {
                config: config_tx,
                control: control_tx,
                inbound,
                registrar,
                notifier,
            },
            task,
        })
    }
}

/// Cloneable handle to a running bridge.
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    config: mpsc::Sender<Vec<PropertyChange>>,
    control: mpsc::Sender<Control>,
    inbound: mpsc::Sender<Bytes>,
    registrar: Registrar,
    notifier: StatusNotifier,
}

impl BridgeHandle {
    /// Deliver a batch of changed configuration properties.
    pub async fn apply_config(&self, batch: Vec<PropertyChange>) -> Result<()> {
        self.config
            .send(batch)
            .await
            .map_err(|_| BridgeError::Stopped)
    }

    /// Change a single property.
    pub async fn set(&self, name: &str, value: Value) -> Result<()> {
        self.apply_config(vec![PropertyChange::new(name, value)])
            .await
    }

    /// Deliver a frame received from the remote side (queued on TxQ).
    pub async fn deliver(&self, frame: Bytes) -> Result<()> {
        self.inbound
            .send(frame)
            .await
            .map_err(|_| BridgeError::Stopped)
    }

    /// Sender feeding the remote inbound source.
    pub fn inbound(&self) -> mpsc::Sender<Bytes> {
        self.inbound.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.notifier.subscribe()
    }

    /// Register additional event sources.
    pub fn registrar(&self) -> &Registrar {
        &self.registrar
    }

    /// Run a diagnostic command on the control loop.
    pub async fn execute(&self, command: DiagnosticCommand) -> Result<StatusReport> {
        request(&self.control, |reply| Control::Command { command, reply }).await?
    }

    pub async fn enable(&self, timeout: Option<Duration>) -> Result<StatusReport> {
        self.execute(DiagnosticCommand::Enable(timeout)).await
    }

    pub async fn disable(&self, timeout: Option<Duration>) -> Result<StatusReport> {
        self.execute(DiagnosticCommand::Disable(timeout)).await
    }

    pub async fn status(&self) -> Result<StatusReport> {
        self.execute(DiagnosticCommand::Status).await
    }
}

/// A running bridge.
pub struct Bridge {
    handle: BridgeHandle,
    task: JoinHandle<Result<()>>,
}

impl Bridge {
    pub fn builder(config: BridgeConfig) -> BridgeBuilder {
        BridgeBuilder::new(config)
    }

    pub fn handle(&self) -> &BridgeHandle {
        &self.handle
    }

    /// Stop the control loop.
    ///
    /// Closes the serial device, makes a last attempt to drain RxQ and
    /// returns the final report.
    pub async fn shutdown(self) -> Result<StatusReport> {
        let report = request(&self.handle.control, |reply| Control::Shutdown { reply }).await?;
        self.task.await.map_err(|_| BridgeError::Stopped)??;
        Ok(report)
    }

    /// Wait for the control loop to stop on its own.
    pub async fn wait_for_shutdown(self) -> Result<()> {
        let Bridge { handle, task } = self;
        // The loop also stops once every handle is gone; drop ours.
        drop(handle);
        task.await.map_err(|_| BridgeError::Stopped)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::ChannelLink;
    use crate::status::BridgeStatus;
    use crate::transport::memory_serial;

    #[tokio::test]
    async fn test_start_requires_link() {
        let (transport, _device) = memory_serial();

        let result = Bridge::builder(BridgeConfig::default())
            .transport(transport)
            .start()
            .await;

        assert!(matches!(result, Err(BridgeError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let (transport, _device) = memory_serial();
        let (link, _rx) = ChannelLink::new(4);
        let config = BridgeConfig {
            rx_queue_size: 0,
            ..BridgeConfig::default()
        };

        let result = Bridge::builder(config)
            .transport(transport)
            .link(link)
            .start()
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let (transport, device) = memory_serial();
        let (link, _rx) = ChannelLink::new(4);

        let bridge = Bridge::builder(BridgeConfig::default())
            .transport(transport)
            .link(link)
            .start()
            .await
            .unwrap();

        let report = bridge.handle().status().await.unwrap();
        assert_eq!(report.status, Some(BridgeStatus::Enabled));
        assert!(device.is_open());

        let handle = bridge.handle().clone();
        let report = bridge.shutdown().await.unwrap();
        assert!(!report.serial_open);
        assert!(!device.is_open());
        assert!(matches!(handle.status().await, Err(BridgeError::Stopped)));
    }

    #[tokio::test]
    async fn test_start_with_absent_device() {
        let (transport, device) = memory_serial();
        device.fail_open(true);
        let (link, _rx) = ChannelLink::new(4);

        let bridge = Bridge::builder(BridgeConfig::default())
            .transport(transport)
            .link(link)
            .start()
            .await
            .unwrap();

        let report = bridge.handle().status().await.unwrap();
        assert_eq!(report.status, Some(BridgeStatus::Disabled));
        bridge.shutdown().await.unwrap();
    }

    #[test]
    fn test_builder_configuration() {
        let builder = Bridge::builder(BridgeConfig::default())
            .channel_capacity(8)
            .notify_capacity(0);

        assert_eq!(builder.channel_capacity, 8);
        assert_eq!(builder.notify_capacity, 1);
        assert!(builder.link.is_none());
    }
}
