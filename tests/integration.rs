//! Integration tests for serial-bridge.
//!
//! These run a full bridge against the in-memory serial device and a
//! channel-backed remote link.

use std::time::Duration;

use bytes::Bytes;
use serde_json::json;
use serial_bridge::link::ChannelLink;
use serial_bridge::transport::{memory_serial, MemoryDevice};
use serial_bridge::{Bridge, BridgeConfig, BridgeContext, BridgeError, BridgeStatus, StatusEvent};
use tokio::sync::{broadcast, mpsc};

const WAIT: Duration = Duration::from_secs(3);

struct Running {
    bridge: Bridge,
    device: MemoryDevice,
    uplink: mpsc::Receiver<Bytes>,
}

fn test_config() -> BridgeConfig {
    BridgeConfig {
        pause_cooldown_ms: 200,
        link_retry_ms: 50,
        ..BridgeConfig::default()
    }
}

async fn start(config: BridgeConfig, link_capacity: usize) -> Running {
    let (transport, device) = memory_serial();
    let (link, uplink) = ChannelLink::new(link_capacity);
    let bridge = Bridge::builder(config)
        .transport(transport)
        .link(link)
        .start()
        .await
        .unwrap();
    Running {
        bridge,
        device,
        uplink,
    }
}

async fn recv_frame(uplink: &mut mpsc::Receiver<Bytes>) -> Bytes {
    tokio::time::timeout(WAIT, uplink.recv())
        .await
        .expect("timed out waiting for uplink frame")
        .expect("uplink closed")
}

async fn expect_status(events: &mut broadcast::Receiver<StatusEvent>, wanted: StatusEvent) {
    tokio::time::timeout(WAIT, async {
        loop {
            if events.recv().await.unwrap() == wanted {
                return;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {:?}", wanted));
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

/// Let the control loop work through posted events.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_serial_bytes_reach_uplink() {
    let mut t = start(test_config(), 8).await;

    t.device.inject(b"hello");

    assert_eq!(recv_frame(&mut t.uplink).await, Bytes::from_static(b"hello"));
    let report = t.bridge.handle().status().await.unwrap();
    assert_eq!(report.rx.stats.msg_sent, 1);
    assert_eq!(report.rx.stats.bytes_sent, 5);

    t.bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_remote_frames_reach_serial() {
    let t = start(test_config(), 8).await;

    t.bridge.handle().deliver(Bytes::from_static(b"AT")).await.unwrap();
    t.bridge.handle().deliver(Bytes::from_static(b"ATZ")).await.unwrap();

    let device = t.device.clone();
    wait_until(|| device.written().len() == 2).await;
    assert_eq!(
        t.device.written(),
        vec![Bytes::from_static(b"AT"), Bytes::from_static(b"ATZ")]
    );

    t.bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_delimited_framing_from_config() {
    let mut t = start(test_config(), 8).await;

    t.bridge
        .handle()
        .set("PayloadMode", json!("delimited"))
        .await
        .unwrap();
    settle().await;

    t.device.inject(b"one:two:thr");
    t.device.inject(b"ee:");

    assert_eq!(recv_frame(&mut t.uplink).await, Bytes::from_static(b"one"));
    assert_eq!(recv_frame(&mut t.uplink).await, Bytes::from_static(b"two"));
    assert_eq!(recv_frame(&mut t.uplink).await, Bytes::from_static(b"three"));

    t.bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_read_failure_pauses_then_recovers() {
    let t = start(test_config(), 8).await;
    let mut events = t.bridge.handle().subscribe();

    t.device.disconnect();

    expect_status(&mut events, StatusEvent::Paused).await;
    let report = t.bridge.handle().status().await.unwrap();
    assert_eq!(report.status, Some(BridgeStatus::Paused));
    assert_eq!(report.pause_count, 1);

    // Re-enabled from configuration once the cool-down expires.
    expect_status(&mut events, StatusEvent::Enabled).await;
    assert_eq!(t.device.open_count(), 2);
    assert!(t.device.is_open());

    t.bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_diagnostic_pause_expires() {
    let t = start(test_config(), 8).await;
    let mut events = t.bridge.handle().subscribe();

    let report = t
        .bridge
        .handle()
        .disable(Some(Duration::from_millis(150)))
        .await
        .unwrap();
    assert_eq!(report.status, Some(BridgeStatus::Paused));
    assert_eq!(report.pause_count, 1);
    assert!(!report.serial_open);

    expect_status(&mut events, StatusEvent::Paused).await;
    expect_status(&mut events, StatusEvent::Enabled).await;

    t.bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_tx_held_while_disabled() {
    let t = start(test_config(), 8).await;
    let mut events = t.bridge.handle().subscribe();

    t.bridge.handle().set("Enabled", json!(false)).await.unwrap();
    expect_status(&mut events, StatusEvent::Disabled).await;
    assert!(!t.device.is_open());

    t.bridge.handle().deliver(Bytes::from_static(b"queued")).await.unwrap();
    settle().await;
    assert!(t.device.written().is_empty());
    assert_eq!(t.bridge.handle().status().await.unwrap().tx.depth, 1);

    t.bridge.handle().set("Enabled", json!(true)).await.unwrap();
    expect_status(&mut events, StatusEvent::Enabled).await;

    let device = t.device.clone();
    wait_until(|| !device.written().is_empty()).await;
    assert_eq!(t.device.written(), vec![Bytes::from_static(b"queued")]);

    t.bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rx_overflow_while_link_busy() {
    let config = BridgeConfig {
        rx_queue_size: 3,
        ..test_config()
    };
    let mut t = start(config, 1).await;
    let mut events = t.bridge.handle().subscribe();
    t.bridge
        .handle()
        .set("PayloadMode", json!("delimited"))
        .await
        .unwrap();
    settle().await;

    // Six frames in one read: the queue keeps the three newest.
    t.device.inject(b"1:2:3:4:5:6:");

    expect_status(&mut events, StatusEvent::RxDataLost).await;
    let mut received = Vec::new();
    for _ in 0..3 {
        received.push(recv_frame(&mut t.uplink).await);
    }
    assert_eq!(
        received,
        vec![
            Bytes::from_static(b"4"),
            Bytes::from_static(b"5"),
            Bytes::from_static(b"6")
        ]
    );

    let report = t.bridge.handle().status().await.unwrap();
    assert_eq!(report.rx.stats.msg_lost, 3);
    assert_eq!(report.rx.stats.bytes_lost, 3);
    assert_eq!(report.rx.stats.msg_sent, 3);
    assert_eq!(report.rx.depth, 0);

    t.bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_registered_source_feeds_tx() {
    let t = start(test_config(), 8).await;

    let (_id, aux) = t.bridge.handle().registrar().register(
        "aux",
        4,
        |ctx: &mut BridgeContext, payload: Bytes| -> serial_bridge::Result<()> {
            let upper = Bytes::from(payload.to_ascii_uppercase());
            ctx.enqueue(serial_bridge::queue::QueueKind::Tx, upper);
            Ok(())
        },
    );
    aux.send(Bytes::from_static(b"ping")).await.unwrap();

    let device = t.device.clone();
    wait_until(|| !device.written().is_empty()).await;
    assert_eq!(t.device.written(), vec![Bytes::from_static(b"PING")]);

    t.bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failing_source_pauses_bridge() {
    let t = start(test_config(), 8).await;
    let mut events = t.bridge.handle().subscribe();

    let (id, faulty) = t.bridge.handle().registrar().register(
        "faulty",
        4,
        |_: &mut BridgeContext, _: Bytes| -> serial_bridge::Result<()> {
            Err(BridgeError::Link("rejected".into()))
        },
    );
    faulty.send(Bytes::from_static(b"x")).await.unwrap();

    expect_status(&mut events, StatusEvent::Paused).await;
    expect_status(&mut events, StatusEvent::Enabled).await;

    // Once unregistered, payloads no longer reach the handler.
    t.bridge.handle().registrar().unregister(id);
    settle().await;
    assert!(faulty.send(Bytes::from_static(b"y")).await.is_err());
    assert_eq!(t.bridge.handle().status().await.unwrap().pause_count, 1);

    t.bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_config_is_ignored() {
    let t = start(test_config(), 8).await;

    t.bridge.handle().set("Colour", json!("blue")).await.unwrap();
    t.bridge.handle().set("RxQueueSize", json!(0)).await.unwrap();
    settle().await;

    let report = t.bridge.handle().status().await.unwrap();
    assert_eq!(report.status, Some(BridgeStatus::Enabled));
    assert_eq!(report.rx.size, BridgeConfig::default().rx_queue_size);

    t.bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_flushes_partial_frame() {
    let mut t = start(test_config(), 8).await;
    t.bridge
        .handle()
        .set("PayloadMode", json!("delimited"))
        .await
        .unwrap();
    settle().await;

    t.device.inject(b"tail-without-delimiter");
    settle().await;

    let report = t.bridge.shutdown().await.unwrap();
    assert!(!report.serial_open);
    assert!(!t.device.is_open());
    assert_eq!(
        recv_frame(&mut t.uplink).await,
        Bytes::from_static(b"tail-without-delimiter")
    );
}

#[tokio::test]
async fn test_start_disabled_then_enable() {
    let config = BridgeConfig {
        enabled: false,
        ..test_config()
    };
    let t = start(config, 8).await;
    assert!(!t.device.is_open());

    let report = t.bridge.handle().enable(None).await.unwrap();

    assert_eq!(report.status, Some(BridgeStatus::Enabled));
    assert!(t.device.is_open());
    t.bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_enable_failure_reported() {
    let config = BridgeConfig {
        enabled: false,
        ..test_config()
    };
    let t = start(config, 8).await;
    t.device.fail_open(true);

    let result = t.bridge.handle().enable(None).await;

    assert!(result.is_err());
    let report = t.bridge.handle().status().await.unwrap();
    assert_eq!(report.status, Some(BridgeStatus::Disabled));
    t.bridge.shutdown().await.unwrap();
}
