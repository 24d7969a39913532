//! Outbox durability, reconnect backoff, and degraded polling

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;

use fleetlink_core::types::{CommandKind, OutboundCommand};
use fleetlink_gateway::transport::memory::MemoryTransport;
use fleetlink_gateway::transport::{FrameSink, FrameStream, Transport, TransportError};
use fleetlink_gateway::{ConnectionState, Delivery, FallbackPoller, FleetGateway};

use crate::test_utils::{location_frame, settle, test_builder, test_config, BatchPoller};

/// Loopback transport that records when each dial happened.
struct RecordingTransport {
    inner: MemoryTransport,
    opens: Mutex<Vec<Instant>>,
}

impl RecordingTransport {
    fn new() -> Self {
        Self {
            inner: MemoryTransport::new(),
            opens: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn open(
        &self,
        endpoint: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), TransportError> {
        self.opens.lock().unwrap().push(Instant::now());
        self.inner.open(endpoint).await
    }
}

fn route_command(n: usize) -> OutboundCommand {
    OutboundCommand::new(
        format!("driver-{n}"),
        CommandKind::NewRoute,
        json!({"routeId": format!("route-{n}")}),
    )
}

#[tokio::test(start_paused = true)]
async fn test_backoff_schedule_is_exponential() {
    let transport = Arc::new(RecordingTransport::new());
    transport.inner.fail_next_opens(u32::MAX);
    let gateway = FleetGateway::builder(test_config())
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .build()
        .expect("build");

    gateway.connect().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    let opens = transport.opens.lock().unwrap();
    assert_eq!(opens.len(), 6, "initial dial plus five retries");

    let deltas: Vec<u64> = opens
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_secs())
        .collect();
    assert_eq!(deltas, vec![1, 2, 4, 8, 16]);
    assert!(gateway.connectivity().degraded_polling);
}

#[tokio::test(start_paused = true)]
async fn test_degraded_polling_fetches_on_the_interval() {
    let transport = Arc::new(MemoryTransport::new());
    transport.fail_next_opens(u32::MAX);
    let poller = Arc::new(BatchPoller::new(vec![
        vec![location_frame("d-1", -1.2921, 36.8219)],
        vec![location_frame("d-2", -4.0435, 39.6682)],
    ]));

    let gateway = test_builder(Arc::clone(&transport))
        .fallback_poller(Arc::clone(&poller) as Arc<dyn FallbackPoller>)
        .build()
        .expect("build");

    gateway.connect().await;
    // 31 seconds of backoff, then the first poll one interval later.
    tokio::time::sleep(Duration::from_secs(62)).await;
    assert_eq!(gateway.fleet().driver_count(), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(gateway.fleet().driver_count(), 2);
    assert!(gateway.connectivity().degraded_polling);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_replays_commands_queued_mid_outage() {
    let transport = Arc::new(MemoryTransport::new());
    let gateway = test_builder(Arc::clone(&transport)).build().expect("build");

    gateway.connect().await;
    drop(transport.take_peer());
    settle().await;

    let delivery = gateway.send_command(route_command(1)).await.expect("send");
    assert_eq!(delivery, Delivery::Queued);

    // The first retry fires after one second.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(gateway.state(), ConnectionState::Connected);

    let mut peer = transport.take_peer().expect("second session");
    let auth: Value =
        serde_json::from_str(&peer.outbound.recv().await.expect("frame")).expect("json");
    assert_eq!(auth["type"], "auth");

    let replayed: Value =
        serde_json::from_str(&peer.outbound.recv().await.expect("frame")).expect("json");
    assert_eq!(replayed["type"], "driver_command");
    assert_eq!(replayed["driverId"], "driver-1");
    assert_eq!(gateway.connectivity().queued_commands, 0);
}

#[tokio::test]
async fn test_outbox_survives_process_restart() {
    let path = std::env::temp_dir().join("fleetlink_it_restart.db");
    let path = path.to_str().expect("utf-8 path").to_string();
    let _ = std::fs::remove_file(&path);

    let mut config = test_config();
    config.outbox_path = path.clone();

    // First run: the link never comes up, commands accumulate.
    {
        let transport = Arc::new(MemoryTransport::new());
        let gateway = FleetGateway::builder(config.clone())
            .transport(transport)
            .build()
            .expect("build");
        gateway.send_command(route_command(1)).await.expect("send");
        gateway.send_command(route_command(2)).await.expect("send");
        assert_eq!(gateway.connectivity().queued_commands, 2);
        gateway.disconnect().await;
    }

    // Second run: a fresh gateway drains what the first one left behind.
    let transport = Arc::new(MemoryTransport::new());
    let gateway = FleetGateway::builder(config)
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .build()
        .expect("build");
    assert_eq!(gateway.connectivity().queued_commands, 2);

    gateway.connect().await;
    let mut peer = transport.take_peer().expect("peer");
    let _auth = peer.outbound.recv().await.expect("auth");

    for n in [1, 2] {
        let frame: Value =
            serde_json::from_str(&peer.outbound.recv().await.expect("frame")).expect("json");
        assert_eq!(frame["driverId"], format!("driver-{n}"));
    }
    assert_eq!(gateway.connectivity().queued_commands, 0);

    let _ = std::fs::remove_file(&path);
}

#[tokio::test(start_paused = true)]
async fn test_outage_mid_replay_keeps_unsent_commands() {
    let transport = Arc::new(MemoryTransport::new());
    let gateway = test_builder(Arc::clone(&transport)).build().expect("build");

    gateway.send_command(route_command(1)).await.expect("send");
    gateway.send_command(route_command(2)).await.expect("send");

    gateway.connect().await;
    let mut peer = transport.take_peer().expect("peer");
    let _auth = peer.outbound.recv().await.expect("auth");
    let first: Value =
        serde_json::from_str(&peer.outbound.recv().await.expect("frame")).expect("json");
    assert_eq!(first["driverId"], "driver-1");

    // Kill the link, stop the retry ladder from succeeding, and queue more.
    transport.fail_next_opens(u32::MAX);
    drop(peer);
    settle().await;

    let delivery = gateway.send_command(route_command(3)).await.expect("send");
    assert_eq!(delivery, Delivery::Queued);

    // driver-2 was replayed on the first session; driver-3 still waits.
    let snapshot = gateway.connectivity();
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert_eq!(snapshot.queued_commands, 1);
}
