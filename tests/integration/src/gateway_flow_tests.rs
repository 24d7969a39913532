//! Full session lifecycle over the loopback transport

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use fleetlink_core::types::{CommandKind, EmergencySeverity, OutboundCommand};
use fleetlink_gateway::transport::memory::MemoryTransport;
use fleetlink_gateway::{ConnectionState, Delivery, EmergencyHook, EventKind, GatewayEvent};

use crate::test_utils::{
    emergency_frame, location_frame, settle, test_builder, CollectingHook,
};

#[tokio::test]
async fn test_session_lifecycle_end_to_end() {
    let transport = Arc::new(MemoryTransport::new());
    let gateway = test_builder(Arc::clone(&transport)).build().expect("build");

    let states = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&states);
    gateway.subscribe(EventKind::Connectivity, move |event| {
        if let GatewayEvent::ConnectivityChanged(state) = event {
            recorder.lock().unwrap().push(*state);
        }
    });

    gateway.connect().await;
    assert_eq!(gateway.state(), ConnectionState::Connected);
    assert_eq!(
        *states.lock().unwrap(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Authenticated,
            ConnectionState::Connected,
        ]
    );

    let mut peer = transport.take_peer().expect("peer");
    let auth: Value =
        serde_json::from_str(&peer.outbound.recv().await.expect("auth")).expect("json");
    assert_eq!(auth["type"], "auth");
    assert_eq!(auth["token"], "integration-token");

    // Field unit reports in; entity state and subscribers both see it.
    let locations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&locations);
    gateway.subscribe(EventKind::LocationUpdate, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    peer.inbound
        .send(location_frame("d-1", -1.2921, 36.8219))
        .expect("inject");
    settle().await;

    assert_eq!(locations.load(Ordering::SeqCst), 1);
    let fleet = gateway.fleet();
    assert_eq!(fleet.driver_count(), 1);
    assert!(fleet.driver_location("d-1").is_some());

    // Dispatch pushes a command straight over the live link.
    let command = OutboundCommand::new("d-1", CommandKind::TrafficUpdate, json!({"delay": 15}));
    assert_eq!(gateway.send_command(command).await.expect("send"), Delivery::Sent);

    let frame: Value =
        serde_json::from_str(&peer.outbound.recv().await.expect("frame")).expect("json");
    assert_eq!(frame["type"], "driver_command");
    assert_eq!(frame["driverId"], "d-1");
    assert_eq!(frame["command"], "traffic_update");

    gateway.disconnect().await;
    assert_eq!(gateway.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_critical_emergency_reaches_hook_and_bus() {
    let transport = Arc::new(MemoryTransport::new());
    let hook = Arc::new(CollectingHook::default());
    let gateway = test_builder(Arc::clone(&transport))
        .emergency_hook(Arc::clone(&hook) as Arc<dyn EmergencyHook>)
        .build()
        .expect("build");

    let severities = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&severities);
    gateway.subscribe(EventKind::EmergencyAlert, move |event| {
        if let GatewayEvent::Emergency(emergency) = event {
            recorder.lock().unwrap().push(emergency.severity);
        }
    });

    gateway.connect().await;
    let peer = transport.take_peer().expect("peer");

    peer.inbound
        .send(emergency_frame("d-2", "medical", "critical"))
        .expect("inject");
    peer.inbound
        .send(emergency_frame("d-3", "breakdown", "low"))
        .expect("inject");
    settle().await;

    // Both alerts reach subscribers; only the critical one reaches the hook.
    assert_eq!(
        *severities.lock().unwrap(),
        vec![EmergencySeverity::Critical, EmergencySeverity::Low]
    );
    let notified = hook.events.lock().unwrap();
    assert_eq!(notified.len(), 1);
    assert_eq!(notified[0].driver_id.as_deref(), Some("d-2"));
}

#[tokio::test]
async fn test_every_inbound_envelope_is_republished_raw() {
    let transport = Arc::new(MemoryTransport::new());
    let gateway = test_builder(Arc::clone(&transport)).build().expect("build");

    let kinds = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&kinds);
    gateway.subscribe(EventKind::Raw, move |event| {
        if let GatewayEvent::Raw(envelope) = event {
            recorder.lock().unwrap().push(envelope.kind.clone());
        }
    });

    gateway.connect().await;
    let peer = transport.take_peer().expect("peer");

    peer.inbound
        .send(location_frame("d-1", -1.0, 36.0))
        .expect("inject");
    peer.inbound
        .send(r#"{"type":"driver_break","driverId":"d-1","data":{"state":"started"}}"#.to_string())
        .expect("inject");
    peer.inbound
        .send(r#"{"type":"cargo_scan","data":{"pallet":"p-1"}}"#.to_string())
        .expect("inject");
    settle().await;

    assert_eq!(
        *kinds.lock().unwrap(),
        vec![
            "location_update".to_string(),
            "driver_break".to_string(),
            "cargo_scan".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_unsubscribed_handler_stops_receiving() {
    let transport = Arc::new(MemoryTransport::new());
    let gateway = test_builder(Arc::clone(&transport)).build().expect("build");

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let handle = gateway.subscribe(EventKind::LocationUpdate, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    gateway.connect().await;
    let peer = transport.take_peer().expect("peer");

    peer.inbound
        .send(location_frame("d-1", -1.0, 36.0))
        .expect("inject");
    settle().await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    gateway.unsubscribe(handle);
    peer.inbound
        .send(location_frame("d-1", -1.1, 36.1))
        .expect("inject");
    settle().await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
