//! Radius- and route-scoped fan-out

use std::sync::Arc;

use serde_json::{json, Value};

use fleetlink_core::geo::Coordinate;
use fleetlink_core::types::{EmergencyKind, EmergencySeverity};
use fleetlink_gateway::transport::memory::MemoryTransport;
use fleetlink_gateway::{EmergencyAdvisory, FleetGateway};

use crate::test_utils::{location_frame, settle, test_builder, StaticRoutes};

const NAIROBI: Coordinate = Coordinate { lat: -1.2921, lng: 36.8219 };
const MOMBASA: Coordinate = Coordinate { lat: -4.0435, lng: 39.6682 };

async fn gateway_with_two_drivers(
    transport: Arc<MemoryTransport>,
) -> (FleetGateway, fleetlink_gateway::transport::memory::MemoryPeer) {
    let gateway = test_builder(Arc::clone(&transport))
        .route_membership(Arc::new(StaticRoutes))
        .build()
        .expect("build");
    gateway.connect().await;

    let mut peer = transport.take_peer().expect("peer");
    let _auth = peer.outbound.recv().await.expect("auth");

    peer.inbound
        .send(location_frame("d-1", NAIROBI.lat, NAIROBI.lng))
        .expect("inject");
    peer.inbound
        .send(location_frame("d-2", MOMBASA.lat, MOMBASA.lng))
        .expect("inject");
    settle().await;

    (gateway, peer)
}

#[tokio::test]
async fn test_emergency_broadcast_targets_only_drivers_in_radius() {
    let transport = Arc::new(MemoryTransport::new());
    let (gateway, mut peer) = gateway_with_two_drivers(transport).await;

    let advisory = EmergencyAdvisory {
        kind: EmergencyKind::Accident,
        severity: EmergencySeverity::Critical,
        location: Coordinate::new(-1.3100, 36.8000),
        message: "road closed at the interchange".to_string(),
    };
    let report = gateway
        .broadcast_emergency_alert(&advisory, 50.0)
        .await
        .expect("broadcast");

    assert_eq!(report.recipients, vec!["d-1".to_string()]);
    assert_eq!(report.sent, 1);

    let frame: Value =
        serde_json::from_str(&peer.outbound.recv().await.expect("frame")).expect("json");
    assert_eq!(frame["type"], "driver_command");
    assert_eq!(frame["driverId"], "d-1");
    assert_eq!(frame["command"], "emergency_alert");
    assert_eq!(frame["data"]["severity"], "critical");
    assert_eq!(frame["data"]["message"], "road closed at the interchange");
}

#[tokio::test]
async fn test_wide_radius_reaches_the_whole_fleet() {
    let transport = Arc::new(MemoryTransport::new());
    let (gateway, _peer) = gateway_with_two_drivers(transport).await;

    let advisory = EmergencyAdvisory {
        kind: EmergencyKind::Breakdown,
        severity: EmergencySeverity::Medium,
        location: NAIROBI,
        message: "convoy stalled on the A109".to_string(),
    };
    // Nairobi to Mombasa is roughly 440 km; 500 km covers both.
    let report = gateway
        .broadcast_emergency_alert(&advisory, 500.0)
        .await
        .expect("broadcast");

    assert_eq!(report.recipients, vec!["d-1".to_string(), "d-2".to_string()]);
    assert_eq!(report.sent, 2);
}

#[tokio::test]
async fn test_weather_alert_targets_route_members_once() {
    let transport = Arc::new(MemoryTransport::new());
    let (gateway, mut peer) = gateway_with_two_drivers(transport).await;

    // d-2 rides both routes; it must still get exactly one advisory.
    let report = gateway
        .broadcast_weather_alert(
            &["r-east".to_string(), "r-west".to_string()],
            json!({"condition": "fog", "visibilityMeters": 40}),
        )
        .await
        .expect("broadcast");

    assert_eq!(report.recipients, vec!["d-1".to_string(), "d-2".to_string()]);
    assert_eq!(report.sent, 2);

    for expected in ["d-1", "d-2"] {
        let frame: Value =
            serde_json::from_str(&peer.outbound.recv().await.expect("frame")).expect("json");
        assert_eq!(frame["driverId"], expected);
        assert_eq!(frame["command"], "weather_alert");
        assert_eq!(frame["data"]["visibilityMeters"], 40);
    }
}

#[tokio::test]
async fn test_traffic_update_targets_one_route() {
    let transport = Arc::new(MemoryTransport::new());
    let (gateway, mut peer) = gateway_with_two_drivers(transport).await;

    let report = gateway
        .broadcast_traffic_update("r-west", json!({"cause": "accident", "delayMinutes": 25}))
        .await
        .expect("broadcast");

    assert_eq!(report.recipients, vec!["d-2".to_string()]);
    assert_eq!(report.sent, 1);

    let frame: Value =
        serde_json::from_str(&peer.outbound.recv().await.expect("frame")).expect("json");
    assert_eq!(frame["driverId"], "d-2");
    assert_eq!(frame["command"], "traffic_update");
    assert_eq!(frame["data"]["delayMinutes"], 25);
}

#[tokio::test]
async fn test_traffic_update_without_membership_reaches_nobody() {
    let transport = Arc::new(MemoryTransport::new());
    let gateway = test_builder(transport).build().expect("build");
    gateway.connect().await;

    let report = gateway
        .broadcast_traffic_update("r-east", json!({"cause": "flooding"}))
        .await
        .expect("broadcast");

    assert!(report.recipients.is_empty());
    assert_eq!(report.sent, 0);
    assert_eq!(report.queued, 0);
}

#[tokio::test]
async fn test_broadcast_with_no_known_locations_is_empty() {
    let transport = Arc::new(MemoryTransport::new());
    let gateway = test_builder(transport).build().expect("build");
    gateway.connect().await;

    let advisory = EmergencyAdvisory {
        kind: EmergencyKind::Security,
        severity: EmergencySeverity::High,
        location: NAIROBI,
        message: "avoid the depot".to_string(),
    };
    let report = gateway
        .broadcast_emergency_alert(&advisory, 100.0)
        .await
        .expect("broadcast");

    assert!(report.recipients.is_empty());
}
