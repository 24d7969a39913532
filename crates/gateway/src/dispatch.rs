//! Outbound dispatch API: route assignment and fleet-wide advisories.
//!
//! Every operation here funnels through the gateway's send-or-queue path,
//! so dispatchers never need to care whether the link is up; a command
//! either goes out now or survives in the outbox until it can.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use fleetlink_core::geo::Coordinate;
use fleetlink_core::types::{CommandKind, EmergencyKind, EmergencySeverity, OutboundCommand};

use crate::connection::{Delivery, FleetGateway, GatewayError};

/// Route handed to a driver via `assign_route`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteDescriptor {
    /// Route identifier
    pub route_id: String,
    /// Pickup point
    pub origin: Coordinate,
    /// Drop-off point
    pub destination: Coordinate,
    /// Intermediate stops, in order
    #[serde(default)]
    pub waypoints: Vec<Coordinate>,
    /// Scheduling priority
    #[serde(default)]
    pub priority: RoutePriority,
    /// Operator notes for the driver
    #[serde(default)]
    pub special_instructions: String,
    /// Opaque customer details passed through to the field unit
    #[serde(default = "empty_object")]
    pub customer_info: Value,
    /// Manifest entries carried on this route
    #[serde(default)]
    pub packages: Vec<Value>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Scheduling priority of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoutePriority {
    /// Deliver when convenient
    Low,
    /// Standard scheduling
    #[default]
    Normal,
    /// Ahead of normal work
    High,
    /// Drop everything
    Urgent,
}

/// Advisory pushed to drivers near an emergency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyAdvisory {
    /// Emergency category
    pub kind: EmergencyKind,
    /// Severity grading
    pub severity: EmergencySeverity,
    /// Where the emergency is
    pub location: Coordinate,
    /// Operator guidance for nearby drivers
    pub message: String,
}

/// Result of a fan-out operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Targeted drivers, sorted and deduplicated
    pub recipients: Vec<String>,
    /// Commands pushed over the live link
    pub sent: usize,
    /// Commands persisted for replay
    pub queued: usize,
}

impl FleetGateway {
    /// Assign `route` to one driver.
    pub async fn assign_route(
        &self,
        driver_id: &str,
        route: &RouteDescriptor,
    ) -> Result<Delivery, GatewayError> {
        info!(driver_id, route_id = %route.route_id, "assigning route");
        let command =
            OutboundCommand::new(driver_id, CommandKind::NewRoute, serde_json::to_value(route)?);
        self.send_command(command).await
    }

    /// Notify every driver within `radius_km` of the emergency location.
    pub async fn broadcast_emergency_alert(
        &self,
        advisory: &EmergencyAdvisory,
        radius_km: f64,
    ) -> Result<BroadcastReport, GatewayError> {
        let recipients = self.fleet().drivers_within_km(&advisory.location, radius_km);
        info!(
            recipients = recipients.len(),
            radius_km,
            severity = ?advisory.severity,
            "broadcasting emergency advisory"
        );
        self.fan_out(
            recipients,
            CommandKind::EmergencyAlert,
            serde_json::to_value(advisory)?,
        )
        .await
    }

    /// Push a weather advisory to every driver assigned to any of
    /// `route_ids`.
    pub async fn broadcast_weather_alert(
        &self,
        route_ids: &[String],
        advisory: Value,
    ) -> Result<BroadcastReport, GatewayError> {
        let recipients = self.resolve_route_drivers(route_ids);
        info!(
            recipients = recipients.len(),
            routes = route_ids.len(),
            "broadcasting weather advisory"
        );
        self.fan_out(recipients, CommandKind::WeatherAlert, advisory).await
    }

    /// Push a traffic advisory to every driver assigned to `route_id`.
    pub async fn broadcast_traffic_update(
        &self,
        route_id: &str,
        advisory: Value,
    ) -> Result<BroadcastReport, GatewayError> {
        let recipients = self.resolve_route_drivers(&[route_id.to_string()]);
        info!(recipients = recipients.len(), route_id, "broadcasting traffic advisory");
        self.fan_out(recipients, CommandKind::TrafficUpdate, advisory).await
    }

    /// Drivers assigned to any of `route_ids`, sorted and deduplicated.
    /// Empty when no route membership source is configured.
    pub fn resolve_route_drivers(&self, route_ids: &[String]) -> Vec<String> {
        let Some(membership) = &self.inner.route_membership else {
            warn!("no route membership source configured; route advisory reaches nobody");
            return Vec::new();
        };
        let mut drivers = membership.drivers_on_routes(route_ids);
        drivers.sort();
        drivers.dedup();
        drivers
    }

    async fn fan_out(
        &self,
        mut recipients: Vec<String>,
        kind: CommandKind,
        payload: Value,
    ) -> Result<BroadcastReport, GatewayError> {
        recipients.sort();
        recipients.dedup();

        let mut sent = 0;
        let mut queued = 0;
        for driver_id in &recipients {
            let command = OutboundCommand::new(driver_id.clone(), kind, payload.clone());
            match self.send_command(command).await? {
                Delivery::Sent => sent += 1,
                Delivery::Queued => queued += 1,
            }
        }

        Ok(BroadcastReport { recipients, sent, queued })
    }
}
