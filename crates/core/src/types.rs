//! Entity state and command types maintained by the gateway.
//!
//! Driver locations and vehicle statuses are latest-wins records keyed by
//! their ids; the gateway only ever upserts. Eviction is an external
//! policy's responsibility.

#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::geo::Coordinate;

/// Last known position report for a driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriverLocation {
    /// Driver identifier
    pub driver_id: String,
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    /// Reported GPS accuracy in metres
    pub accuracy_m: f64,
    /// Speed in km/h
    pub speed: f64,
    /// Heading in degrees from true north
    pub heading_deg: f64,
    /// When the observation was made
    pub observed_at: DateTime<Utc>,
}

impl DriverLocation {
    /// Position as a coordinate for distance math.
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Latest vehicle health report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VehicleStatus {
    /// Vehicle identifier
    pub vehicle_id: String,
    /// Fuel level (percent)
    pub fuel_level: f64,
    /// Engine temperature in Celsius
    pub engine_temp: f64,
    /// Battery level (percent)
    pub battery_level: f64,
    /// Odometer reading in kilometres
    pub mileage: f64,
    /// Active maintenance alert codes, in reported order
    pub maintenance_alerts: Vec<String>,
    /// When the report was received
    pub last_update: DateTime<Utc>,
}

/// Emergency category reported by a field unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmergencyKind {
    /// Traffic accident
    Accident,
    /// Vehicle breakdown
    Breakdown,
    /// Medical emergency
    Medical,
    /// Security incident
    Security,
}

/// Emergency severity grading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmergencySeverity {
    /// Low severity
    #[default]
    Low,
    /// Medium severity
    Medium,
    /// High severity
    High,
    /// Critical severity, triggers the external notification hook
    Critical,
}

/// Lifecycle status of an emergency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmergencyStatus {
    /// Emergency is ongoing
    Active,
    /// Emergency has been resolved (driven externally)
    Resolved,
}

/// Emergency raised from an inbound `emergency_alert` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyEvent {
    /// Emergency category
    pub kind: EmergencyKind,
    /// Severity grading
    pub severity: EmergencySeverity,
    /// Reported location, if any
    pub location: Option<Coordinate>,
    /// Reporting driver, if known
    pub driver_id: Option<String>,
    /// Involved vehicle, if known
    pub vehicle_id: Option<String>,
    /// Free-form description
    pub description: String,
    /// When the alert was raised
    pub raised_at: DateTime<Utc>,
    /// Lifecycle status
    pub status: EmergencyStatus,
}

impl EmergencyEvent {
    /// Whether this event must reach the emergency-notification hook.
    pub fn is_critical(&self) -> bool {
        self.severity == EmergencySeverity::Critical
    }
}

/// Kind of command pushed to a field unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Route assignment
    NewRoute,
    /// Emergency alert broadcast
    EmergencyAlert,
    /// Weather advisory
    WeatherAlert,
    /// Traffic advisory
    TrafficUpdate,
}

impl CommandKind {
    /// Wire representation of the command kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::NewRoute => "new_route",
            CommandKind::EmergencyAlert => "emergency_alert",
            CommandKind::WeatherAlert => "weather_alert",
            CommandKind::TrafficUpdate => "traffic_update",
        }
    }
}

impl std::str::FromStr for CommandKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "new_route" => Ok(CommandKind::NewRoute),
            "emergency_alert" => Ok(CommandKind::EmergencyAlert),
            "weather_alert" => Ok(CommandKind::WeatherAlert),
            "traffic_update" => Ok(CommandKind::TrafficUpdate),
            other => Err(format!("unknown command kind: {other}")),
        }
    }
}

/// A command addressed to one field unit.
///
/// Immutable once created; ownership transfers to the offline outbox when
/// the link is down and the record is discarded after delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutboundCommand {
    /// Receiving driver
    pub target_driver_id: String,
    /// Command kind
    pub kind: CommandKind,
    /// Command-specific payload
    pub payload: Value,
    /// When the command was created
    pub enqueued_at: DateTime<Utc>,
}

impl OutboundCommand {
    /// Create a command stamped with the current time.
    pub fn new(target_driver_id: impl Into<String>, kind: CommandKind, payload: Value) -> Self {
        Self {
            target_driver_id: target_driver_id.into(),
            kind,
            payload,
            enqueued_at: Utc::now(),
        }
    }
}
