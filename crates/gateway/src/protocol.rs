//! Wire envelope and frame decoding.
//!
//! Every message on the transport is one JSON envelope carrying a string
//! discriminant, optional driver/vehicle ids, a discriminant-specific
//! payload, and an ISO-8601 timestamp. Decoding is tolerant: unknown
//! discriminants map to [`Frame::Unrecognized`] instead of failing, and
//! payloads tolerate missing telemetry fields by substituting documented
//! defaults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use fleetlink_core::geo::Coordinate;
use fleetlink_core::types::{EmergencyKind, EmergencySeverity, OutboundCommand};

/// Frame discriminants understood by this gateway generation.
pub mod frame_types {
    /// Authentication handshake, gateway to dispatch
    pub const AUTH: &str = "auth";
    /// Command push, gateway to field unit
    pub const DRIVER_COMMAND: &str = "driver_command";
    /// Driver position report
    pub const LOCATION_UPDATE: &str = "location_update";
    /// Vehicle health report
    pub const VEHICLE_STATUS: &str = "vehicle_status";
    /// Emergency raised in the field
    pub const EMERGENCY_ALERT: &str = "emergency_alert";
    /// Driver off the assigned route
    pub const ROUTE_DEVIATION: &str = "route_deviation";
    /// Driver break start/stop
    pub const DRIVER_BREAK: &str = "driver_break";
    /// Delivery progress report
    pub const DELIVERY_STATUS: &str = "delivery_status";
}

/// One message unit on the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Frame discriminant
    #[serde(rename = "type")]
    pub kind: String,
    /// Reporting or targeted driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    /// Involved vehicle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<String>,
    /// Discriminant-specific payload
    #[serde(default)]
    pub data: Value,
    /// When the frame was produced; defaults to receipt time when absent
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Decode the payload according to the discriminant.
    ///
    /// Errors mean the discriminant was recognized but its payload was
    /// malformed; the router drops such frames. Unknown discriminants are
    /// not errors.
    pub fn decode_frame(&self) -> Result<Frame, serde_json::Error> {
        Ok(match self.kind.as_str() {
            frame_types::LOCATION_UPDATE => {
                Frame::LocationUpdate(serde_json::from_value(self.data.clone())?)
            }
            frame_types::VEHICLE_STATUS => {
                Frame::VehicleStatus(serde_json::from_value(self.data.clone())?)
            }
            frame_types::EMERGENCY_ALERT => {
                Frame::EmergencyAlert(serde_json::from_value(self.data.clone())?)
            }
            frame_types::ROUTE_DEVIATION => Frame::RouteDeviation,
            frame_types::DRIVER_BREAK => Frame::DriverBreak,
            frame_types::DELIVERY_STATUS => Frame::DeliveryStatus,
            _ => Frame::Unrecognized,
        })
    }
}

/// Inbound frame decoded by discriminant.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Driver position report
    LocationUpdate(LocationPayload),
    /// Vehicle health report
    VehicleStatus(VehicleStatusPayload),
    /// Emergency raised in the field
    EmergencyAlert(EmergencyPayload),
    /// Route deviation; handling delegated to subscribers
    RouteDeviation,
    /// Driver break; handling delegated to subscribers
    DriverBreak,
    /// Delivery progress; handling delegated to subscribers
    DeliveryStatus,
    /// Discriminant added by a newer peer; ignored
    Unrecognized,
}

/// `location_update` payload. Partial telemetry is tolerated: accuracy,
/// speed, and heading fall back to defaults when absent.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationPayload {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    /// GPS accuracy in metres
    #[serde(default = "default_accuracy")]
    pub accuracy: f64,
    /// Speed in km/h
    #[serde(default)]
    pub speed: f64,
    /// Heading in degrees
    #[serde(default)]
    pub heading: f64,
}

fn default_accuracy() -> f64 {
    10.0
}

/// `vehicle_status` payload. Unspecified numerics default to 0 except
/// battery, which defaults to full.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VehicleStatusPayload {
    /// Fuel level (percent)
    #[serde(default)]
    pub fuel: f64,
    /// Engine temperature in Celsius
    #[serde(default)]
    pub engine_temp: f64,
    /// Battery level (percent)
    #[serde(default = "default_battery")]
    pub battery: f64,
    /// Odometer reading in kilometres
    #[serde(default)]
    pub mileage: f64,
    /// Active maintenance alert codes
    #[serde(default)]
    pub maintenance_alerts: Vec<String>,
}

fn default_battery() -> f64 {
    100.0
}

/// `emergency_alert` payload.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyPayload {
    /// Emergency category
    pub kind: EmergencyKind,
    /// Severity; absent severity is treated as low
    #[serde(default)]
    pub severity: EmergencySeverity,
    /// Reported location
    #[serde(default)]
    pub location: Option<Coordinate>,
    /// Free-form description
    #[serde(default)]
    pub description: String,
}

/// Authentication frame sent immediately after the transport opens.
#[derive(Debug, Clone, Serialize)]
pub struct AuthFrame {
    /// Always `auth`
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Bearer token from the token supplier; empty when none is available
    pub token: String,
    /// When the handshake was produced
    pub timestamp: DateTime<Utc>,
}

impl AuthFrame {
    /// Build a handshake from the supplier's current token.
    pub fn new(token: Option<String>) -> Self {
        Self {
            kind: frame_types::AUTH,
            token: token.unwrap_or_default(),
            timestamp: Utc::now(),
        }
    }

    /// Wire encoding.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Command frame pushed from the gateway to one field unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandFrame {
    /// Always `driver_command`
    #[serde(rename = "type")]
    pub kind: String,
    /// Receiving driver
    pub driver_id: String,
    /// Command kind, e.g. `new_route`
    pub command: String,
    /// Command-specific payload
    pub data: Value,
    /// When the frame was produced
    pub timestamp: DateTime<Utc>,
}

impl CommandFrame {
    /// Wrap an outbound command for the wire.
    pub fn from_command(command: &OutboundCommand) -> Self {
        Self {
            kind: frame_types::DRIVER_COMMAND.to_string(),
            driver_id: command.target_driver_id.clone(),
            command: command.kind.as_str().to_string(),
            data: command.payload.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Wire encoding.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
