//! Message router: interprets inbound frames and maintains derived entity
//! state.
//!
//! The router never errors out and never panics on peer input: malformed
//! frames are logged and dropped, unknown discriminants are ignored, and
//! every decodable envelope is re-published raw so subscribers that predate
//! newer discriminants keep receiving traffic.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use fleetlink_core::geo::Coordinate;
use fleetlink_core::types::{
    DriverLocation, EmergencyEvent, EmergencyStatus, VehicleStatus,
};

use crate::bus::{EventBus, GatewayEvent};
use crate::hooks::EmergencyHook;
use crate::protocol::{Envelope, Frame};

/// Latest-wins entity state derived from inbound telemetry.
///
/// Upsert-only: entries persist until an external eviction policy removes
/// them. Readers never observe a partially written entry.
#[derive(Default)]
pub struct FleetState {
    drivers: RwLock<HashMap<String, DriverLocation>>,
    vehicles: RwLock<HashMap<String, VehicleStatus>>,
}

impl FleetState {
    /// Last known location for a driver.
    pub fn driver_location(&self, driver_id: &str) -> Option<DriverLocation> {
        self.drivers.read().unwrap().get(driver_id).cloned()
    }

    /// Latest status for a vehicle.
    pub fn vehicle_status(&self, vehicle_id: &str) -> Option<VehicleStatus> {
        self.vehicles.read().unwrap().get(vehicle_id).cloned()
    }

    /// Number of drivers with a known location.
    pub fn driver_count(&self) -> usize {
        self.drivers.read().unwrap().len()
    }

    /// Number of vehicles with a known status.
    pub fn vehicle_count(&self) -> usize {
        self.vehicles.read().unwrap().len()
    }

    /// Drivers whose last known location is within `radius_km` of `center`.
    /// Drivers with no recorded location are never included.
    pub fn drivers_within_km(&self, center: &Coordinate, radius_km: f64) -> Vec<String> {
        self.drivers
            .read()
            .unwrap()
            .values()
            .filter(|loc| loc.coordinate().within_km(center, radius_km))
            .map(|loc| loc.driver_id.clone())
            .collect()
    }

    fn upsert_driver(&self, location: DriverLocation) {
        self.drivers
            .write()
            .unwrap()
            .insert(location.driver_id.clone(), location);
    }

    fn upsert_vehicle(&self, status: VehicleStatus) {
        self.vehicles
            .write()
            .unwrap()
            .insert(status.vehicle_id.clone(), status);
    }
}

/// Decodes inbound frames, updates [`FleetState`], and fans out on the bus.
pub struct Router {
    state: Arc<FleetState>,
    bus: Arc<EventBus>,
    emergency_hook: Option<Arc<dyn EmergencyHook>>,
}

impl Router {
    /// Create a router publishing on `bus`.
    pub fn new(bus: Arc<EventBus>, emergency_hook: Option<Arc<dyn EmergencyHook>>) -> Self {
        Self {
            state: Arc::new(FleetState::default()),
            bus,
            emergency_hook,
        }
    }

    /// Entity state, shared read-only with the dispatch API.
    pub fn state(&self) -> &Arc<FleetState> {
        &self.state
    }

    /// Decode and dispatch one raw frame. Malformed input is logged and
    /// dropped; subsequent frames are unaffected.
    pub fn handle_raw(&self, raw: &str) {
        let envelope: Envelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(%err, "dropping malformed frame");
                return;
            }
        };
        self.handle_envelope(envelope);
    }

    /// Dispatch a decoded envelope, then unconditionally re-publish it raw.
    pub fn handle_envelope(&self, envelope: Envelope) {
        match envelope.decode_frame() {
            Ok(frame) => self.dispatch(&envelope, frame),
            Err(err) => {
                warn!(kind = %envelope.kind, %err, "dropping frame with undecodable payload");
            }
        }

        self.bus.publish(&GatewayEvent::Raw(envelope));
    }

    fn dispatch(&self, envelope: &Envelope, frame: Frame) {
        match frame {
            Frame::LocationUpdate(payload) => {
                let Some(driver_id) = envelope.driver_id.clone() else {
                    warn!("location_update without driverId; dropping");
                    return;
                };
                let location = DriverLocation {
                    driver_id,
                    latitude: payload.latitude,
                    longitude: payload.longitude,
                    accuracy_m: payload.accuracy,
                    speed: payload.speed,
                    heading_deg: payload.heading,
                    observed_at: envelope.timestamp,
                };
                self.state.upsert_driver(location.clone());
                self.bus.publish(&GatewayEvent::LocationUpdated(location));
            }
            Frame::VehicleStatus(payload) => {
                let Some(vehicle_id) = envelope.vehicle_id.clone() else {
                    warn!("vehicle_status without vehicleId; dropping");
                    return;
                };
                let status = VehicleStatus {
                    vehicle_id,
                    fuel_level: payload.fuel,
                    engine_temp: payload.engine_temp,
                    battery_level: payload.battery,
                    mileage: payload.mileage,
                    maintenance_alerts: payload.maintenance_alerts,
                    last_update: envelope.timestamp,
                };
                self.state.upsert_vehicle(status.clone());
                self.bus.publish(&GatewayEvent::VehicleStatusUpdated(status));
            }
            Frame::EmergencyAlert(payload) => {
                let event = EmergencyEvent {
                    kind: payload.kind,
                    severity: payload.severity,
                    location: payload.location,
                    driver_id: envelope.driver_id.clone(),
                    vehicle_id: envelope.vehicle_id.clone(),
                    description: payload.description,
                    raised_at: envelope.timestamp,
                    status: EmergencyStatus::Active,
                };
                if event.is_critical() {
                    if let Some(hook) = &self.emergency_hook {
                        hook.notify(&event);
                    }
                }
                self.bus.publish(&GatewayEvent::Emergency(event));
            }
            // Business handling for these belongs to subscribers; the router
            // mutates nothing and only re-publishes.
            Frame::RouteDeviation => {
                self.bus
                    .publish(&GatewayEvent::RouteDeviation(envelope.clone()));
            }
            Frame::DriverBreak => {
                self.bus.publish(&GatewayEvent::DriverBreak(envelope.clone()));
            }
            Frame::DeliveryStatus => {
                self.bus
                    .publish(&GatewayEvent::DeliveryStatus(envelope.clone()));
            }
            Frame::Unrecognized => {
                debug!(kind = %envelope.kind, "ignoring unrecognized frame kind");
            }
        }
    }
}
