//! Core functionality for the FleetLink fleet-coordination gateway.
//!
//! This crate provides the fundamental types, configuration, and utilities
//! shared across the FleetLink workspace: entity state records, command
//! types, the geospatial utility, and logging setup.

pub mod config;
pub mod error;
pub mod geo;
pub mod logging;
pub mod types;

pub use config::GatewayConfig;
pub use error::{CoreError, Result};
pub use geo::{Coordinate, EARTH_RADIUS_KM};
pub use types::{
    CommandKind, DriverLocation, EmergencyEvent, EmergencyKind, EmergencySeverity,
    EmergencyStatus, OutboundCommand, VehicleStatus,
};
