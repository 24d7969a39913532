//! Collaborator interfaces the gateway consumes.
//!
//! The gateway deliberately does not own authentication refresh, route
//! assignment records, or emergency escalation; it talks to those systems
//! through the traits here.

use async_trait::async_trait;

use fleetlink_core::types::EmergencyEvent;

use crate::transport::TransportError;

/// Supplies the current bearer token for the authentication frame.
/// Token refresh is the supplier's concern, not the gateway's.
pub trait TokenProvider: Send + Sync {
    /// The current token, if one is available.
    fn token(&self) -> Option<String>;
}

/// Fixed-token supplier.
pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Resolves route identifiers to the drivers currently assigned to them.
pub trait RouteMembership: Send + Sync {
    /// Drivers assigned to any of `route_ids`.
    fn drivers_on_routes(&self, route_ids: &[String]) -> Vec<String>;
}

/// Invoked for critical-severity emergencies. Fire-and-forget: the gateway
/// does not wait on or retry the notification.
pub trait EmergencyHook: Send + Sync {
    /// Deliver the emergency to the external notification system.
    fn notify(&self, event: &EmergencyEvent);
}

/// Request/response fallback used in degraded polling mode after reconnect
/// attempts are exhausted.
#[async_trait]
pub trait FallbackPoller: Send + Sync {
    /// Fetch raw frames that accumulated since the previous poll.
    async fn poll(&self) -> Result<Vec<String>, TransportError>;
}
