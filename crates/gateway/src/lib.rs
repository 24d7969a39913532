//! FleetLink gateway: the real-time channel between dispatch and field
//! units.
//!
//! The gateway keeps one persistent session to the dispatch endpoint,
//! routes inbound telemetry into latest-wins entity state, fans events out
//! on a typed bus, and pushes commands to drivers with offline durability.
//! When the link drops it reconnects with exponential backoff, and after
//! the attempt budget is spent it degrades to request/response polling.
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleetlink_core::config::GatewayConfig;
//! use fleetlink_gateway::{EventKind, FleetGateway, StaticToken};
//!
//! # async fn run() -> Result<(), fleetlink_gateway::GatewayError> {
//! let gateway = FleetGateway::builder(GatewayConfig::default())
//!     .token_provider(Arc::new(StaticToken("token".to_string())))
//!     .build()?;
//!
//! gateway.subscribe(EventKind::EmergencyAlert, |event| {
//!     println!("emergency: {event:?}");
//! });
//! gateway.connect().await;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod connection;
pub mod dispatch;
pub mod hooks;
pub mod outbox;
pub mod protocol;
pub mod router;
pub mod transport;

pub use bus::{EventBus, EventKind, GatewayEvent, SubscriptionHandle};
pub use connection::{
    ConnectionState, ConnectivitySnapshot, Delivery, FleetGateway, GatewayBuilder, GatewayError,
};
pub use dispatch::{BroadcastReport, EmergencyAdvisory, RouteDescriptor, RoutePriority};
pub use hooks::{EmergencyHook, FallbackPoller, RouteMembership, StaticToken, TokenProvider};
pub use outbox::{Outbox, OutboxError, QueuedCommand};
pub use protocol::{Envelope, Frame};
pub use router::FleetState;
pub use transport::{Transport, TransportError, WsTransport};
