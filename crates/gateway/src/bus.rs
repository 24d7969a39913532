//! Typed publish/subscribe registry decoupling the router from consumers.
//!
//! Delivery is synchronous with respect to `publish` and follows
//! subscription order, which keeps ordering deterministic and testing
//! simple; consumers needing asynchronous work hand off themselves.
//! Handler panics are caught at the dispatch boundary so one faulty
//! subscriber can never starve the rest.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tracing::warn;

use fleetlink_core::types::{DriverLocation, EmergencyEvent, VehicleStatus};

use crate::connection::ConnectionState;
use crate::protocol::Envelope;

/// Event kinds consumers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Driver position upserts
    LocationUpdate,
    /// Vehicle status upserts
    VehicleStatus,
    /// Emergencies raised in the field
    EmergencyAlert,
    /// Route deviation reports
    RouteDeviation,
    /// Driver break reports
    DriverBreak,
    /// Delivery progress reports
    DeliveryStatus,
    /// Connection lifecycle transitions
    Connectivity,
    /// Every inbound envelope, undecoded
    Raw,
}

/// Payload delivered to subscribers.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// Driver position upserted
    LocationUpdated(DriverLocation),
    /// Vehicle status upserted
    VehicleStatusUpdated(VehicleStatus),
    /// Emergency raised
    Emergency(EmergencyEvent),
    /// Route deviation report, business handling left to subscribers
    RouteDeviation(Envelope),
    /// Driver break report, business handling left to subscribers
    DriverBreak(Envelope),
    /// Delivery progress report, business handling left to subscribers
    DeliveryStatus(Envelope),
    /// Connection state changed
    ConnectivityChanged(ConnectionState),
    /// Full inbound envelope, re-published after typed dispatch
    Raw(Envelope),
}

impl GatewayEvent {
    /// The subscription key this event is published under.
    pub fn kind(&self) -> EventKind {
        match self {
            GatewayEvent::LocationUpdated(_) => EventKind::LocationUpdate,
            GatewayEvent::VehicleStatusUpdated(_) => EventKind::VehicleStatus,
            GatewayEvent::Emergency(_) => EventKind::EmergencyAlert,
            GatewayEvent::RouteDeviation(_) => EventKind::RouteDeviation,
            GatewayEvent::DriverBreak(_) => EventKind::DriverBreak,
            GatewayEvent::DeliveryStatus(_) => EventKind::DeliveryStatus,
            GatewayEvent::ConnectivityChanged(_) => EventKind::Connectivity,
            GatewayEvent::Raw(_) => EventKind::Raw,
        }
    }
}

/// Opaque subscription identifier. Removal by handle is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

type Handler = Arc<dyn Fn(&GatewayEvent) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    next_handle: u64,
    subscribers: HashMap<EventKind, Vec<(SubscriptionHandle, Handler)>>,
}

/// Typed event bus.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`; returns the handle used to remove it.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionHandle
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap();
        let handle = SubscriptionHandle(inner.next_handle);
        inner.next_handle += 1;
        inner
            .subscribers
            .entry(kind)
            .or_default()
            .push((handle, Arc::new(handler)));
        handle
    }

    /// Remove a subscription. Unknown or already-removed handles are a no-op.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut inner = self.inner.lock().unwrap();
        for subscribers in inner.subscribers.values_mut() {
            subscribers.retain(|(h, _)| *h != handle);
        }
    }

    /// Deliver `event` to every current subscriber of its kind, in
    /// subscription order. A panicking handler is logged and skipped;
    /// later handlers still run.
    pub fn publish(&self, event: &GatewayEvent) {
        let handlers: Vec<(SubscriptionHandle, Handler)> = {
            let inner = self.inner.lock().unwrap();
            inner
                .subscribers
                .get(&event.kind())
                .map(|subs| subs.to_vec())
                .unwrap_or_default()
        };

        for (handle, handler) in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(?handle, kind = ?event.kind(), "subscriber panicked; continuing");
            }
        }
    }

    /// Current subscriber count for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner
            .lock()
            .unwrap()
            .subscribers
            .get(&kind)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }
}
