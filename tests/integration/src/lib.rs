//! End-to-end tests for the FleetLink gateway
//!
//! This test suite validates:
//! - The full session lifecycle over an in-process loopback transport
//! - Offline resilience: outbox durability, backoff, degraded polling
//! - Radius- and route-scoped broadcast fan-out
//! - Event bus delivery alongside live inbound traffic


#[cfg(test)]
mod gateway_flow_tests;

#[cfg(test)]
mod offline_resilience_tests;

#[cfg(test)]
mod broadcast_tests;
