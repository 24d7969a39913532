//! Tracing subscriber setup shared by every FleetLink binary.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the human-readable subscriber. `RUST_LOG` overrides the
/// default `info` filter.
///
/// ```no_run
/// use fleetlink_core::logging;
///
/// logging::init();
/// tracing::info!("gateway started");
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Same as [`init`] but emits one JSON object per line, for deployments
/// that ship logs to an aggregator.
pub fn init_json() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .init();
}
