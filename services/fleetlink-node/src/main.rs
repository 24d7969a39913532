//! FleetLink gateway node: connects to the dispatch endpoint, keeps the
//! session alive, and logs fleet events until shut down.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tracing::{info, warn};

use fleetlink_core::config::GatewayConfig;
use fleetlink_core::logging;
use fleetlink_gateway::{EventKind, FleetGateway, GatewayEvent, StaticToken};

const NODE_PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    protocol_version: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--version-json") {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            protocol_version: NODE_PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    logging::init();

    let config_path = parse_config_path(&args)?;
    let config = GatewayConfig::from_file(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    info!(endpoint = %config.endpoint, outbox = %config.outbox_path, "fleetlink node starting");

    let mut builder = FleetGateway::builder(config);
    match std::env::var("FLEETLINK_TOKEN") {
        Ok(token) if !token.is_empty() => {
            builder = builder.token_provider(Arc::new(StaticToken(token)));
        }
        _ => warn!("FLEETLINK_TOKEN not set; authenticating with an empty token"),
    }
    let gateway = builder.build()?;

    gateway.subscribe(EventKind::Connectivity, |event| {
        if let GatewayEvent::ConnectivityChanged(state) = event {
            info!(?state, "connectivity changed");
        }
    });
    gateway.subscribe(EventKind::EmergencyAlert, |event| {
        if let GatewayEvent::Emergency(emergency) = event {
            warn!(
                kind = ?emergency.kind,
                severity = ?emergency.severity,
                driver_id = ?emergency.driver_id,
                "emergency reported"
            );
        }
    });

    gateway.connect().await;

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested");
    gateway.disconnect().await;

    Ok(())
}

fn parse_config_path(args: &[String]) -> anyhow::Result<PathBuf> {
    let mut args_iter = args.iter();
    while let Some(arg) = args_iter.next() {
        if arg == "--config" {
            if let Some(path) = args_iter.next() {
                return Ok(PathBuf::from(path));
            }
            anyhow::bail!("--config was provided without a path");
        }
    }
    anyhow::bail!("missing required --config <path> argument");
}
