//! LoRaWAN network-server daemon.
//!
//! Receives decoded uplinks over UDP, validates their frame counters against
//! the local session or the cluster, forwards them upstream and answers with
//! downlink decisions in time for the device's receive windows.
//!
//! Usage:
//!   lns-server --gateway-id edge-a --facade-server-url http://facade:7071/api
//!   IOTEDGE_DEVICEID=edge-a FACADE_SERVER_URL=http://facade:7071/api lns-server

use std::sync::Arc;

// ---

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ---

use lns_domain::{DeviceConnectorPtr, NetworkServerServicePtr};
use lns_resolver::{Endpoint, HttpDeviceConnector, HttpResolver};

// ---

mod config;
mod delay;
mod fcnt;
mod ingress;
mod metrics;
mod observe;
mod processor;
mod registry;

// ---

use config::{Config, ServerConfig};
use ingress::UdpIngress;
use metrics::ServerMetrics;
use processor::UplinkProcessor;
use registry::ConnectionRegistry;

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    let cfg = Config::parse();

    let no_color = std::env::var("EMACS").is_ok()
        || std::env::var("NO_COLOR").is_ok()
        || std::env::var("CARGO_TERM_COLOR").as_deref() == Ok("never")
        || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(!no_color)
        .init();

    let config = Arc::new(ServerConfig::try_from(cfg)?);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        gateway_id = %config.gateway_id,
        facade = %config.facade_server_url,
        processing_delay_ms = ?config.processing_delay_ms,
        "lns-server starting",
    );

    // Facade clients share one pooled HTTP client.
    let endpoint = Endpoint::new(
        config.facade_server_url.clone(),
        config.facade_auth_code.clone(),
        config.resolver_timeout,
    )?;
    let service: NetworkServerServicePtr = Arc::new(HttpResolver::new(endpoint.clone()));
    let connector: DeviceConnectorPtr = Arc::new(HttpDeviceConnector::new(endpoint));

    let metrics = Arc::new(ServerMetrics::new()?);
    let shutdown = CancellationToken::new();

    // Idle sessions are evicted in the background.
    let registry = Arc::new(ConnectionRegistry::new(config.session_idle_ttl));
    let sweeper = registry
        .clone()
        .spawn_sweeper(config.sweep_interval, shutdown.clone());

    let processor = Arc::new(UplinkProcessor::new(
        config.clone(),
        registry.clone(),
        service,
        connector,
        metrics.clone(),
    ));

    let ingress = UdpIngress::bind(config.listen, processor, shutdown.clone()).await?;
    info!(listen = %ingress.local_addr()?, "UDP ingress ready");
    let ingress_task = tokio::spawn(ingress.run());

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    shutdown.cancel();
    match ingress_task.await {
        Ok(Err(e)) => tracing::warn!("ingress stopped with error: {e}"),
        Err(e) => tracing::warn!("ingress task panicked: {e}"),
        Ok(Ok(())) => {}
    }
    if let Err(e) = sweeper.await {
        tracing::warn!("sweeper task panicked: {e}");
    }

    registry.dispose();
    metrics.log_summary();

    Ok(())
}
