//! Portlink relay server
//!
//! Runs the tunnel registry, one TCP proxy listener per configured port,
//! and the HTTP control plane that clients report to.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use portlink_api::{build_router, AppState};
use portlink_proxy::{ConnectProbe, ConnectionBudget, TcpProxy, DEFAULT_MAX_CONNECTIONS};
use portlink_registry::{ClientRegistry, SWEEP_INTERVAL};

/// Deadline for connecting to a chosen upstream before the inbound
/// connection is dropped
const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Reverse tunnel relay: registers clients over HTTP and forwards inbound
/// TCP traffic to them
#[derive(Parser, Debug)]
#[command(name = "portlink-server")]
#[command(about = "Run the portlink relay server", long_about = None)]
struct ServerArgs {
    /// Control-plane API bind address
    #[arg(long, env = "PORTLINK_API_ADDR", default_value = "0.0.0.0:8000")]
    api_addr: String,

    /// Ports to proxy: a span "9000-9010" or a comma list "9000,9001"
    #[arg(long, env = "PORTLINK_PROXY_PORTS", default_value = "9000-9010")]
    proxy_ports: String,

    /// Seconds without a report or heartbeat before a client expires
    #[arg(long, env = "PORTLINK_CLIENT_TIMEOUT", default_value = "300")]
    client_timeout: u64,

    /// Maximum simultaneously relayed connections
    #[arg(long, env = "PORTLINK_MAX_CONNECTIONS", default_value_t = DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,

    /// Shared API key clients must present in X-API-Key
    #[arg(long, env = "PORTLINK_API_KEY", default_value = "default-api-key-change-me")]
    api_key: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "PORTLINK_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();
    init_logging(&args.log_level)?;

    let proxy_ports =
        config::parse_proxy_ports(&args.proxy_ports).context("invalid --proxy-ports")?;

    info!("Starting portlink relay server");
    info!("Control plane: {}", args.api_addr);
    info!("Proxy ports: {:?}", proxy_ports);

    let registry = ClientRegistry::new(Duration::from_secs(args.client_timeout));
    let _sweeper = registry.start_sweeper(SWEEP_INTERVAL);

    let budget = ConnectionBudget::new(args.max_connections);
    let proxy = TcpProxy::new(
        registry.clone(),
        budget.clone(),
        Arc::new(ConnectProbe::default()),
        UPSTREAM_CONNECT_TIMEOUT,
    );

    // Listeners are independent fault domains: a failed bind takes down
    // only its own port.
    for port in &proxy_ports {
        let proxy = proxy.clone();
        let port = *port;
        tokio::spawn(async move {
            if let Err(e) = proxy.run_listener(port).await {
                error!(port = port, "Proxy listener failed: {}", e);
            }
        });
    }

    let state = Arc::new(AppState {
        registry,
        budget,
        proxy_ports,
        api_key: args.api_key,
    });
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&args.api_addr)
        .await
        .with_context(|| format!("failed to bind control plane on {}", args.api_addr))?;
    info!("Control plane listening on {}", args.api_addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result.context("control plane server failed")?;
        }
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal, exiting");
        }
    }

    Ok(())
}
