//! Portlink client
//!
//! Discovers the host's reachable IPv6 address, announces the ports it
//! owns to the relay, and keeps the registrations alive with heartbeats.
//! The actual services behind those ports are ordinary listeners run by
//! the operator; this process only maintains the control-plane state.

mod discovery;
mod reporter;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reporter::Reporter;

/// Announce local ports to a portlink relay and keep them registered
#[derive(Parser, Debug)]
#[command(name = "portlink-client")]
#[command(about = "Run the portlink reporting client", long_about = None)]
struct ClientArgs {
    /// Relay control-plane host
    #[arg(long, env = "PORTLINK_SERVER_HOST", default_value = "127.0.0.1")]
    server_host: String,

    /// Relay control-plane port
    #[arg(long, env = "PORTLINK_SERVER_PORT", default_value = "8000")]
    server_port: u16,

    /// Shared API key
    #[arg(long, env = "PORTLINK_API_KEY", default_value = "default-api-key-change-me")]
    api_key: String,

    /// Comma list of ports this client serves
    #[arg(long, env = "PORTLINK_LISTEN_PORTS", default_value = "9000,9001,9002")]
    ports: String,

    /// Seconds between address checks / full re-reports
    #[arg(long, env = "PORTLINK_REPORT_INTERVAL", default_value = "60")]
    report_interval: u64,

    /// Seconds between heartbeats
    #[arg(long, env = "PORTLINK_HEARTBEAT_INTERVAL", default_value = "30")]
    heartbeat_interval: u64,

    /// HTTP timeout for control-plane calls, in seconds
    #[arg(long, env = "PORTLINK_CONNECT_TIMEOUT", default_value = "10")]
    connect_timeout: u64,

    /// Network interface to take the IPv6 address from (auto-detect when
    /// unset)
    #[arg(long, env = "PORTLINK_IPV6_INTERFACE")]
    interface: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "PORTLINK_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn parse_ports(spec: &str) -> Result<Vec<u16>> {
    let ports = spec
        .split(',')
        .map(|part| {
            let part = part.trim();
            part.parse::<u16>()
                .ok()
                .filter(|port| *port != 0)
                .with_context(|| format!("invalid port '{part}'"))
        })
        .collect::<Result<Vec<u16>>>()?;
    if ports.is_empty() {
        bail!("no ports configured");
    }
    Ok(ports)
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
    let args = ClientArgs::parse();
    init_logging(&args.log_level)?;

    info!("Starting portlink client");

    let ports = parse_ports(&args.ports).context("invalid --ports")?;

    let Some(address) = discovery::public_ipv6(args.interface.as_deref()) else {
        bail!("no IPv6 address available, cannot start client");
    };
    info!("Client IPv6: {}", address);
    info!("Serving ports: {:?}", ports);
    info!("Relay: {}:{}", args.server_host, args.server_port);

    for port in &ports {
        if !discovery::port_is_free(*port).await {
            bail!("port {port} is not available");
        }
    }

    let reporter = Arc::new(Reporter::new(
        &args.server_host,
        args.server_port,
        args.api_key,
        ports,
        args.interface,
        Duration::from_secs(args.report_interval),
        Duration::from_secs(args.heartbeat_interval),
        Duration::from_secs(args.connect_timeout),
    )?);

    tokio::select! {
        _ = reporter.run(address) => {}
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal, exiting");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_port_list() {
        assert_eq!(
            parse_ports("9000, 9001,9002").unwrap(),
            vec![9000, 9001, 9002]
        );
        assert_eq!(parse_ports("22").unwrap(), vec![22]);
    }

    #[test]
    fn rejects_bad_port_lists() {
        assert!(parse_ports("").is_err());
        assert!(parse_ports("9000,zero").is_err());
        assert!(parse_ports("0").is_err());
        assert!(parse_ports("123456").is_err());
    }
}
