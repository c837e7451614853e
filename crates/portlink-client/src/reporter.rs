//! Report and heartbeat loops against the relay control plane
//!
//! The reporter (re)announces the client's address for every owned port
//! and keeps the registrations alive with heartbeats. HTTP failures are
//! logged and the loops carry on; the relay's expiry handles prolonged
//! outages.

use portlink_proto::{HeartbeatRequest, ReportRequest};
use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::discovery;

pub struct Reporter {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    ports: Vec<u16>,
    interface: Option<String>,
    report_interval: Duration,
    heartbeat_interval: Duration,
}

impl Reporter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        server_host: &str,
        server_port: u16,
        api_key: String,
        ports: Vec<u16>,
        interface: Option<String>,
        report_interval: Duration,
        heartbeat_interval: Duration,
        connect_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(connect_timeout).build()?;
        Ok(Self {
            http,
            base_url: format!("http://{}:{}", server_host, server_port),
            api_key,
            ports,
            interface,
            report_interval,
            heartbeat_interval,
        })
    }

    /// Register one port under the given address
    pub async fn send_report(&self, address: Ipv6Addr, port: u16) -> bool {
        let body = ReportRequest {
            ipv6: address.to_string(),
            port,
        };
        let result = self
            .http
            .post(format!("{}/api/report", self.base_url))
            .header("X-API-Key", &self.api_key)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                info!(port = port, ipv6 = %address, "Reported port to relay");
                true
            }
            Ok(response) => {
                error!(
                    port = port,
                    status = %response.status(),
                    "Relay rejected report"
                );
                false
            }
            Err(e) => {
                error!(port = port, "Failed to report port: {}", e);
                false
            }
        }
    }

    /// Refresh one port's registration
    pub async fn send_heartbeat(&self, port: u16) -> bool {
        let body = HeartbeatRequest { port };
        let result = self
            .http
            .post(format!("{}/api/heartbeat", self.base_url))
            .header("X-API-Key", &self.api_key)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(port = port, "Heartbeat sent");
                true
            }
            Ok(response) => {
                warn!(port = port, status = %response.status(), "Heartbeat failed");
                false
            }
            Err(e) => {
                error!(port = port, "Failed to send heartbeat: {}", e);
                false
            }
        }
    }

    /// Register every owned port under the given address
    pub async fn report_all(&self, address: Ipv6Addr) {
        for port in &self.ports {
            self.send_report(address, *port).await;
        }
    }

    /// Run the report and heartbeat loops until the process exits
    ///
    /// The report loop re-registers everything whenever the discovered
    /// address changes; the heartbeat loop touches every port on its own
    /// cadence.
    pub async fn run(self: Arc<Self>, initial_address: Ipv6Addr) {
        self.report_all(initial_address).await;

        let heartbeater = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeater.heartbeat_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                for port in &heartbeater.ports {
                    heartbeater.send_heartbeat(*port).await;
                }
            }
        });

        let mut current_address = initial_address;
        let mut interval = tokio::time::interval(self.report_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            match discovery::public_ipv6(self.interface.as_deref()) {
                Some(address) if address != current_address => {
                    info!(
                        old = %current_address,
                        new = %address,
                        "IPv6 address changed, re-registering all ports"
                    );
                    current_address = address;
                    self.report_all(address).await;
                }
                Some(_) => {}
                None => warn!("No IPv6 address currently available"),
            }
        }
    }
}
