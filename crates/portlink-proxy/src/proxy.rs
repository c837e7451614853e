//! TCP proxy listeners and the per-connection relay
//!
//! Each configured proxy port gets its own accept loop. Per accepted
//! connection, the engine first takes a unit of the global budget, then
//! routes: a service already listening on the relay host wins, else the
//! registered remote client for the port, else the connection is closed
//! with no upstream attempt. A failed bind kills only that port's
//! listener; accept errors never kill the loop.

use portlink_registry::ClientRegistry;
use std::net::{SocketAddr, SocketAddrV6};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::budget::{ConnectionBudget, ConnectionPermit};
use crate::probe::LocalProbe;

/// Default ceiling on simultaneously relayed connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;

#[derive(Debug, Error)]
pub enum TcpProxyError {
    #[error("Failed to bind proxy listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chosen upstream for one inbound connection
#[derive(Debug, Clone, Copy)]
enum Route {
    Local(SocketAddr),
    Remote(SocketAddr),
}

impl Route {
    fn addr(&self) -> SocketAddr {
        match self {
            Route::Local(addr) | Route::Remote(addr) => *addr,
        }
    }
}

/// Forwarding engine shared by all proxy listeners
///
/// Cheap to clone; clones share the registry, the budget, and the probe.
#[derive(Clone)]
pub struct TcpProxy {
    registry: ClientRegistry,
    budget: ConnectionBudget,
    probe: Arc<dyn LocalProbe>,
    connect_timeout: Duration,
}

impl TcpProxy {
    pub fn new(
        registry: ClientRegistry,
        budget: ConnectionBudget,
        probe: Arc<dyn LocalProbe>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            budget,
            probe,
            connect_timeout,
        }
    }

    /// Bind `0.0.0.0:port` and run the accept loop for the process
    /// lifetime
    ///
    /// A bind failure is fatal only for this port; the caller logs it and
    /// other listeners keep running.
    pub async fn run_listener(&self, port: u16) -> Result<(), TcpProxyError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TcpProxyError::Bind { port, source })?;
        self.serve(listener).await
    }

    /// Accept loop over an already-bound listener
    ///
    /// Public so tests can bind ephemeral loopback ports. Routing uses
    /// the listener's local port.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), TcpProxyError> {
        let local_addr = listener.local_addr()?;
        let port = local_addr.port();
        info!(%local_addr, "Proxy listener started");

        loop {
            match listener.accept().await {
                Ok((inbound, peer_addr)) => {
                    // Admission control happens before any routing work.
                    let Some(permit) = self.budget.try_acquire() else {
                        warn!(
                            port = port,
                            peer = %peer_addr,
                            limit = self.budget.limit(),
                            "Connection budget exhausted, rejecting"
                        );
                        continue;
                    };

                    let proxy = self.clone();
                    tokio::spawn(async move {
                        proxy
                            .handle_connection(inbound, peer_addr, port, permit)
                            .await;
                    });
                }
                Err(e) => {
                    error!(port = port, "Failed to accept connection: {}", e);
                }
            }
        }
    }

    /// Route and relay one admitted connection
    ///
    /// The permit travels with the task, so the budget unit is released
    /// exactly once no matter where this returns.
    async fn handle_connection(
        &self,
        inbound: TcpStream,
        peer_addr: SocketAddr,
        port: u16,
        permit: ConnectionPermit,
    ) {
        let Some(route) = self.pick_route(port).await else {
            warn!(
                port = port,
                peer = %peer_addr,
                "No local service or registered client, closing connection"
            );
            return;
        };

        let upstream_addr = route.addr();
        let upstream = match tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect(upstream_addr),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(
                    port = port,
                    upstream = %upstream_addr,
                    "Failed to connect upstream: {}", e
                );
                return;
            }
            Err(_) => {
                warn!(
                    port = port,
                    upstream = %upstream_addr,
                    "Upstream connect timed out"
                );
                return;
            }
        };

        match route {
            Route::Local(_) => {
                info!(peer = %peer_addr, port = port, "Forwarding to local service");
            }
            Route::Remote(addr) => {
                info!(peer = %peer_addr, port = port, upstream = %addr, "Forwarding to client");
            }
        }

        relay(inbound, upstream).await;
        debug!(peer = %peer_addr, port = port, "Connection closed");
        drop(permit);
    }

    /// Routing decision: local passthrough first, then the registry
    async fn pick_route(&self, port: u16) -> Option<Route> {
        if self.probe.is_listening(port).await {
            return Some(Route::Local(SocketAddr::from(([127, 0, 0, 1], port))));
        }

        let record = self.registry.lookup(port)?;
        self.registry.count_connection(port);
        Some(Route::Remote(SocketAddr::V6(SocketAddrV6::new(
            record.remote_address,
            port,
            0,
            0,
        ))))
    }
}

/// Full-duplex byte relay between the inbound socket and its upstream
///
/// Both directions run independently; as soon as either one finishes
/// (end-of-stream or error) both sockets are dropped, so the peer of the
/// still-open direction sees EOF promptly instead of a half-open
/// connection. Mid-relay errors are ordinary client disconnects and log
/// at debug.
async fn relay(mut inbound: TcpStream, mut upstream: TcpStream) {
    let (mut in_read, mut in_write) = inbound.split();
    let (mut up_read, mut up_write) = upstream.split();

    tokio::select! {
        result = tokio::io::copy(&mut in_read, &mut up_write) => match result {
            Ok(bytes) => debug!(bytes = bytes, "Inbound side finished"),
            Err(e) => debug!("Inbound side ended: {}", e),
        },
        result = tokio::io::copy(&mut up_read, &mut in_write) => match result {
            Ok(bytes) => debug!(bytes = bytes, "Upstream side finished"),
            Err(e) => debug!("Upstream side ended: {}", e),
        },
    }
    // Falling out of the select drops both streams, closing both sockets.
}
