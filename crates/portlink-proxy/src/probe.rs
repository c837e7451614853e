//! Local listener probing
//!
//! Before routing through the registry, the proxy checks whether some
//! process on the relay host is already listening on the port. The check
//! is a capability behind a trait so the forwarding engine only depends on
//! the boolean answer, and tests can pin it either way.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// Answers whether a local process is bound to `127.0.0.1:port`
#[async_trait]
pub trait LocalProbe: Send + Sync {
    async fn is_listening(&self, port: u16) -> bool;
}

/// Probe by speculatively connecting to loopback
///
/// A successful connect within the timeout means something is listening;
/// refusal or timeout means nothing is. The probe socket is dropped
/// immediately either way.
#[derive(Debug, Clone)]
pub struct ConnectProbe {
    timeout: Duration,
}

impl ConnectProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ConnectProbe {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[async_trait]
impl LocalProbe for ConnectProbe {
    async fn is_listening(&self, port: u16) -> bool {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn detects_a_bound_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = ConnectProbe::default();
        assert!(probe.is_listening(port).await);
    }

    #[tokio::test]
    async fn reports_false_for_a_closed_port() {
        // Bind and immediately drop to find a port that is almost
        // certainly free.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let probe = ConnectProbe::default();
        assert!(!probe.is_listening(port).await);
    }
}
