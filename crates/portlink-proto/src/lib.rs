//! Control-plane wire types shared by the relay and the client
//!
//! All timestamps on the wire are Unix epoch seconds as `f64`, which is
//! what the control plane has always emitted. Internal liveness tracking
//! does not use these values.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Registration body sent by a client to `POST /api/report`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    /// Externally reachable IPv6 address of the client
    pub ipv6: String,
    /// Port the client is serving on (1-65535)
    pub port: u16,
}

/// Body sent by a client to `POST /api/heartbeat`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub port: u16,
}

/// Successful registration response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportResponse {
    /// Always "registered"
    pub status: String,
    pub timestamp: f64,
}

/// Successful heartbeat response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    /// Always "ok"
    pub status: String,
    pub timestamp: f64,
}

/// One live tunnel as reported by `GET /api/clients`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEntry {
    pub ipv6: String,
    pub port: u16,
    /// Last successful report or heartbeat, epoch seconds
    pub last_seen: f64,
    /// Connections routed to this tunnel so far (informational)
    pub connection_count: u64,
}

/// Map of proxy port to live tunnel, the `GET /api/clients` body
pub type ClientList = HashMap<u16, ClientEntry>;

/// Body of `GET /api/status` (unauthenticated)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Always "running"
    pub status: String,
    pub timestamp: f64,
    /// Number of live registry entries
    pub active_clients: usize,
    /// Ports the relay is proxying
    pub proxy_ports: Vec<u16>,
    /// Connections currently holding a budget unit
    pub active_connections: usize,
}

/// Error body returned by every failing control-plane call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Current time as Unix epoch seconds with sub-second precision
pub fn unix_timestamp() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_millis()) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_request_round_trips() {
        let req = ReportRequest {
            ipv6: "2001:db8::1".to_string(),
            port: 9000,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"ipv6\":\"2001:db8::1\""));
        assert!(json.contains("\"port\":9000"));

        let back: ReportRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.port, 9000);
    }

    #[test]
    fn status_response_shape() {
        let status = StatusResponse {
            status: "running".to_string(),
            timestamp: unix_timestamp(),
            active_clients: 2,
            proxy_ports: vec![9000, 9001],
            active_connections: 5,
        };
        let value: serde_json::Value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["status"], "running");
        assert_eq!(value["active_clients"], 2);
        assert_eq!(value["proxy_ports"][1], 9001);
    }

    #[test]
    fn unix_timestamp_advances() {
        let a = unix_timestamp();
        let b = unix_timestamp();
        assert!(b >= a);
        assert!(a > 1_600_000_000.0);
    }
}
