//! Control-plane request handlers
//!
//! Report and heartbeat bodies are pulled out of raw JSON and validated
//! by hand so that every malformed payload maps to 400 with the
//! registry untouched, exactly as the status table promises.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use portlink_proto::{
    unix_timestamp, ClientEntry, ClientList, ErrorResponse, HeartbeatResponse, ReportResponse,
    StatusResponse,
};
use serde_json::Value;
use std::net::Ipv6Addr;
use std::sync::Arc;

use crate::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

/// `POST /api/report` — register or refresh a tunnel endpoint
pub async fn report(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ReportResponse>, ApiError> {
    let Json(body) = body.map_err(|_| bad_request("Invalid JSON"))?;

    let ipv6 = body
        .get("ipv6")
        .and_then(Value::as_str)
        .ok_or_else(|| bad_request("Missing ipv6 or port"))?;
    let port = body
        .get("port")
        .and_then(Value::as_i64)
        .ok_or_else(|| bad_request("Missing ipv6 or port"))?;

    let address: Ipv6Addr = ipv6
        .parse()
        .map_err(|_| bad_request("Invalid IPv6 address"))?;
    if !(1..=65535).contains(&port) {
        return Err(bad_request("Invalid port number"));
    }

    state.registry.register(port as u16, address);
    Ok(Json(ReportResponse {
        status: "registered".to_string(),
        timestamp: unix_timestamp(),
    }))
}

/// `POST /api/heartbeat` — keep an existing registration alive
pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let Json(body) = body.map_err(|_| bad_request("Invalid JSON"))?;

    let port = body
        .get("port")
        .and_then(Value::as_i64)
        .ok_or_else(|| bad_request("Missing port"))?;
    if !(1..=65535).contains(&port) {
        return Err(bad_request("Invalid port number"));
    }

    if state.registry.heartbeat(port as u16) {
        Ok(Json(HeartbeatResponse {
            status: "ok".to_string(),
            timestamp: unix_timestamp(),
        }))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "Client not found".to_string(),
            }),
        ))
    }
}

/// `GET /api/clients` — all live registrations, keyed by port
pub async fn clients(State(state): State<Arc<AppState>>) -> Json<ClientList> {
    let list: ClientList = state
        .registry
        .list_active()
        .into_iter()
        .map(|(port, record)| {
            (
                port,
                ClientEntry {
                    ipv6: record.remote_address.to_string(),
                    port: record.port,
                    last_seen: record.last_seen_at.timestamp_millis() as f64 / 1000.0,
                    connection_count: record.connection_count,
                },
            )
        })
        .collect();

    Json(list)
}

/// `GET /api/status` — unauthenticated service summary
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "running".to_string(),
        timestamp: unix_timestamp(),
        active_clients: state.registry.active_count(),
        proxy_ports: state.proxy_ports.clone(),
        active_connections: state.budget.active(),
    })
}
