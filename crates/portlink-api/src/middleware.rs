//! API key authentication middleware
//!
//! Control-plane callers authenticate with a shared key in the
//! `X-API-Key` header. A wrong or missing key is rejected before the
//! handler runs and changes no internal state.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
    Json,
};
use portlink_proto::ErrorResponse;
use std::sync::Arc;
use tracing::debug;

use crate::AppState;

pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let presented = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok());

    if presented != Some(state.api_key.as_str()) {
        debug!(path = %request.uri().path(), "Rejected request with invalid API key");
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Invalid API key".to_string(),
            }),
        ));
    }

    Ok(next.run(request).await)
}
