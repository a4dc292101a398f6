//! Liveness of the gateway and its upstream.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::http::state::AppState;

pub async fn status() -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "service": "tunnel-panda",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Probe the upstream's model list.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let url = state.upstream.base_url().to_string();
    match state.upstream.tags().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "ok": true, "upstream": { "url": url, "reachable": true } })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Upstream health probe failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "ok": false,
                    "upstream": { "url": url, "reachable": false, "error": e.to_string() }
                })),
            )
        }
    }
}
