//! Operator endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::http::state::AppState;
use crate::security::rate_limit::RateStatus;
use crate::websocket::EndpointKind;

pub async fn rate_status(State(state): State<AppState>) -> Json<RateStatus> {
    Json(state.rate_limiter.status())
}

#[derive(Debug, Serialize)]
pub struct ConnectionCounts {
    pub chat: usize,
    pub status: usize,
}

pub async fn connections(State(state): State<AppState>) -> Json<ConnectionCounts> {
    Json(ConnectionCounts {
        chat: state.gateway.connection_count(EndpointKind::Chat),
        status: state.gateway.connection_count(EndpointKind::Status),
    })
}
