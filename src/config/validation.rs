//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, addresses parse)
//! - Detect conflicting WebSocket endpoints
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid bind address '{0}'")]
    BindAddress(String),
    #[error("invalid upstream url '{0}'")]
    UpstreamUrl(String),
    #[error("websocket path '{0}' must start with '/'")]
    EndpointPath(String),
    #[error("chat and status endpoints must differ (both '{0}')")]
    DuplicateEndpoint(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("unknown database provider '{0}'")]
    UnknownProvider(String),
    #[error("database provider '{0}' requires a url")]
    MissingDatabaseUrl(String),
}

/// Known vector store providers.
pub const PROVIDERS: &[&str] = &["memory", "chroma"];

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero("listener.max_connections"));
    }
    if config.listener.max_header_bytes == 0 {
        errors.push(ValidationError::Zero("listener.max_header_bytes"));
    }

    if url::Url::parse(&config.upstream.url).is_err() {
        errors.push(ValidationError::UpstreamUrl(config.upstream.url.clone()));
    }

    let ws = &config.websocket;
    for path in [&ws.chat_path, &ws.status_path] {
        if !path.starts_with('/') {
            errors.push(ValidationError::EndpointPath(path.clone()));
        }
    }
    if ws.chat_path == ws.status_path {
        errors.push(ValidationError::DuplicateEndpoint(ws.chat_path.clone()));
    }
    if ws.sweep_interval_secs == 0 {
        errors.push(ValidationError::Zero("websocket.sweep_interval_secs"));
    }
    if ws.max_frame_size == 0 {
        errors.push(ValidationError::Zero("websocket.max_frame_size"));
    }
    if ws.outbound_buffer == 0 {
        errors.push(ValidationError::Zero("websocket.outbound_buffer"));
    }

    let db = &config.database;
    if !PROVIDERS.contains(&db.provider.as_str()) {
        errors.push(ValidationError::UnknownProvider(db.provider.clone()));
    } else if db.provider != "memory" && db.url.is_empty() {
        errors.push(ValidationError::MissingDatabaseUrl(db.provider.clone()));
    }

    if config.rate_limit.enabled && config.rate_limit.requests_per_minute == 0 {
        errors.push(ValidationError::Zero("rate_limit.requests_per_minute"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
