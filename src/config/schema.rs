//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, connection limits).
    pub listener: ListenerConfig,

    /// Upstream inference server settings.
    pub upstream: UpstreamConfig,

    /// Credentials checked on every HTTP request and upgrade.
    pub auth: AuthConfig,

    /// WebSocket endpoints and liveness settings.
    pub websocket: WebSocketConfig,

    /// Vector database backend.
    pub database: DatabaseConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:16014").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Upper bound on the size of a request head before it is rejected.
    pub max_header_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:16014".to_string(),
            max_connections: 10_000,
            max_header_bytes: 16 * 1024,
        }
    }
}

/// Upstream inference server (Ollama-compatible API).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the inference server.
    pub url: String,

    /// Optional bearer token sent upstream.
    pub api_key: String,

    /// Timeout for chat/generate requests in seconds.
    pub chat_timeout_secs: u64,

    /// Timeout for model listing in seconds.
    pub tags_timeout_secs: u64,

    /// Timeout for embedding requests in seconds.
    pub embeddings_timeout_secs: u64,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Attempts for non-streaming GET requests (1 = no retry).
    pub retry_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub retry_max_delay_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            api_key: String::new(),
            chat_timeout_secs: 120,
            tags_timeout_secs: 10,
            embeddings_timeout_secs: 30,
            connect_timeout_secs: 5,
            retry_attempts: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 2000,
        }
    }
}

/// Static credentials: HTTP Basic user/pass plus the `X-APP-TOKEN` header.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AuthConfig {
    pub user: String,
    pub pass: String,
    pub app_token: String,
}

/// WebSocket gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Upgrade path served by the chat relay.
    pub chat_path: String,

    /// Upgrade path served by the status broadcast.
    pub status_path: String,

    /// Interval between liveness sweeps in seconds.
    pub sweep_interval_secs: u64,

    /// Largest accepted frame payload in bytes.
    pub max_frame_size: usize,

    /// Frames queued per connection before it counts as unwritable.
    pub outbound_buffer: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            chat_path: "/api/chat".to_string(),
            status_path: "/db/status".to_string(),
            sweep_interval_secs: 30,
            max_frame_size: 16 * 1024 * 1024,
            outbound_buffer: 64,
        }
    }
}

/// Vector database configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Provider name (`memory` or `chroma`).
    pub provider: String,

    /// Provider base URL (required for `chroma`).
    pub url: String,

    /// Optional API key sent as `X-API-Key`.
    pub api_key: String,

    pub tenant: String,

    pub database: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            provider: "memory".to_string(),
            url: String::new(),
            api_key: String::new(),
            tenant: "default_tenant".to_string(),
            database: "default_database".to_string(),
        }
    }
}

/// Timeout configuration for plain HTTP routes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout for non-streaming routes in seconds.
    pub request_secs: u64,

    /// Grace period for draining connections on shutdown in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            shutdown_grace_secs: 10,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Sustained requests per minute per IP.
    pub requests_per_minute: u32,

    /// Burst capacity.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 200,
            burst_size: 200,
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
