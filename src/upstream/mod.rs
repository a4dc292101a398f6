//! Upstream inference server.
//!
//! # Data Flow
//! ```text
//! chat relay / HTTP routes
//!     → ChatBackend::chat (streaming)          → ChunkStream
//!     → OllamaClient::{generate, tags, ...}    → passthrough bodies
//! ```
//!
//! The gateway only depends on [`ChatBackend`]; [`OllamaClient`] is the
//! production implementation.

pub mod client;

use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use thiserror::Error;

pub use client::OllamaClient;

/// Response body chunks as they arrive from the upstream.
pub type ChunkStream = BoxStream<'static, Result<Bytes, UpstreamError>>;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("invalid upstream url: {0}")]
    Url(String),
    #[error("upstream request failed: {0}")]
    Request(String),
    #[error("upstream request timed out")]
    Timeout,
    #[error("upstream returned status {status}")]
    Status { status: u16, body: String },
    #[error("upstream stream failed: {0}")]
    Stream(String),
}

impl UpstreamError {
    /// Status to report to an HTTP client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            UpstreamError::Status { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            UpstreamError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            UpstreamError::Url(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    /// Connection-level failures are worth retrying; upstream answers are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UpstreamError::Request(_))
    }

    /// Upstream error body (if any), used as `details` in error payloads.
    pub fn details(&self) -> String {
        match self {
            UpstreamError::Status { body, .. } if !body.is_empty() => body.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::Timeout
        } else if e.is_body() || e.is_decode() {
            UpstreamError::Stream(e.to_string())
        } else {
            UpstreamError::Request(e.to_string())
        }
    }
}

/// A backend that answers chat commands with a stream of bytes.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Start a chat request. The request body is forwarded unchanged.
    async fn chat(&self, request: serde_json::Value) -> Result<ChunkStream, UpstreamError>;
}
