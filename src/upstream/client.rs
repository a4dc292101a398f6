//! HTTP client for an Ollama-compatible inference server.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::{Method, RequestBuilder};
use serde_json::Value;
use url::Url;

use crate::config::UpstreamConfig;
use crate::observability::metrics;
use crate::resilience::retries::{with_retries, RetryPolicy};
use crate::upstream::{ChatBackend, ChunkStream, UpstreamError};

/// A streamed upstream response, ready to be relayed.
pub struct StreamedResponse {
    pub content_type: Option<String>,
    pub body: ChunkStream,
}

/// Client for the inference server's HTTP API.
#[derive(Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base: Url,
    api_key: Option<String>,
    config: UpstreamConfig,
}

impl OllamaClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let base = Url::parse(&config.url).map_err(|e| UpstreamError::Url(format!("{}: {}", config.url, e)))?;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| UpstreamError::Request(e.to_string()))?;

        tracing::info!(url = %base, "Upstream client initialized");

        Ok(Self {
            http,
            base,
            api_key: Some(config.api_key.clone()).filter(|k| !k.is_empty()),
            config: config.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn request(&self, method: Method, path: &str, timeout_secs: u64) -> Result<RequestBuilder, UpstreamError> {
        let url = self
            .base
            .join(path.trim_start_matches('/'))
            .map_err(|e| UpstreamError::Url(format!("{}: {}", path, e)))?;

        let mut builder = self
            .http
            .request(method, url)
            .timeout(Duration::from_secs(timeout_secs));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        Ok(builder)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(UpstreamError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// POST `body` and hand back the response body as a stream.
    pub async fn post_stream(
        &self,
        endpoint: &'static str,
        path: &str,
        body: &Value,
        timeout_secs: u64,
    ) -> Result<StreamedResponse, UpstreamError> {
        tracing::debug!(endpoint, path, "Streaming upstream request");

        let result = async {
            let response = self
                .request(Method::POST, path, timeout_secs)?
                .json(body)
                .send()
                .await?;
            Self::check_status(response).await
        }
        .await;

        let response = match result {
            Ok(r) => {
                metrics::record_upstream(endpoint, "ok");
                r
            }
            Err(e) => {
                metrics::record_upstream(endpoint, "error");
                tracing::warn!(endpoint, error = %e, "Upstream request failed");
                return Err(e);
            }
        };

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body: ChunkStream = Box::pin(response.bytes_stream().map_err(UpstreamError::from));
        Ok(StreamedResponse { content_type, body })
    }

    /// POST `body` and parse the JSON answer.
    pub async fn post_json(
        &self,
        endpoint: &'static str,
        path: &str,
        body: &Value,
        timeout_secs: u64,
    ) -> Result<Value, UpstreamError> {
        let result = async {
            let response = self
                .request(Method::POST, path, timeout_secs)?
                .json(body)
                .send()
                .await?;
            let response = Self::check_status(response).await?;
            Ok::<_, UpstreamError>(response.json::<Value>().await?)
        }
        .await;

        metrics::record_upstream(endpoint, if result.is_ok() { "ok" } else { "error" });
        result
    }

    /// GET a JSON document, retrying connection failures.
    pub async fn get_json(
        &self,
        endpoint: &'static str,
        path: &str,
        timeout_secs: u64,
    ) -> Result<Value, UpstreamError> {
        let policy = RetryPolicy {
            max_attempts: self.config.retry_attempts,
            base_delay_ms: self.config.retry_base_delay_ms,
            max_delay_ms: self.config.retry_max_delay_ms,
        };

        let result = with_retries(policy, UpstreamError::is_retryable, || async {
            let response = self.request(Method::GET, path, timeout_secs)?.send().await?;
            let response = Self::check_status(response).await?;
            Ok::<_, UpstreamError>(response.json::<Value>().await?)
        })
        .await;

        metrics::record_upstream(endpoint, if result.is_ok() { "ok" } else { "error" });
        result
    }

    pub async fn generate(&self, body: &Value) -> Result<StreamedResponse, UpstreamError> {
        self.post_stream("generate", "/api/generate", body, self.config.chat_timeout_secs)
            .await
    }

    pub async fn generate_json(&self, body: &Value) -> Result<Value, UpstreamError> {
        self.post_json("generate", "/api/generate", body, self.config.chat_timeout_secs)
            .await
    }

    pub async fn chat_stream(&self, body: &Value) -> Result<StreamedResponse, UpstreamError> {
        self.post_stream("chat", "/api/chat", body, self.config.chat_timeout_secs)
            .await
    }

    pub async fn tags(&self) -> Result<Value, UpstreamError> {
        self.get_json("tags", "/api/tags", self.config.tags_timeout_secs).await
    }

    pub async fn embeddings(&self, body: &Value) -> Result<Value, UpstreamError> {
        self.post_json("embeddings", "/api/embeddings", body, self.config.embeddings_timeout_secs)
            .await
    }

    pub async fn openai_chat(&self, body: &Value) -> Result<StreamedResponse, UpstreamError> {
        self.post_stream("openai_chat", "/v1/chat/completions", body, self.config.chat_timeout_secs)
            .await
    }

    pub async fn openai_embeddings(&self, body: &Value) -> Result<Value, UpstreamError> {
        self.post_json("openai_embeddings", "/v1/embeddings", body, self.config.embeddings_timeout_secs)
            .await
    }

    pub async fn openai_models(&self) -> Result<Value, UpstreamError> {
        self.get_json("openai_models", "/v1/models", self.config.tags_timeout_secs).await
    }

    /// The upstream's own health document.
    pub async fn openai_health(&self) -> Result<Value, UpstreamError> {
        self.get_json("openai_health", "/v1/health", self.config.tags_timeout_secs).await
    }

    pub async fn openai_model(&self, model: &str) -> Result<Value, UpstreamError> {
        let path = format!("/v1/models/{}", encode_path_segment(model));
        self.get_json("openai_model", &path, self.config.tags_timeout_secs).await
    }
}

#[async_trait]
impl ChatBackend for OllamaClient {
    async fn chat(&self, request: Value) -> Result<ChunkStream, UpstreamError> {
        Ok(self.chat_stream(&request).await?.body)
    }
}

fn encode_path_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b':' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
