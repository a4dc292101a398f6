//! Per-IP rate limiting middleware.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::config::RateLimitConfig;
use crate::observability::metrics;

/// A simple token bucket rate limiter.
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Default)]
struct Inner {
    buckets: HashMap<String, TokenBucket>,
    requests: HashMap<String, u64>,
}

/// Shared limiter state: token buckets plus per-IP request counters.
pub struct RateLimiter {
    inner: Mutex<Inner>,
    enabled: bool,
    /// Tokens per second.
    refill_rate: f64,
    burst: f64,
    requests_per_minute: u32,
}

/// Snapshot served by `/_internal/rate-status`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateStatus {
    pub requests_by_ip: HashMap<String, u64>,
    #[serde(rename = "uniqueIPs")]
    pub unique_ips: usize,
    pub limit: u32,
    pub enabled: bool,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            enabled: config.enabled,
            refill_rate: config.requests_per_minute as f64 / 60.0,
            burst: config.burst_size.max(1) as f64,
            requests_per_minute: config.requests_per_minute,
        }
    }

    /// Record a request from `key` and decide whether it may proceed.
    pub fn check(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *inner.requests.entry(key.to_string()).or_insert(0) += 1;

        if !self.enabled {
            return true;
        }

        let burst = self.burst;
        let bucket = inner
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(burst));

        bucket.try_acquire(burst, self.refill_rate)
    }

    pub fn status(&self) -> RateStatus {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        RateStatus {
            requests_by_ip: inner.requests.clone(),
            unique_ips: inner.requests.len(),
            limit: self.requests_per_minute,
            enabled: self.enabled,
        }
    }
}

/// Middleware function for per-IP rate limiting.
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = addr.ip().to_string();

    if state.check(&key) {
        next.run(request).await
    } else {
        tracing::warn!(client = %key, "Rate limit exceeded");
        metrics::record_rate_limited();
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({ "error": "Too many requests" })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(enabled: bool, burst: u32) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            enabled,
            requests_per_minute: 1,
            burst_size: burst,
        })
    }

    #[test]
    fn burst_then_reject() {
        let limiter = limiter(true, 2);
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));
        // Other clients have their own bucket
        assert!(limiter.check("10.0.0.2"));
    }

    #[test]
    fn counts_requests_even_when_disabled() {
        let limiter = limiter(false, 1);
        for _ in 0..5 {
            assert!(limiter.check("10.0.0.1"));
        }
        limiter.check("10.0.0.2");

        let status = limiter.status();
        assert_eq!(status.requests_by_ip["10.0.0.1"], 5);
        assert_eq!(status.unique_ips, 2);
        assert!(!status.enabled);
    }
}
