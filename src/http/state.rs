//! Shared state for the HTTP routes.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::{AuthConfig, GatewayConfig};
use crate::security::RateLimiter;
use crate::store::VectorStore;
use crate::upstream::OllamaClient;
use crate::websocket::{CollectionCounters, WebSocketGateway};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    /// Live credentials, swapped on config reload.
    pub auth: Arc<ArcSwap<AuthConfig>>,
    pub upstream: OllamaClient,
    pub store: Arc<dyn VectorStore>,
    pub counters: Arc<CollectionCounters>,
    pub rate_limiter: Arc<RateLimiter>,
    pub gateway: Arc<WebSocketGateway>,
}
