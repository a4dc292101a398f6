//! HTTP server setup and the connection accept loop.
//!
//! # Responsibilities
//! - Build the axum Router with every route and middleware layer
//! - Accept TCP connections and read the first request head
//! - Hand upgrade requests to the WebSocket gateway on the raw socket
//! - Serve everything else through hyper (HTTP/1.1 and HTTP/2)
//! - Run the gateway's background tasks and swap credentials on reload
//! - Drain connections on shutdown

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Extension, Router,
};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
    service::TowerToHyperService,
};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::GatewayConfig;
use crate::http::middleware::auth_middleware;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::http::routes::{db, health, internal, ollama};
use crate::http::state::AppState;
use crate::lifecycle::Shutdown;
use crate::net::connection::ConnectionTracker;
use crate::net::head::{read_head, HeadError};
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::net::rewind::Rewind;
use crate::observability::metrics;
use crate::security::rate_limit::rate_limit_middleware;
use crate::security::RateLimiter;
use crate::store::{open_store, StoreError};
use crate::upstream::{ChatBackend, OllamaClient, UpstreamError};
use crate::websocket::handshake;
use crate::websocket::{CollectionCounters, WebSocketGateway};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("config watcher failed: {0}")]
    Watch(#[from] notify::Error),
}

/// The gateway's HTTP and WebSocket front end.
pub struct HttpServer {
    state: AppState,
    router: Router,
    shutdown: Shutdown,
    tracker: ConnectionTracker,
}

impl HttpServer {
    /// Wire every subsystem from `config`.
    pub fn new(config: GatewayConfig) -> Result<Self, ServerError> {
        let upstream = OllamaClient::new(&config.upstream)?;
        let backend: Arc<dyn ChatBackend> = Arc::new(upstream.clone());
        Self::with_backend(config, upstream, backend)
    }

    /// Like [`new`](Self::new) but with a custom chat backend for the relay.
    pub fn with_backend(
        config: GatewayConfig,
        upstream: OllamaClient,
        backend: Arc<dyn ChatBackend>,
    ) -> Result<Self, ServerError> {
        let store = open_store(&config.database)?;
        let auth = Arc::new(ArcSwap::from_pointee(config.auth.clone()));
        let counters = Arc::new(CollectionCounters::new());

        let gateway = Arc::new(
            WebSocketGateway::new(
                config.websocket.clone(),
                Arc::clone(&auth),
                backend,
                Arc::clone(&counters),
            )
            .with_store(Arc::clone(&store)),
        );

        tracing::info!(
            upstream = %upstream.base_url(),
            database = store.provider(),
            chat_path = %config.websocket.chat_path,
            status_path = %config.websocket.status_path,
            "Gateway configured"
        );

        let state = AppState {
            rate_limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
            config: Arc::new(config),
            auth,
            upstream,
            store,
            counters,
            gateway,
        };

        let router = Self::build_router(&state);
        Ok(Self {
            state,
            router,
            shutdown: Shutdown::new(),
            tracker: ConnectionTracker::new(),
        })
    }

    /// Build the axum router with all middleware layers.
    ///
    /// Inference routes have no request timeout; the upstream client applies
    /// its own per endpoint.
    #[allow(deprecated)]
    pub fn build_router(state: &AppState) -> Router {
        let config = &state.config;

        let inference = Router::new()
            .route("/api/chat", post(ollama::chat))
            .route("/api/generate", post(ollama::generate))
            .route("/api/embeddings", post(ollama::embeddings))
            .route("/v1/chat/completions", post(ollama::openai_chat))
            .route("/v1/embeddings", post(ollama::openai_embeddings));

        let bounded = Router::new()
            .route("/status", get(health::status))
            .route("/health", get(health::health))
            .route("/api/tags", get(ollama::tags))
            .route("/v1/models", get(ollama::openai_models))
            .route("/v1/models/{model}", get(ollama::openai_model))
            .route("/v1/health", get(ollama::openai_health))
            .route("/db/status", get(db::status))
            .route("/db/{collection}/query", post(db::query))
            .route("/db/{collection}/add", post(db::add))
            .route("/db/{collection}/get", post(db::get))
            .route("/db/{collection}/update", post(db::update))
            .route("/db/{collection}/delete", post(db::delete))
            .route("/_internal/rate-status", get(internal::rate_status))
            .route("/_internal/connections", get(internal::connections))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)));

        inference
            .merge(bounded)
            .with_state(state.clone())
            .layer(middleware::from_fn_with_state(Arc::clone(&state.auth), auth_middleware))
            .layer(middleware::from_fn_with_state(
                Arc::clone(&state.rate_limiter),
                rate_limit_middleware,
            ))
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            .layer(middleware::from_fn(record_metrics))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Handle used to stop [`run`](Self::run).
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Reload `path` on change and swap in its credentials.
    ///
    /// Other sections need a restart to take effect. The returned watcher
    /// must be kept alive.
    pub fn watch_config(&self, path: PathBuf) -> Result<notify::RecommendedWatcher, ServerError> {
        let (watcher, mut updates) = crate::config::watcher::ConfigWatcher::new(&path);
        let watcher = watcher.run()?;

        let auth = Arc::clone(&self.state.auth);
        tokio::spawn(async move {
            while let Some(config) = updates.recv().await {
                if **auth.load() != config.auth {
                    auth.store(Arc::new(config.auth));
                    tracing::info!("Credentials reloaded");
                }
            }
        });
        Ok(watcher)
    }

    /// Accept connections until shutdown, then drain.
    pub async fn run(self, listener: Listener) -> Result<(), ServerError> {
        let addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(address = %addr, "HTTP server starting");

        let gateway = Arc::clone(&self.state.gateway);
        tokio::spawn(Arc::clone(&gateway).run_liveness(self.shutdown.subscribe()));

        let ctx = Arc::new(ConnectionContext {
            router: self.router.clone(),
            gateway: Arc::clone(&gateway),
            max_header_bytes: self.state.config.listener.max_header_bytes,
            header_timeout: Duration::from_secs(self.state.config.timeouts.request_secs),
        });

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let ctx = Arc::clone(&ctx);
                        let guard = self.tracker.track();
                        let shutdown = self.shutdown.subscribe();
                        tokio::spawn(async move {
                            let _guard = guard;
                            ctx.serve(stream, peer, permit, shutdown).await;
                        });
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                _ = shutdown_rx.recv() => break,
            }
        }

        let closing = gateway.shutdown();
        tracing::info!(websockets = closing, "Shutting down, draining connections");

        let grace = Duration::from_secs(self.state.config.timeouts.shutdown_grace_secs);
        let remaining = self.tracker.drain(grace).await;
        if remaining > 0 {
            tracing::warn!(remaining, "Grace period elapsed with connections still open");
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

struct ConnectionContext {
    router: Router,
    gateway: Arc<WebSocketGateway>,
    max_header_bytes: usize,
    header_timeout: Duration,
}

impl ConnectionContext {
    /// Route one accepted connection by its first request head.
    async fn serve(
        &self,
        mut stream: TcpStream,
        peer: SocketAddr,
        _permit: ConnectionPermit,
        shutdown: tokio::sync::broadcast::Receiver<()>,
    ) {
        let read = match tokio::time::timeout(self.header_timeout, read_head(&mut stream, self.max_header_bytes)).await {
            Ok(read) => read,
            Err(_) => {
                tracing::debug!(peer_addr = %peer, "Timed out waiting for request head");
                return;
            }
        };

        match read {
            Ok(read) if read.head.wants_upgrade() => {
                let leftover = read.trailing();
                self.gateway.handle_upgrade(&read.head, leftover, stream, peer).await;
            }
            Ok(read) => self.serve_http(Rewind::new(read.raw, stream), peer, shutdown).await,
            Err(HeadError::Unparsed { raw, reason }) => {
                tracing::trace!(peer_addr = %peer, reason, "Passing unparsed head to hyper");
                self.serve_http(Rewind::new(raw, stream), peer, shutdown).await;
            }
            Err(HeadError::TooLarge(limit)) => {
                tracing::warn!(peer_addr = %peer, limit, "Request head too large");
                let response = handshake::rejection(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE, "", &[]);
                let _ = stream.write_all(response.as_bytes()).await;
            }
            Err(e) => tracing::debug!(peer_addr = %peer, error = %e, "Connection closed before a request"),
        }
    }

    async fn serve_http(
        &self,
        io: Rewind<TcpStream>,
        peer: SocketAddr,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) {
        let service = TowerToHyperService::new(self.router.clone().layer(Extension(ConnectInfo(peer))));
        let builder = auto::Builder::new(TokioExecutor::new());
        let conn = builder.serve_connection(TokioIo::new(io), service);
        tokio::pin!(conn);

        let result = tokio::select! {
            result = conn.as_mut() => result,
            _ = shutdown.recv() => {
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        };
        if let Err(e) = result {
            tracing::debug!(peer_addr = %peer, error = %e, "HTTP connection ended with error");
        }
    }
}

async fn record_metrics(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    metrics::record_request(&route, response.status().as_u16(), start);
    response
}
