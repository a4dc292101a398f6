//! The upgrade handler and the shared state behind both endpoints.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::http::StatusCode;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};

use super::codec::{self, close_code};
use super::counters::CollectionCounters;
use super::handshake::{self, HandshakeError};
use super::registry::{ConnectionHandle, EndpointKind, Outbound, Registry};
use super::session::{Handler, Session};
use super::status;
use crate::config::{AuthConfig, WebSocketConfig};
use crate::net::connection::ConnectionId;
use crate::net::head::RequestHead;
use crate::observability::metrics;
use crate::security::auth::{check_credentials, AuthDecision, REALM};
use crate::store::{IngestEvent, VectorStore};
use crate::upstream::ChatBackend;

/// Result of one liveness pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pinged: usize,
    pub reaped: usize,
}

/// Hand-rolled WebSocket server for the chat relay and the status broadcast.
pub struct WebSocketGateway {
    config: WebSocketConfig,
    auth: Arc<ArcSwap<AuthConfig>>,
    backend: Arc<dyn ChatBackend>,
    store: Option<Arc<dyn VectorStore>>,
    counters: Arc<CollectionCounters>,
    chat: Registry,
    status: Registry,
    /// Serializes counter updates with status registration, so a new
    /// subscriber sees every update either in its snapshot or after it.
    fanout: Mutex<()>,
}

impl WebSocketGateway {
    pub fn new(
        config: WebSocketConfig,
        auth: Arc<ArcSwap<AuthConfig>>,
        backend: Arc<dyn ChatBackend>,
        counters: Arc<CollectionCounters>,
    ) -> Self {
        Self {
            config,
            auth,
            backend,
            store: None,
            counters,
            chat: Registry::new(EndpointKind::Chat),
            status: Registry::new(EndpointKind::Status),
            fanout: Mutex::new(()),
        }
    }

    /// Use `store` for the collection list in status snapshots.
    pub fn with_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn counters(&self) -> &Arc<CollectionCounters> {
        &self.counters
    }

    /// Endpoint served at `path`, if any.
    pub fn endpoint_for(&self, path: &str) -> Option<EndpointKind> {
        if path == self.config.chat_path {
            Some(EndpointKind::Chat)
        } else if path == self.config.status_path {
            Some(EndpointKind::Status)
        } else {
            None
        }
    }

    fn registry(&self, kind: EndpointKind) -> &Registry {
        match kind {
            EndpointKind::Chat => &self.chat,
            EndpointKind::Status => &self.status,
        }
    }

    pub fn connection_count(&self, kind: EndpointKind) -> usize {
        self.registry(kind).len()
    }

    /// Validate an upgrade request, complete the handshake and serve the
    /// connection until it closes.
    ///
    /// `leftover` holds any bytes read past the request head.
    pub async fn handle_upgrade<S>(&self, head: &RequestHead, leftover: Bytes, mut socket: S, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let Some(kind) = self.endpoint_for(&head.path) else {
            tracing::warn!(peer_addr = %peer, path = %head.path, "Upgrade to unknown path");
            metrics::record_handshake("not_found");
            return reject(&mut socket, StatusCode::NOT_FOUND, "Not Found", &[]).await;
        };

        let key = match handshake::validate(head) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(peer_addr = %peer, path = %head.path, error = %e, "Bad upgrade request");
                metrics::record_handshake("bad_request");
                let version = [("Sec-WebSocket-Version", handshake::SUPPORTED_VERSION)];
                let extra: &[(&str, &str)] = match e {
                    HandshakeError::UnsupportedVersion(_) => &version,
                    _ => &[],
                };
                return reject(&mut socket, StatusCode::BAD_REQUEST, &e.to_string(), extra).await;
            }
        };

        let decision = check_credentials(&head.headers, &self.auth.load());
        if let AuthDecision::Deny { status, reason } = decision {
            tracing::warn!(peer_addr = %peer, path = %head.path, status = status.as_u16(), reason, "Upgrade denied");
            metrics::record_handshake(if status == StatusCode::UNAUTHORIZED { "unauthorized" } else { "forbidden" });
            let challenge = format!("Basic realm=\"{}\"", REALM);
            let challenge = [("WWW-Authenticate", challenge.as_str())];
            let extra: &[(&str, &str)] = if decision.wants_challenge() { &challenge } else { &[] };
            return reject(&mut socket, status, reason, extra).await;
        }

        let response = handshake::switching_protocols(&handshake::accept_key(key));
        if let Err(e) = write_all(&mut socket, response.as_bytes()).await {
            tracing::debug!(peer_addr = %peer, error = %e, "Handshake write failed");
            return;
        }
        metrics::record_handshake("accepted");

        let (tx, rx) = mpsc::channel(self.config.outbound_buffer.max(1));
        let handle = Arc::new(ConnectionHandle::new(ConnectionId::new(), kind, peer, tx));
        let registry = self.registry(kind);

        let handler = match kind {
            EndpointKind::Chat => {
                registry.insert(Arc::clone(&handle));
                Handler::Chat(Arc::clone(&self.backend))
            }
            EndpointKind::Status => {
                let list = self.collection_list().await;
                if !self.subscribe_status(&handle, &list) {
                    tracing::warn!(connection_id = %handle.id(), peer_addr = %peer, "Status snapshot could not be queued");
                    let _ = write_all(&mut socket, &codec::encode_close(close_code::INTERNAL_ERROR, "snapshot failed")).await;
                    return;
                }
                Handler::Status
            }
        };
        metrics::ws_connection_opened(kind.as_str());
        tracing::info!(connection_id = %handle.id(), peer_addr = %peer, path = %head.path, "WebSocket connection opened");

        let session = Session::new(Arc::clone(&handle), rx, handler, self.config.max_frame_size);
        session.run(&mut socket, leftover).await;

        registry.remove(handle.id());
        metrics::ws_connection_closed(kind.as_str());
        tracing::info!(connection_id = %handle.id(), path = %head.path, "WebSocket connection closed");
    }

    /// Queue the snapshot, then make `handle` visible to the broadcast.
    fn subscribe_status(&self, handle: &Arc<ConnectionHandle>, list: &[String]) -> bool {
        let _fanout = self.fanout.lock().unwrap_or_else(PoisonError::into_inner);
        if !handle.try_send(Outbound::Text(status::snapshot_message(&self.counters, list))) {
            return false;
        }
        self.status.insert(Arc::clone(handle));
        true
    }

    /// Collection names for a snapshot: the store's list when one is
    /// configured, otherwise every counted collection.
    async fn collection_list(&self) -> Vec<String> {
        if let Some(store) = &self.store {
            match store.list_collections().await {
                Ok(list) => return list.into_iter().map(|c| c.name).collect(),
                Err(e) => tracing::warn!(error = %e, "Failed to list collections for snapshot"),
            }
        }
        self.counters.names()
    }

    /// One liveness pass over every connection.
    ///
    /// Connections that have not shown activity since the previous pass, or
    /// whose task is gone, are terminated; the rest are pinged. A full
    /// outbound queue does not count against a connection.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for registry in [&self.chat, &self.status] {
            for handle in registry.snapshot() {
                if handle.take_alive() && !handle.is_closed() {
                    handle.request_ping();
                    report.pinged += 1;
                    continue;
                }
                registry.remove(handle.id());
                handle.terminate();
                metrics::record_reaped();
                report.reaped += 1;
                tracing::info!(
                    connection_id = %handle.id(),
                    peer_addr = %handle.peer(),
                    endpoint = %registry.kind(),
                    "Reaped unresponsive connection"
                );
            }
        }
        report
    }

    /// Run [`sweep`](Self::sweep) every `sweep_interval_secs` until shutdown.
    pub async fn run_liveness(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep();
                    tracing::debug!(pinged = report.pinged, reaped = report.reaped, "Liveness sweep");
                }
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("Liveness sweep stopped");
    }

    /// Count an ingestion and push the update to every status connection.
    ///
    /// Connections that cannot take the frame are dropped. Returns the number
    /// of connections that received it.
    pub fn apply_ingest(&self, event: &IngestEvent) -> usize {
        let _fanout = self.fanout.lock().unwrap_or_else(PoisonError::into_inner);
        let new_count = self.counters.increment(&event.collection, event.count);
        let message = status::update_message(&self.counters, &event.collection, new_count);

        let mut delivered = 0;
        for handle in self.status.snapshot() {
            if handle.try_send(Outbound::Text(message.clone())) {
                delivered += 1;
            } else {
                tracing::warn!(connection_id = %handle.id(), "Status subscriber not writable, dropping");
                self.status.remove(handle.id());
                handle.terminate();
            }
        }

        tracing::debug!(collection = %event.collection, new_count, delivered, "Collection update broadcast");
        delivered
    }

    /// Ask every open connection to close with `code`.
    pub fn close_all(&self, code: u16, reason: &str) -> usize {
        let mut count = 0;
        for registry in [&self.chat, &self.status] {
            for handle in registry.snapshot() {
                let close = Outbound::Close {
                    code,
                    reason: reason.to_string(),
                };
                if !handle.try_send(close) {
                    handle.terminate();
                }
                count += 1;
            }
        }
        count
    }

    /// Close everything with 1001 for a server shutdown.
    pub fn shutdown(&self) -> usize {
        self.close_all(close_code::GOING_AWAY, "server shutting down")
    }
}

async fn write_all<S>(socket: &mut S, data: &[u8]) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    socket.write_all(data).await?;
    socket.flush().await
}

async fn reject<S>(socket: &mut S, status: StatusCode, body: &str, extra: &[(&str, &str)])
where
    S: AsyncWrite + Unpin,
{
    let response = handshake::rejection(status, body, extra);
    if write_all(socket, response.as_bytes()).await.is_ok() {
        let _ = socket.shutdown().await;
    }
}
