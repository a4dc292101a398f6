//! Per-endpoint connection registries.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{mpsc, Notify};

use crate::net::connection::ConnectionId;

/// Which handler a connection was dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Chat,
    Status,
}

impl EndpointKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointKind::Chat => "chat",
            EndpointKind::Status => "status",
        }
    }
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commands for the task that owns a connection's socket.
///
/// Pings do not go through this queue; see [`ConnectionHandle::request_ping`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(Bytes),
    Close { code: u16, reason: String },
}

/// Shared view of one open connection.
///
/// The socket itself stays with the connection task; everything else talks
/// to it through `tx`, `ping` or `terminate`.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    kind: EndpointKind,
    peer: SocketAddr,
    alive: AtomicBool,
    last_activity: AtomicI64,
    tx: mpsc::Sender<Outbound>,
    ping: Notify,
    terminate: Notify,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, kind: EndpointKind, peer: SocketAddr, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            kind,
            peer,
            alive: AtomicBool::new(true),
            last_activity: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
            tx,
            ping: Notify::new(),
            terminate: Notify::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Any inbound frame re-arms liveness.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
        self.last_activity
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Clear the liveness flag, returning its previous value.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Milliseconds since the epoch of the last inbound frame.
    pub fn last_activity_ms(&self) -> i64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    /// Queue a frame without waiting. False if the connection cannot take it.
    pub fn try_send(&self, msg: Outbound) -> bool {
        self.tx.try_send(msg).is_ok()
    }

    /// Queue a frame, waiting for room. False once the connection is gone.
    pub async fn send(&self, msg: Outbound) -> bool {
        self.tx.send(msg).await.is_ok()
    }

    /// True once the connection task has dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Ask the connection task to send a ping ahead of any queued data.
    /// Repeated requests before the task gets to it coalesce into one.
    pub fn request_ping(&self) {
        self.ping.notify_one();
    }

    pub async fn ping_requested(&self) {
        self.ping.notified().await
    }

    /// Drop the socket without a close handshake.
    pub fn terminate(&self) {
        self.terminate.notify_one();
    }

    pub async fn terminated(&self) {
        self.terminate.notified().await
    }
}

/// Open connections of one endpoint.
#[derive(Debug)]
pub struct Registry {
    kind: EndpointKind,
    conns: DashMap<ConnectionId, Arc<ConnectionHandle>>,
}

impl Registry {
    pub fn new(kind: EndpointKind) -> Self {
        Self {
            kind,
            conns: DashMap::new(),
        }
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub fn insert(&self, handle: Arc<ConnectionHandle>) {
        self.conns.insert(handle.id(), handle);
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.conns.remove(&id).map(|(_, h)| h)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.conns.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Handles collected up front so no shard lock is held while sending.
    pub fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.conns.iter().map(|e| Arc::clone(e.value())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(buffer: usize) -> (Arc<ConnectionHandle>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(buffer);
        let peer: SocketAddr = "127.0.0.1:1".parse().unwrap();
        (
            Arc::new(ConnectionHandle::new(ConnectionId::new(), EndpointKind::Status, peer, tx)),
            rx,
        )
    }

    #[test]
    fn liveness_flag_round_trip() {
        let (h, _rx) = handle(1);
        assert!(h.take_alive());
        assert!(!h.take_alive());
        h.mark_alive();
        assert!(h.is_alive());
    }

    fn text(s: &'static str) -> Outbound {
        Outbound::Text(Bytes::from_static(s.as_bytes()))
    }

    #[test]
    fn try_send_reports_full_and_closed() {
        let (h, rx) = handle(1);
        assert!(h.try_send(text("a")));
        assert!(!h.try_send(text("b")));
        assert!(!h.is_closed());
        drop(rx);
        assert!(!h.try_send(text("c")));
        assert!(h.is_closed());
    }

    #[tokio::test]
    async fn ping_request_is_independent_of_a_full_queue() {
        let (h, _rx) = handle(1);
        assert!(h.try_send(text("a")));
        h.request_ping();
        h.request_ping();
        tokio::time::timeout(std::time::Duration::from_secs(1), h.ping_requested())
            .await
            .unwrap();
    }

    #[test]
    fn registry_insert_remove() {
        let registry = Registry::new(EndpointKind::Status);
        let (h, _rx) = handle(1);
        registry.insert(Arc::clone(&h));
        assert!(registry.contains(h.id()));
        assert_eq!(registry.snapshot().len(), 1);

        assert!(registry.remove(h.id()).is_some());
        assert!(registry.remove(h.id()).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn terminate_wakes_waiter_registered_later() {
        let (h, _rx) = handle(1);
        h.terminate();
        tokio::time::timeout(std::time::Duration::from_secs(1), h.terminated())
            .await
            .unwrap();
    }
}
