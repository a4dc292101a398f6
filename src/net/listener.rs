//! TCP listener with a connection ceiling.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections
//! - Enforce `max_connections` via a semaphore

use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The configured bind address does not parse.
    #[error("invalid bind address {0}")]
    Address(String),
    /// Failed to bind to address.
    #[error("failed to bind: {0}")]
    Bind(std::io::Error),
    /// Failed to accept connection.
    #[error("failed to accept: {0}")]
    Accept(std::io::Error),
    /// The connection semaphore was closed.
    #[error("listener closed")]
    Closed,
}

/// A TCP listener that limits concurrent connections.
///
/// When the limit is reached, `accept` waits until a slot frees up.
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Semaphore to limit concurrent connections.
    connection_limit: Arc<Semaphore>,
    /// Configured maximum connections.
    max_connections: usize,
}

impl Listener {
    /// Bind to the configured address with connection limits.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|_| ListenerError::Address(config.bind_address.clone()))?;

        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
        })
    }

    /// Accept a connection once a slot is free.
    ///
    /// The returned permit must live as long as the connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        let _ = stream.set_nodelay(true);

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Get the local address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Get the number of available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Get the configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A connection slot, released on drop.
#[derive(Debug)]
pub struct ConnectionPermit {
    /// Held for the lifetime of the connection.
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_bad_address() {
        let config = ListenerConfig {
            bind_address: "nowhere".into(),
            ..ListenerConfig::default()
        };
        assert!(matches!(Listener::bind(&config).await, Err(ListenerError::Address(_))));
    }

    #[tokio::test]
    async fn permits_are_returned_on_drop() {
        let config = ListenerConfig {
            bind_address: "127.0.0.1:0".into(),
            max_connections: 2,
            ..ListenerConfig::default()
        };
        let listener = Listener::bind(&config).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        let (_stream, _peer, permit) = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 1);

        drop(permit);
        assert_eq!(listener.available_permits(), 2);
        assert_eq!(listener.max_connections(), 2);
    }
}
