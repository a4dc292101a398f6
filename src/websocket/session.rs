//! The task that owns one upgraded socket.
//!
//! A session is the only writer to its socket. It multiplexes inbound bytes,
//! queued [`Outbound`] commands and termination, and processes frames in
//! arrival order.

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::chat::{self, error_frame};
use super::codec::{self, close_code, Frame, Opcode};
use super::registry::{ConnectionHandle, Outbound};
use crate::observability::metrics;
use crate::upstream::ChatBackend;

/// Forward-only lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Pending,
    Open,
    Closed,
}

/// What a session does with application messages.
#[derive(Clone)]
pub enum Handler {
    Chat(Arc<dyn ChatBackend>),
    /// Status subscribers only receive; their messages are ignored.
    Status,
}

enum Flow {
    Continue,
    Stop,
}

pub struct Session {
    handle: Arc<ConnectionHandle>,
    rx: mpsc::Receiver<Outbound>,
    handler: Handler,
    max_frame_size: usize,
    state: ConnectionState,
    relay: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(
        handle: Arc<ConnectionHandle>,
        rx: mpsc::Receiver<Outbound>,
        handler: Handler,
        max_frame_size: usize,
    ) -> Self {
        Self {
            handle,
            rx,
            handler,
            max_frame_size,
            state: ConnectionState::Pending,
            relay: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn transition(&mut self, next: ConnectionState) {
        if next > self.state {
            tracing::trace!(connection_id = %self.handle.id(), from = ?self.state, to = ?next, "Connection state");
            self.state = next;
        }
    }

    /// Serve the connection until it closes. `leftover` holds bytes that
    /// arrived together with the upgrade request.
    pub async fn run<S>(mut self, io: &mut S, leftover: Bytes) -> ConnectionState
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.transition(ConnectionState::Open);
        let mut buf = BytesMut::from(&leftover[..]);

        loop {
            if let Flow::Stop = self.drain_frames(io, &mut buf).await {
                break;
            }

            tokio::select! {
                biased;

                _ = self.handle.terminated() => {
                    tracing::debug!(connection_id = %self.handle.id(), "Connection terminated");
                    break;
                }
                _ = self.handle.ping_requested() => {
                    if let Flow::Stop = self.write(io, codec::encode_frame(Opcode::Ping, &[])).await {
                        break;
                    }
                }
                read = io.read_buf(&mut buf) => match read {
                    Ok(0) => {
                        tracing::debug!(connection_id = %self.handle.id(), "Peer closed the socket");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(connection_id = %self.handle.id(), error = %e, "Read failed");
                        break;
                    }
                },
                msg = self.rx.recv() => {
                    let Some(msg) = msg else { break };
                    if let Flow::Stop = self.write_outbound(io, msg).await {
                        break;
                    }
                }
            }
        }

        self.transition(ConnectionState::Closed);
        if let Some(relay) = self.relay.take() {
            relay.abort();
        }
        let _ = io.shutdown().await;
        self.state
    }

    async fn drain_frames<S>(&mut self, io: &mut S, buf: &mut BytesMut) -> Flow
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            match codec::decode(buf, self.max_frame_size) {
                Ok(None) => return Flow::Continue,
                Ok(Some((frame, used))) => {
                    buf.advance(used);
                    if let Flow::Stop = self.on_frame(io, frame).await {
                        return Flow::Stop;
                    }
                }
                Err(e) => {
                    tracing::warn!(connection_id = %self.handle.id(), error = %e, "Malformed frame");
                    return self.close(io, e.close_code(), &e.to_string()).await;
                }
            }
        }
    }

    async fn on_frame<S>(&mut self, io: &mut S, frame: Frame) -> Flow
    where
        S: AsyncWrite + Unpin,
    {
        if !frame.masked {
            return self
                .close(io, close_code::PROTOCOL_ERROR, "client frames must be masked")
                .await;
        }

        self.handle.mark_alive();
        metrics::record_frame("inbound");

        match frame.opcode {
            Opcode::Ping => self.write(io, codec::encode_frame(Opcode::Pong, &frame.payload)).await,
            Opcode::Pong => Flow::Continue,
            Opcode::Close => {
                let code = codec::parse_close(&frame.payload)
                    .map(|(code, _)| code)
                    .unwrap_or(close_code::NORMAL);
                tracing::debug!(connection_id = %self.handle.id(), code, "Client closed");
                self.close(io, close_code::reply_to(code), "").await
            }
            Opcode::Text | Opcode::Binary => self.on_message(io, frame.payload).await,
            Opcode::Continuation => {
                self.close(io, close_code::UNSUPPORTED, "fragmented messages are not supported")
                    .await
            }
        }
    }

    async fn on_message<S>(&mut self, io: &mut S, payload: Bytes) -> Flow
    where
        S: AsyncWrite + Unpin,
    {
        let backend = match &self.handler {
            Handler::Status => return Flow::Continue,
            Handler::Chat(backend) => Arc::clone(backend),
        };

        if self.relay.as_ref().is_some_and(|r| !r.is_finished()) {
            return self
                .write(io, codec::encode(&error_frame("a chat request is already in progress")))
                .await;
        }

        let request: Value = match serde_json::from_slice(&payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(connection_id = %self.handle.id(), error = %e, "Invalid chat command");
                if let Flow::Stop = self
                    .write(io, codec::encode(&error_frame(format!("Invalid JSON: {}", e))))
                    .await
                {
                    return Flow::Stop;
                }
                return self.close(io, close_code::INVALID_PAYLOAD, "invalid json").await;
            }
        };

        let conn = Arc::clone(&self.handle);
        self.relay = Some(tokio::spawn(chat::relay(backend, request, conn)));
        Flow::Continue
    }

    async fn write_outbound<S>(&self, io: &mut S, msg: Outbound) -> Flow
    where
        S: AsyncWrite + Unpin,
    {
        match msg {
            Outbound::Text(payload) => self.write(io, codec::encode(&payload)).await,
            Outbound::Close { code, reason } => self.close(io, code, &reason).await,
        }
    }

    /// Send a close frame and stop the session.
    async fn close<S>(&self, io: &mut S, code: u16, reason: &str) -> Flow
    where
        S: AsyncWrite + Unpin,
    {
        tracing::debug!(connection_id = %self.handle.id(), code, reason, "Closing connection");
        self.write(io, codec::encode_close(code, reason)).await;
        Flow::Stop
    }

    async fn write<S>(&self, io: &mut S, frame: Bytes) -> Flow
    where
        S: AsyncWrite + Unpin,
    {
        let write = async {
            io.write_all(&frame).await?;
            io.flush().await
        };
        tokio::select! {
            result = write => match result {
                Ok(()) => {
                    metrics::record_frame("outbound");
                    Flow::Continue
                }
                Err(e) => {
                    tracing::debug!(connection_id = %self.handle.id(), error = %e, "Write failed");
                    Flow::Stop
                }
            },
            _ = self.handle.terminated() => Flow::Stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::ConnectionId;
    use crate::websocket::registry::EndpointKind;
    use tokio::io::DuplexStream;

    fn session(handler: Handler) -> (Session, Arc<ConnectionHandle>) {
        let (tx, rx) = mpsc::channel(8);
        let peer = "127.0.0.1:9".parse().unwrap();
        let kind = match handler {
            Handler::Chat(_) => EndpointKind::Chat,
            Handler::Status => EndpointKind::Status,
        };
        let handle = Arc::new(ConnectionHandle::new(ConnectionId::new(), kind, peer, tx));
        (Session::new(Arc::clone(&handle), rx, handler, 1024), handle)
    }

    async fn next_frame(client: &mut DuplexStream, buf: &mut BytesMut) -> Frame {
        loop {
            if let Some((frame, used)) = codec::decode(buf, usize::MAX).unwrap() {
                buf.advance(used);
                return frame;
            }
            assert_ne!(client.read_buf(buf).await.unwrap(), 0, "socket closed");
        }
    }

    #[tokio::test]
    async fn answers_ping_and_echoes_close() {
        let (session, handle) = session(Handler::Status);
        let (mut client, mut server) = tokio::io::duplex(4096);
        let task = tokio::spawn(async move { session.run(&mut server, Bytes::new()).await });

        handle.take_alive();
        client
            .write_all(&codec::encode_masked(Opcode::Ping, b"hi", [1, 2, 3, 4]))
            .await
            .unwrap();
        let mut buf = BytesMut::new();
        let pong = next_frame(&mut client, &mut buf).await;
        assert_eq!(pong.opcode, Opcode::Pong);
        assert_eq!(&pong.payload[..], b"hi");
        assert!(handle.is_alive());

        let payload = close_code::NORMAL.to_be_bytes();
        client
            .write_all(&codec::encode_masked(Opcode::Close, &payload, [9, 9, 9, 9]))
            .await
            .unwrap();
        let echoed = next_frame(&mut client, &mut buf).await;
        assert_eq!(echoed.opcode, Opcode::Close);
        assert_eq!(codec::parse_close(&echoed.payload).map(|c| c.0), Some(close_code::NORMAL));

        assert_eq!(task.await.unwrap(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn unmasked_frame_is_a_protocol_error() {
        let (session, _handle) = session(Handler::Status);
        let (mut client, mut server) = tokio::io::duplex(4096);
        let task = tokio::spawn(async move { session.run(&mut server, Bytes::new()).await });

        client.write_all(&codec::encode(b"{}")).await.unwrap();
        let mut buf = BytesMut::new();
        let close = next_frame(&mut client, &mut buf).await;
        assert_eq!(close.opcode, Opcode::Close);
        assert_eq!(codec::parse_close(&close.payload).map(|c| c.0), Some(close_code::PROTOCOL_ERROR));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_frame_closes_with_too_big() {
        let (session, _handle) = session(Handler::Status);
        let (mut client, mut server) = tokio::io::duplex(8192);
        let task = tokio::spawn(async move { session.run(&mut server, Bytes::new()).await });

        let big = vec![b'x'; 2048];
        client
            .write_all(&codec::encode_masked(Opcode::Text, &big, [1, 1, 1, 1]))
            .await
            .unwrap();
        let mut buf = BytesMut::new();
        let close = next_frame(&mut client, &mut buf).await;
        assert_eq!(codec::parse_close(&close.payload).map(|c| c.0), Some(close_code::TOO_BIG));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn leftover_bytes_are_processed_first() {
        let (session, _handle) = session(Handler::Status);
        let (mut client, mut server) = tokio::io::duplex(4096);
        let leftover = codec::encode_masked(Opcode::Ping, b"early", [5, 6, 7, 8]);
        let task = tokio::spawn(async move { session.run(&mut server, leftover).await });

        let mut buf = BytesMut::new();
        let pong = next_frame(&mut client, &mut buf).await;
        assert_eq!(&pong.payload[..], b"early");

        drop(client);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn terminate_drops_socket_without_close_frame() {
        let (session, handle) = session(Handler::Status);
        let (mut client, mut server) = tokio::io::duplex(4096);
        let task = tokio::spawn(async move { session.run(&mut server, Bytes::new()).await });

        handle.terminate();
        assert_eq!(task.await.unwrap(), ConnectionState::Closed);

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn reserved_close_code_is_not_echoed() {
        let (session, _handle) = session(Handler::Status);
        let (mut client, mut server) = tokio::io::duplex(4096);
        let task = tokio::spawn(async move { session.run(&mut server, Bytes::new()).await });

        client
            .write_all(&codec::encode_masked(Opcode::Close, &1005u16.to_be_bytes(), [7, 7, 7, 7]))
            .await
            .unwrap();
        let mut buf = BytesMut::new();
        let reply = next_frame(&mut client, &mut buf).await;
        assert_eq!(reply.opcode, Opcode::Close);
        assert_eq!(codec::parse_close(&reply.payload).map(|c| c.0), Some(close_code::NORMAL));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn requested_ping_is_written() {
        let (session, handle) = session(Handler::Status);
        let (mut client, mut server) = tokio::io::duplex(4096);
        let task = tokio::spawn(async move { session.run(&mut server, Bytes::new()).await });

        handle.request_ping();
        let mut buf = BytesMut::new();
        assert_eq!(next_frame(&mut client, &mut buf).await.opcode, Opcode::Ping);

        drop(client);
        task.await.unwrap();
    }
}
