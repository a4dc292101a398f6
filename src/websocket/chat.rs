//! Chat relay: one client command in, the backend's byte stream out.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::{json, Value};

use super::codec::close_code;
use super::registry::{ConnectionHandle, Outbound};
use crate::upstream::{ChatBackend, UpstreamError};

/// `{"error": ...}` text payload.
pub fn error_frame(message: impl Into<String>) -> Bytes {
    Bytes::from(json!({ "error": message.into() }).to_string())
}

async fn fail(conn: &ConnectionHandle, err: &UpstreamError) {
    tracing::warn!(connection_id = %conn.id(), error = %err, "Chat relay failed");
    if conn.send(Outbound::Text(error_frame(err.to_string()))).await {
        conn.send(Outbound::Close {
            code: close_code::INTERNAL_ERROR,
            reason: "upstream error".into(),
        })
        .await;
    }
}

/// Forward `request` to the backend and stream every chunk to `conn`.
///
/// The connection is closed when the stream ends or fails. If the client is
/// gone, the rest of the stream is dropped.
pub async fn relay(backend: Arc<dyn ChatBackend>, request: Value, conn: Arc<ConnectionHandle>) {
    tracing::debug!(connection_id = %conn.id(), "Chat relay started");

    let mut stream = match backend.chat(request).await {
        Ok(stream) => stream,
        Err(e) => return fail(&conn, &e).await,
    };

    let mut chunks = 0usize;
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) if bytes.is_empty() => continue,
            Ok(bytes) => {
                if !conn.send(Outbound::Text(bytes)).await {
                    tracing::debug!(connection_id = %conn.id(), chunks, "Client went away mid-stream");
                    return;
                }
                chunks += 1;
            }
            Err(e) => return fail(&conn, &e).await,
        }
    }

    tracing::debug!(connection_id = %conn.id(), chunks, "Chat relay finished");
    conn.send(Outbound::Close {
        code: close_code::NORMAL,
        reason: String::new(),
    })
    .await;
}
