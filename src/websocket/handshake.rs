//! Upgrade handshake validation and raw HTTP responses.
//!
//! Responses here are written straight to the socket; nothing goes through
//! an HTTP framework once a request has been routed to the gateway.

use axum::http::{header, Method, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::net::head::{header_has_token, RequestHead};

/// GUID appended to the client nonce (RFC 6455 §1.3).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

pub const SUPPORTED_VERSION: &str = "13";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("upgrade must use GET, got {0}")]
    Method(String),
    #[error("missing or invalid Upgrade header")]
    MissingUpgrade,
    #[error("Connection header does not request an upgrade")]
    MissingConnectionUpgrade,
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,
    #[error("unsupported Sec-WebSocket-Version {0}")]
    UnsupportedVersion(String),
}

/// Check the headers a WebSocket upgrade must carry and return the client nonce.
pub fn validate(head: &RequestHead) -> Result<&str, HandshakeError> {
    if head.method != Method::GET {
        return Err(HandshakeError::Method(head.method.to_string()));
    }

    let upgrade_ok = head
        .header_str(header::UPGRADE)
        .map(|v| v.split(',').any(|p| p.trim().eq_ignore_ascii_case("websocket")))
        .unwrap_or(false);
    if !upgrade_ok {
        return Err(HandshakeError::MissingUpgrade);
    }

    if !header_has_token(&head.headers, header::CONNECTION, "upgrade") {
        return Err(HandshakeError::MissingConnectionUpgrade);
    }

    if let Some(version) = head.header_str(header::SEC_WEBSOCKET_VERSION) {
        if version.trim() != SUPPORTED_VERSION {
            return Err(HandshakeError::UnsupportedVersion(version.to_string()));
        }
    }

    head.header_str(header::SEC_WEBSOCKET_KEY)
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or(HandshakeError::MissingKey)
}

/// `base64(sha1(key + GUID))`.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// The `101 Switching Protocols` response completing the handshake.
pub fn switching_protocols(accept: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept
    )
}

/// A plain-text rejection that closes the connection.
pub fn rejection(status: StatusCode, body: &str, extra_headers: &[(&str, &str)]) -> String {
    let mut out = format!(
        "HTTP/1.1 {} {}\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    );
    for (name, value) in extra_headers {
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str(&format!(
        "Content-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::head::parse_head;

    fn head(extra: &str) -> RequestHead {
        let raw = format!("GET /api/chat HTTP/1.1\r\nHost: localhost\r\n{}\r\n", extra);
        parse_head(raw.as_bytes()).unwrap()
    }

    #[test]
    fn rfc_sample_accept_key() {
        // RFC 6455 §1.3
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn valid_upgrade_returns_key() {
        let h = head("Upgrade: WebSocket\r\nConnection: keep-alive, Upgrade\r\nSec-WebSocket-Version: 13\r\nSec-WebSocket-Key: abc==\r\n");
        assert_eq!(validate(&h), Ok("abc=="));
    }

    #[test]
    fn missing_headers_are_reported() {
        let h = head("Connection: Upgrade\r\nSec-WebSocket-Key: abc==\r\n");
        assert_eq!(validate(&h), Err(HandshakeError::MissingUpgrade));

        let h = head("Upgrade: websocket\r\nConnection: keep-alive\r\nSec-WebSocket-Key: abc==\r\n");
        assert_eq!(validate(&h), Err(HandshakeError::MissingConnectionUpgrade));

        let h = head("Upgrade: websocket\r\nConnection: Upgrade\r\n");
        assert_eq!(validate(&h), Err(HandshakeError::MissingKey));

        let h = head("Upgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Version: 8\r\nSec-WebSocket-Key: abc==\r\n");
        assert_eq!(validate(&h), Err(HandshakeError::UnsupportedVersion("8".into())));
    }

    #[test]
    fn rejection_is_well_formed() {
        let resp = rejection(StatusCode::UNAUTHORIZED, "nope", &[("WWW-Authenticate", "Basic realm=\"x\"")]);
        assert!(resp.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        assert!(resp.contains("WWW-Authenticate: Basic realm=\"x\"\r\n"));
        assert!(resp.contains("Content-Length: 4\r\n"));
        assert!(resp.ends_with("\r\n\r\nnope"));
    }

    #[test]
    fn switching_protocols_carries_accept() {
        let resp = switching_protocols("xyz");
        assert!(resp.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(resp.contains("Sec-WebSocket-Accept: xyz\r\n"));
        assert!(resp.ends_with("\r\n\r\n"));
    }
}
