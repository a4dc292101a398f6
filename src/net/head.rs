//! HTTP/1.1 request head reading.
//!
//! The listener reads the head of every request itself so it can tell an
//! upgrade apart from a plain request before anything is handed to hyper.

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, header};
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Debug, Error)]
pub enum HeadError {
    #[error("connection closed before the request head was complete")]
    Incomplete,
    #[error("request head exceeds {0} bytes")]
    TooLarge(usize),
    #[error("malformed request head: {0}")]
    Malformed(&'static str),
    /// A complete head that is not HTTP/1.x we understand. `raw` holds every
    /// byte read so the connection can still be handed on.
    #[error("unparsed request head: {reason}")]
    Unparsed { raw: Bytes, reason: &'static str },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A parsed request line plus headers.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// Path without the query string.
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
}

impl RequestHead {
    /// True when the client asks to switch protocols.
    pub fn wants_upgrade(&self) -> bool {
        self.headers.contains_key(header::UPGRADE)
            || header_has_token(&self.headers, header::CONNECTION, "upgrade")
    }

    pub fn header_str(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// True if the comma-separated header `name` contains `token` (case-insensitive).
pub fn header_has_token(headers: &HeaderMap, name: HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Bytes read while looking for a request head.
#[derive(Debug, Clone)]
pub struct ReadHead {
    /// Everything read so far: the head plus whatever followed it.
    pub raw: Bytes,
    /// Length of the head within `raw`, including the blank line.
    pub head_len: usize,
    pub head: RequestHead,
}

impl ReadHead {
    /// Bytes that arrived after the head.
    pub fn trailing(&self) -> Bytes {
        self.raw.slice(self.head_len..)
    }
}

/// Read from `io` until a full request head has arrived.
///
/// The raw bytes must be replayed if the connection is handed on.
pub async fn read_head<S>(io: &mut S, max_bytes: usize) -> Result<ReadHead, HeadError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);

    loop {
        if let Some(end) = find_head_end(&buf) {
            let head = match parse_head(&buf[..end]) {
                Ok(head) => head,
                Err(HeadError::Malformed(reason)) => {
                    return Err(HeadError::Unparsed {
                        raw: buf.freeze(),
                        reason,
                    })
                }
                Err(e) => return Err(e),
            };
            return Ok(ReadHead {
                raw: buf.freeze(),
                head_len: end,
                head,
            });
        }
        if buf.len() >= max_bytes {
            return Err(HeadError::TooLarge(max_bytes));
        }
        let n = io.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(HeadError::Incomplete);
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Parse a request head terminated by an empty line.
pub fn parse_head(raw: &[u8]) -> Result<RequestHead, HeadError> {
    let text = std::str::from_utf8(raw).map_err(|_| HeadError::Malformed("head is not utf-8"))?;
    let mut lines = text.split("\r\n");

    let request_line = lines.next().ok_or(HeadError::Malformed("missing request line"))?;
    let mut parts = request_line.split(' ');
    let method = parts
        .next()
        .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
        .ok_or(HeadError::Malformed("invalid method"))?;
    let target = parts.next().ok_or(HeadError::Malformed("missing request target"))?;
    let version = parts.next().ok_or(HeadError::Malformed("missing http version"))?;
    if !version.starts_with("HTTP/1.") {
        return Err(HeadError::Malformed("unsupported http version"));
    }

    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), Some(q.to_string())),
        None => (target.to_string(), None),
    };

    let mut headers = HeaderMap::new();
    for line in lines.take_while(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or(HeadError::Malformed("header without colon"))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| HeadError::Malformed("invalid header name"))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| HeadError::Malformed("invalid header value"))?;
        headers.append(name, value);
    }

    Ok(RequestHead {
        method,
        path,
        query,
        headers,
    })
}
