//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tunnel_panda::config::GatewayConfig;
use tunnel_panda::lifecycle::Shutdown;
use tunnel_panda::net::listener::Listener;
use tunnel_panda::security::auth::{basic_header_value, APP_TOKEN_HEADER};
use tunnel_panda::HttpServer;

pub const USER: &str = "panda";
pub const PASS: &str = "bamboo";
pub const TOKEN: &str = "app-token";

/// Chunks the mock upstream streams back for `/api/chat`.
pub const CHAT_CHUNKS: [&str; 2] = [
    "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
    "{\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":true}\n",
];

/// Start a mock inference server on an ephemeral port.
///
/// `/api/chat` and `/api/generate` stream [`CHAT_CHUNKS`] with chunked
/// encoding, `/api/tags` lists one model, `/api/embeddings` echoes a fixed
/// vector, `/v1/health` reports ok. Anything else is a 404.
pub async fn start_mock_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve_mock(socket));
        }
    });
    addr
}

async fn serve_mock(mut socket: TcpStream) {
    let Some(path) = read_request(&mut socket).await else {
        return;
    };

    let response = match path.as_str() {
        "/api/chat" | "/api/generate" => {
            let mut out = String::from(
                "HTTP/1.1 200 OK\r\nContent-Type: application/x-ndjson\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
            );
            for chunk in CHAT_CHUNKS {
                out.push_str(&format!("{:x}\r\n{}\r\n", chunk.len(), chunk));
            }
            out.push_str("0\r\n\r\n");
            out
        }
        "/api/tags" => json_response(200, r#"{"models":[{"name":"llama3:8b"}]}"#),
        "/api/embeddings" => json_response(200, r#"{"embedding":[0.1,0.2,0.3]}"#),
        "/v1/health" => json_response(200, r#"{"status":"ok"}"#),
        _ => json_response(404, r#"{"error":"not found"}"#),
    };

    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

fn json_response(status: u16, body: &str) -> String {
    let reason = if status == 200 { "OK" } else { "Not Found" };
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    )
}

/// Read one request (head plus `Content-Length` body) and return its path.
async fn read_request(socket: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    head.split_whitespace().nth(1).map(str::to_string)
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Config pointing at `upstream`, listening on an ephemeral port.
pub fn test_config(upstream: SocketAddr) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.upstream.url = format!("http://{}", upstream);
    config.upstream.retry_attempts = 1;
    config.auth.user = USER.into();
    config.auth.pass = PASS.into();
    config.auth.app_token = TOKEN.into();
    config.timeouts.shutdown_grace_secs = 1;
    config
}

/// Start the gateway and return its address and shutdown handle.
pub async fn spawn_gateway(config: GatewayConfig) -> (SocketAddr, Shutdown) {
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(config).unwrap();
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        server.run(listener).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, shutdown)
}

/// Valid Basic credentials and app token.
pub fn auth_headers() -> HeaderMap {
    headers_with(USER, PASS, TOKEN)
}

pub fn headers_with(user: &str, pass: &str, token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&basic_header_value(user, pass)).unwrap());
    headers.insert(APP_TOKEN_HEADER, HeaderValue::from_str(token).unwrap());
    headers
}
