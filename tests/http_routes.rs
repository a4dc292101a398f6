//! HTTP route tests against a running gateway and a mock upstream.

use serde_json::{json, Value};
use tunnel_panda::http::X_REQUEST_ID;

mod common;

fn url(addr: std::net::SocketAddr, path: &str) -> String {
    format!("http://{}{}", addr, path)
}

#[tokio::test]
async fn requests_without_credentials_are_challenged() {
    let upstream = common::start_mock_upstream().await;
    let (addr, _shutdown) = common::spawn_gateway(common::test_config(upstream)).await;
    let client = reqwest::Client::new();

    let res = client.get(url(addr, "/status")).send().await.unwrap();
    assert_eq!(res.status(), 401);
    let challenge = res.headers().get("www-authenticate").unwrap().to_str().unwrap();
    assert!(challenge.starts_with("Basic realm="));

    let res = client
        .get(url(addr, "/status"))
        .headers(common::headers_with(common::USER, "wrong", common::TOKEN))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    let res = client
        .get(url(addr, "/status"))
        .headers(common::headers_with(common::USER, common::PASS, "wrong"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 403);
}

#[tokio::test]
async fn status_reports_service_and_request_id() {
    let upstream = common::start_mock_upstream().await;
    let (addr, _shutdown) = common::spawn_gateway(common::test_config(upstream)).await;

    let res = reqwest::Client::new()
        .get(url(addr, "/status"))
        .headers(common::auth_headers())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.headers().contains_key(X_REQUEST_ID));

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["service"], "tunnel-panda");
}

#[tokio::test]
async fn tags_and_health_pass_through_to_upstream() {
    let upstream = common::start_mock_upstream().await;
    let (addr, _shutdown) = common::spawn_gateway(common::test_config(upstream)).await;
    let client = reqwest::Client::new();

    let tags: Value = client
        .get(url(addr, "/api/tags"))
        .headers(common::auth_headers())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tags["models"][0]["name"], "llama3:8b");

    let res = client
        .get(url(addr, "/health"))
        .headers(common::auth_headers())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
}

#[tokio::test]
async fn health_is_bad_gateway_when_upstream_is_down() {
    let upstream = common::closed_port().await;
    let (addr, _shutdown) = common::spawn_gateway(common::test_config(upstream)).await;

    let res = reqwest::Client::new()
        .get(url(addr, "/health"))
        .headers(common::auth_headers())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 502);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["upstream"]["reachable"], false);
}

#[tokio::test]
async fn v1_health_passes_through_and_fails_over_to_502() {
    let upstream = common::start_mock_upstream().await;
    let (addr, _shutdown) = common::spawn_gateway(common::test_config(upstream)).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(url(addr, "/v1/health"))
        .headers(common::auth_headers())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health, json!({ "status": "ok" }));

    let down = common::closed_port().await;
    let (addr, _shutdown) = common::spawn_gateway(common::test_config(down)).await;
    let res = client
        .get(url(addr, "/v1/health"))
        .headers(common::auth_headers())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 502);
}

#[tokio::test]
async fn chat_over_http_streams_the_upstream_body() {
    let upstream = common::start_mock_upstream().await;
    let (addr, _shutdown) = common::spawn_gateway(common::test_config(upstream)).await;

    let res = reqwest::Client::new()
        .post(url(addr, "/api/chat"))
        .headers(common::auth_headers())
        .json(&json!({ "model": "llama3:8b", "messages": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), common::CHAT_CHUNKS.concat());
}

#[tokio::test]
async fn vectors_round_trip_through_a_collection() {
    let upstream = common::start_mock_upstream().await;
    let (addr, _shutdown) = common::spawn_gateway(common::test_config(upstream)).await;
    let client = reqwest::Client::new();

    let res = client
        .post(url(addr, "/db/notes/add"))
        .headers(common::auth_headers())
        .json(&json!({
            "ids": ["n1", "n2"],
            "embeddings": [[1.0, 0.0], [0.0, 1.0]],
            "documents": ["first", "second"],
            "metadatas": [{ "tag": "a" }, { "tag": "b" }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 204);

    let found: Value = client
        .post(url(addr, "/db/notes/query"))
        .headers(common::auth_headers())
        .json(&json!({ "query_embeddings": [[1.0, 0.1]], "n_results": 1 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(found["ids"][0][0], "n1");

    let res = client
        .post(url(addr, "/db/notes/update"))
        .headers(common::auth_headers())
        .json(&json!({ "ids": ["n2"], "metadatas": [{ "tag": "c" }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let records: Value = client
        .post(url(addr, "/db/notes/get"))
        .headers(common::auth_headers())
        .json(&json!({ "where": { "tag": "c" } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(records["ids"], json!(["n2"]));
}

#[tokio::test]
async fn malformed_collection_writes_are_rejected() {
    let upstream = common::start_mock_upstream().await;
    let (addr, _shutdown) = common::spawn_gateway(common::test_config(upstream)).await;
    let client = reqwest::Client::new();

    let res = client
        .post(url(addr, "/db/notes/update"))
        .headers(common::auth_headers())
        .json(&json!({ "ids": ["a", "b"], "metadatas": [{}] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Invalid request format");

    let res = client
        .post(url(addr, "/db/notes/delete"))
        .headers(common::auth_headers())
        .json(&json!({ "ids": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
}

#[tokio::test]
async fn rate_limit_rejects_after_burst() {
    let upstream = common::start_mock_upstream().await;
    let mut config = common::test_config(upstream);
    config.rate_limit.requests_per_minute = 1;
    config.rate_limit.burst_size = 2;
    let (addr, _shutdown) = common::spawn_gateway(config).await;
    let client = reqwest::Client::new();

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let res = client
            .get(url(addr, "/status"))
            .headers(common::auth_headers())
            .send()
            .await
            .unwrap();
        statuses.push(res.status().as_u16());
    }
    assert_eq!(statuses, vec![200, 200, 429]);
}

#[tokio::test]
async fn rate_status_counts_requests_per_ip() {
    let upstream = common::start_mock_upstream().await;
    let (addr, _shutdown) = common::spawn_gateway(common::test_config(upstream)).await;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        client
            .get(url(addr, "/status"))
            .headers(common::auth_headers())
            .send()
            .await
            .unwrap();
    }

    let status: Value = client
        .get(url(addr, "/_internal/rate-status"))
        .headers(common::auth_headers())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["requestsByIP"]["127.0.0.1"], 3);
    assert_eq!(status["uniqueIPs"], 1);
    assert_eq!(status["enabled"], true);
}
