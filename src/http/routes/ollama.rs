//! Pass-through routes to the inference server.

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

use crate::http::error::ApiError;
use crate::http::state::AppState;
use crate::upstream::client::StreamedResponse;

const NDJSON: &str = "application/x-ndjson";

/// Relay an upstream body as it arrives.
fn stream_response(upstream: StreamedResponse) -> Response {
    let content_type = upstream.content_type.unwrap_or_else(|| NDJSON.to_string());
    (
        [(header::CONTENT_TYPE, content_type)],
        Body::from_stream(upstream.body),
    )
        .into_response()
}

fn wants_stream(body: &Value) -> bool {
    body.get("stream").and_then(Value::as_bool).unwrap_or(true)
}

pub async fn chat(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Response, ApiError> {
    Ok(stream_response(state.upstream.chat_stream(&body).await?))
}

pub async fn generate(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Response, ApiError> {
    if wants_stream(&body) {
        Ok(stream_response(state.upstream.generate(&body).await?))
    } else {
        Ok(Json(state.upstream.generate_json(&body).await?).into_response())
    }
}

pub async fn tags(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.upstream.tags().await?))
}

pub async fn embeddings(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.upstream.embeddings(&body).await?))
}

pub async fn openai_chat(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Response, ApiError> {
    Ok(stream_response(state.upstream.openai_chat(&body).await?))
}

pub async fn openai_embeddings(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.upstream.openai_embeddings(&body).await?))
}

pub async fn openai_models(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.upstream.openai_models().await?))
}

pub async fn openai_health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.upstream.openai_health().await?))
}

pub async fn openai_model(
    State(state): State<AppState>,
    Path(model): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.upstream.openai_model(&model).await?))
}
