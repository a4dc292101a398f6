//! Vector collection routes.
//!
//! Every `/db/{collection}/...` call creates the collection first if it does
//! not exist yet.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::http::error::ApiError;
use crate::http::state::AppState;
use crate::store::{GetRequest, IngestEvent, QueryRequest, VectorRecord};

#[derive(Debug, Deserialize)]
pub struct AddRequest {
    pub ids: Vec<String>,
    pub embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    pub metadatas: Option<Vec<Value>>,
    #[serde(default)]
    pub documents: Option<Vec<Option<String>>>,
}

impl AddRequest {
    fn into_records(self) -> Result<Vec<VectorRecord>, ApiError> {
        let n = self.ids.len();
        if self.embeddings.len() != n {
            return Err(ApiError::bad_request("ids and embeddings must have the same length"));
        }
        if self.metadatas.as_ref().is_some_and(|m| m.len() != n)
            || self.documents.as_ref().is_some_and(|d| d.len() != n)
        {
            return Err(ApiError::bad_request(
                "metadatas and documents must match the number of ids",
            ));
        }

        let mut metadatas = self.metadatas.map(Vec::into_iter);
        let mut documents = self.documents.map(Vec::into_iter);
        Ok(self
            .ids
            .into_iter()
            .zip(self.embeddings)
            .map(|(id, embedding)| VectorRecord {
                id,
                embedding,
                metadata: metadatas.as_mut().and_then(Iterator::next),
                document: documents.as_mut().and_then(Iterator::next).flatten(),
            })
            .collect())
    }
}

fn parse_body<T: for<'de> Deserialize<'de> + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(e.to_string()))
}

fn string_array(value: Option<&Value>) -> Option<Vec<String>> {
    value?
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

pub async fn query(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<Value>, ApiError> {
    state.store.ensure_collection(&collection).await?;
    Ok(Json(state.store.query(&collection, request).await?))
}

pub async fn add(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(request): Json<AddRequest>,
) -> Result<StatusCode, ApiError> {
    let records = request.into_records()?;
    let count = records.len() as u64;

    state.store.ensure_collection(&collection).await?;
    state.store.add_vectors(&collection, records).await?;

    tracing::info!(collection = %collection, count, "Vectors added");
    state.gateway.apply_ingest(&IngestEvent::new(collection, count));
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: GetRequest = parse_body(&body)?;
    state.store.ensure_collection(&collection).await?;
    Ok(Json(state.store.get_records(&collection, request).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let ids = string_array(body.get("ids"));
    let metadatas = body.get("metadatas").and_then(Value::as_array).cloned();
    let (ids, metadatas) = match (ids, metadatas) {
        (Some(ids), Some(metadatas)) if ids.len() == metadatas.len() => (ids, metadatas),
        _ => {
            return Err(ApiError::bad_request(
                "Both ids and metadatas must be arrays of the same length",
            ))
        }
    };

    state.store.ensure_collection(&collection).await?;
    state.store.update_records(&collection, ids, metadatas).await?;
    Ok(Json(json!({ "message": "Records updated successfully" })))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let ids = match string_array(body.get("ids")) {
        Some(ids) if !ids.is_empty() => ids,
        _ => return Err(ApiError::bad_request("ids must be a non-empty array")),
    };

    state.store.ensure_collection(&collection).await?;
    state.store.delete_vectors(&collection, ids).await?;
    Ok(Json(json!({ "message": "Vectors deleted successfully" })))
}

/// JSON status for plain `GET /db/status` (upgrades go to the gateway).
pub async fn status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let collections = state.store.list_collections().await?;
    let now = Utc::now().to_rfc3339();

    let mut details = Map::new();
    for info in &collections {
        let counted = state.counters.get(&info.name);
        details.insert(
            info.name.clone(),
            json!({
                "name": info.name,
                "id": info.id,
                "runtimeCount": counted.as_ref().map_or(0, |c| c.count),
                "lastUpdated": counted.map(|c| c.last_updated.to_rfc3339()),
            }),
        );
    }

    let db = &state.config.database;
    Ok(Json(json!({
        "connected": true,
        "timestamp": now,
        "database": {
            "provider": state.store.provider(),
            "tenant": db.tenant,
            "database": db.database,
        },
        "collections": {
            "total": collections.len(),
            "list": collections,
            "details": details,
        },
        "stats": {
            "totalRuntimeOperations": state.counters.total(),
        },
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_request_builds_records() {
        let req: AddRequest = serde_json::from_value(json!({
            "ids": ["a", "b"],
            "embeddings": [[1.0], [2.0]],
            "documents": ["first", null],
        }))
        .unwrap();
        let records = req.into_records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].document.as_deref(), Some("first"));
        assert_eq!(records[1].document, None);
        assert_eq!(records[1].metadata, None);
    }

    #[test]
    fn add_request_rejects_mismatched_lengths() {
        let req: AddRequest = serde_json::from_value(json!({
            "ids": ["a", "b"],
            "embeddings": [[1.0]],
        }))
        .unwrap();
        assert_eq!(req.into_records().unwrap_err().status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn string_array_requires_strings() {
        assert_eq!(string_array(Some(&json!(["a", "b"]))), Some(vec!["a".into(), "b".into()]));
        assert_eq!(string_array(Some(&json!(["a", 1]))), None);
        assert_eq!(string_array(Some(&json!("a"))), None);
        assert_eq!(string_array(None), None);
    }

    #[test]
    fn empty_get_body_uses_defaults() {
        let req: GetRequest = parse_body(&Bytes::from_static(b"  ")).unwrap();
        assert!(req.ids.is_none());
        assert!(parse_body::<GetRequest>(&Bytes::from_static(b"{")).is_err());
    }
}
