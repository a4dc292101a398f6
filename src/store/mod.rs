//! Vector database backends.
//!
//! # Data Flow
//! ```text
//! POST /db/{collection}/<op>
//!     → VectorStore (memory | chroma)
//!     → on add: IngestEvent → WebSocketGateway::apply_ingest → status broadcast
//! ```
//!
//! Query results keep the Chroma column layout (`ids`, `distances`,
//! `documents`, `metadatas`, one inner list per query embedding) whichever
//! backend answers.

pub mod chroma;
pub mod events;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::DatabaseConfig;

pub use chroma::ChromaStore;
pub use events::IngestEvent;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("collection not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("vector backend error: {0}")]
    Backend(String),
    #[error("unknown vector database provider: {0}")]
    UnknownProvider(String),
}

impl StoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            StoreError::Backend(_) => StatusCode::BAD_GATEWAY,
            StoreError::UnknownProvider(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub id: String,
    pub name: String,
}

/// One item to store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub document: Option<String>,
}

fn default_n_results() -> usize {
    10
}

fn default_include() -> Vec<String> {
    vec!["documents".to_string(), "metadatas".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query_embeddings: Vec<Vec<f32>>,
    #[serde(default = "default_n_results")]
    pub n_results: usize,
    #[serde(default = "default_include")]
    pub include: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#where: Option<Value>,
}

impl GetRequest {
    /// Requested columns, with the pseudo-column `ids` removed (ids are always returned).
    pub fn columns(&self) -> Vec<String> {
        self.include
            .clone()
            .unwrap_or_else(default_include)
            .into_iter()
            .filter(|c| c != "ids")
            .collect()
    }
}

/// A collection-scoped vector database.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Provider name reported by `/db/status`.
    fn provider(&self) -> &'static str;

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, StoreError>;

    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self
            .list_collections()
            .await?
            .iter()
            .any(|c| c.name == name))
    }

    async fn create_collection(&self, name: &str) -> Result<(), StoreError>;

    async fn add_vectors(&self, collection: &str, records: Vec<VectorRecord>) -> Result<(), StoreError>;

    async fn query(&self, collection: &str, request: QueryRequest) -> Result<Value, StoreError>;

    async fn get_records(&self, collection: &str, request: GetRequest) -> Result<Value, StoreError>;

    async fn update_records(
        &self,
        collection: &str,
        ids: Vec<String>,
        metadatas: Vec<Value>,
    ) -> Result<(), StoreError>;

    async fn delete_vectors(&self, collection: &str, ids: Vec<String>) -> Result<(), StoreError>;

    /// Create `name` unless it already exists.
    async fn ensure_collection(&self, name: &str) -> Result<(), StoreError> {
        if !self.collection_exists(name).await? {
            tracing::info!(collection = name, "Creating collection");
            self.create_collection(name).await?;
        }
        Ok(())
    }
}

/// Build the store named by `config.provider`.
pub fn open_store(config: &DatabaseConfig) -> Result<Arc<dyn VectorStore>, StoreError> {
    match config.provider.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "chroma" => Ok(Arc::new(ChromaStore::new(config)?)),
        other => Err(StoreError::UnknownProvider(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_store_selects_provider() {
        let store = open_store(&DatabaseConfig::default()).unwrap();
        assert_eq!(store.provider(), "memory");

        let config = DatabaseConfig {
            provider: "chroma".into(),
            url: "http://localhost:8000".into(),
            ..DatabaseConfig::default()
        };
        assert_eq!(open_store(&config).unwrap().provider(), "chroma");

        let config = DatabaseConfig {
            provider: "milvus".into(),
            ..DatabaseConfig::default()
        };
        assert!(matches!(open_store(&config), Err(StoreError::UnknownProvider(_))));
    }

    #[test]
    fn query_request_defaults() {
        let req: QueryRequest = serde_json::from_str(r#"{"query_embeddings": [[1.0, 0.0]]}"#).unwrap();
        assert_eq!(req.n_results, 10);
        assert_eq!(req.include, vec!["documents", "metadatas"]);
    }

    #[test]
    fn get_columns_drop_ids() {
        let req = GetRequest {
            include: Some(vec!["ids".into(), "metadatas".into()]),
            ..GetRequest::default()
        };
        assert_eq!(req.columns(), vec!["metadatas"]);
    }
}
