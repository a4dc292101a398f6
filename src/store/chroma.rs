//! Chroma v2 HTTP API backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use super::{CollectionInfo, GetRequest, QueryRequest, StoreError, VectorRecord, VectorStore};
use crate::config::DatabaseConfig;

pub struct ChromaStore {
    http: reqwest::Client,
    /// `{url}/api/v2/tenants/{tenant}/databases/{database}/collections`
    collections_url: String,
}

impl ChromaStore {
    pub fn new(config: &DatabaseConfig) -> Result<Self, StoreError> {
        if config.url.is_empty() {
            return Err(StoreError::InvalidRequest("chroma requires a database url".into()));
        }

        let mut headers = HeaderMap::new();
        if !config.api_key.is_empty() {
            let value = HeaderValue::from_str(&config.api_key)
                .map_err(|_| StoreError::InvalidRequest("api key is not a valid header value".into()))?;
            headers.insert("x-api-key", value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            collections_url: format!(
                "{}/api/v2/tenants/{}/databases/{}/collections",
                config.url.trim_end_matches('/'),
                config.tenant,
                config.database
            ),
        })
    }

    async fn post<B, T>(&self, url: String, body: &B) -> Result<T, StoreError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        tracing::debug!(url = %url, "Chroma request");
        let response = self.http.post(&url).json(body).send().await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, StoreError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body = %body, "Chroma request failed");
            return Err(StoreError::Backend(format!("chroma returned {}: {}", status, body)));
        }
        let text = response.text().await?;
        if text.trim().is_empty() {
            return serde_json::from_value(Value::Null).map_err(|e| StoreError::Backend(e.to_string()));
        }
        serde_json::from_str(&text).map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn collection_id(&self, name: &str) -> Result<String, StoreError> {
        self.list_collections()
            .await?
            .into_iter()
            .find(|c| c.name == name)
            .map(|c| c.id)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn collection_url(&self, name: &str, op: &str) -> Result<String, StoreError> {
        let id = self.collection_id(name).await?;
        Ok(format!("{}/{}/{}", self.collections_url, id, op))
    }
}

#[async_trait]
impl VectorStore for ChromaStore {
    fn provider(&self) -> &'static str {
        "chroma"
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, StoreError> {
        let response = self.http.get(&self.collections_url).send().await?;
        Self::decode(response).await
    }

    async fn create_collection(&self, name: &str) -> Result<(), StoreError> {
        let _: Value = self.post(self.collections_url.clone(), &json!({ "name": name })).await?;
        Ok(())
    }

    async fn add_vectors(&self, collection: &str, records: Vec<VectorRecord>) -> Result<(), StoreError> {
        let url = self.collection_url(collection, "add").await?;
        let body = json!({
            "ids": records.iter().map(|r| &r.id).collect::<Vec<_>>(),
            "embeddings": records.iter().map(|r| &r.embedding).collect::<Vec<_>>(),
            "metadatas": records.iter().map(|r| r.metadata.clone().unwrap_or_else(|| json!({}))).collect::<Vec<_>>(),
            "documents": records.iter().map(|r| &r.document).collect::<Vec<_>>(),
        });
        let _: Value = self.post(url, &body).await?;
        Ok(())
    }

    async fn query(&self, collection: &str, request: QueryRequest) -> Result<Value, StoreError> {
        let url = self.collection_url(collection, "query").await?;
        self.post(url, &request).await
    }

    async fn get_records(&self, collection: &str, request: GetRequest) -> Result<Value, StoreError> {
        let url = self.collection_url(collection, "get").await?;
        let columns = request.columns();
        let body = json!({
            "ids": request.ids,
            "include": columns,
            "limit": request.limit.unwrap_or(10),
            "offset": request.offset,
            "where": request.r#where,
        });
        let mut data: Value = self.post(url, &body).await?;
        if let Some(obj) = data.as_object_mut() {
            obj.entry("include").or_insert_with(|| json!(columns));
        }
        Ok(data)
    }

    async fn update_records(
        &self,
        collection: &str,
        ids: Vec<String>,
        metadatas: Vec<Value>,
    ) -> Result<(), StoreError> {
        let url = self.collection_url(collection, "update").await?;
        let _: Value = self.post(url, &json!({ "ids": ids, "metadatas": metadatas })).await?;
        Ok(())
    }

    async fn delete_vectors(&self, collection: &str, ids: Vec<String>) -> Result<(), StoreError> {
        let url = self.collection_url(collection, "delete").await?;
        let _: Value = self.post(url, &json!({ "ids": ids })).await?;
        Ok(())
    }
}
