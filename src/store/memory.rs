//! In-process vector store.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Map, Value};

use super::{CollectionInfo, GetRequest, QueryRequest, StoreError, VectorRecord, VectorStore};

#[derive(Debug, Default)]
struct Collection {
    id: String,
    records: Vec<VectorRecord>,
}

impl Collection {
    fn upsert(&mut self, record: VectorRecord) {
        match self.records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }
}

/// Keeps every collection in memory. Data is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: DashMap<String, Collection>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn missing(name: &str) -> StoreError {
        StoreError::NotFound(name.to_string())
    }
}

/// Cosine similarity; zero vectors and mismatched dimensions score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

fn matches_where(metadata: Option<&Value>, filter: Option<&Value>) -> bool {
    let Some(Value::Object(filter)) = filter else {
        return true;
    };
    let Some(Value::Object(meta)) = metadata else {
        return filter.is_empty();
    };
    filter.iter().all(|(key, expected)| {
        let expected = expected.get("$eq").unwrap_or(expected);
        meta.get(key) == Some(expected)
    })
}

fn column(records: &[&VectorRecord], name: &str) -> Value {
    match name {
        "documents" => records.iter().map(|r| json!(r.document)).collect(),
        "metadatas" => records.iter().map(|r| json!(r.metadata)).collect(),
        "embeddings" => records.iter().map(|r| json!(r.embedding)).collect(),
        _ => Value::Null,
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn provider(&self) -> &'static str {
        "memory"
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, StoreError> {
        let mut list: Vec<CollectionInfo> = self
            .collections
            .iter()
            .map(|entry| CollectionInfo {
                id: entry.value().id.clone(),
                name: entry.key().clone(),
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.collections.contains_key(name))
    }

    async fn create_collection(&self, name: &str) -> Result<(), StoreError> {
        if name.is_empty() {
            return Err(StoreError::InvalidRequest("collection name is empty".into()));
        }
        self.collections.entry(name.to_string()).or_insert_with(|| Collection {
            id: format!("mem-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1),
            records: Vec::new(),
        });
        Ok(())
    }

    async fn add_vectors(&self, collection: &str, records: Vec<VectorRecord>) -> Result<(), StoreError> {
        let mut entry = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| Self::missing(collection))?;
        for record in records {
            entry.upsert(record);
        }
        Ok(())
    }

    async fn query(&self, collection: &str, request: QueryRequest) -> Result<Value, StoreError> {
        let entry = self
            .collections
            .get(collection)
            .ok_or_else(|| Self::missing(collection))?;

        let mut ids = Vec::new();
        let mut distances = Vec::new();
        let mut extra: Map<String, Value> = Map::new();
        for name in &request.include {
            extra.insert(name.clone(), Value::Array(Vec::new()));
        }

        for query in &request.query_embeddings {
            let mut scored: Vec<(f32, &VectorRecord)> = entry
                .records
                .iter()
                .map(|r| (cosine_similarity(query, &r.embedding), r))
                .collect();
            scored.sort_by(|a, b| b.0.total_cmp(&a.0));
            scored.truncate(request.n_results);

            let hits: Vec<&VectorRecord> = scored.iter().map(|(_, r)| *r).collect();
            ids.push(json!(hits.iter().map(|r| &r.id).collect::<Vec<_>>()));
            distances.push(json!(scored.iter().map(|(s, _)| 1.0 - s).collect::<Vec<_>>()));
            for (name, values) in extra.iter_mut() {
                if let Value::Array(list) = values {
                    list.push(column(&hits, name));
                }
            }
        }

        let mut out = Map::new();
        out.insert("ids".into(), Value::Array(ids));
        out.insert("distances".into(), Value::Array(distances));
        out.extend(extra);
        Ok(Value::Object(out))
    }

    async fn get_records(&self, collection: &str, request: GetRequest) -> Result<Value, StoreError> {
        let entry = self
            .collections
            .get(collection)
            .ok_or_else(|| Self::missing(collection))?;

        let selected: Vec<&VectorRecord> = entry
            .records
            .iter()
            .filter(|r| request.ids.as_ref().map_or(true, |ids| ids.contains(&r.id)))
            .filter(|r| matches_where(r.metadata.as_ref(), request.r#where.as_ref()))
            .skip(request.offset)
            .take(request.limit.unwrap_or(usize::MAX))
            .collect();

        let columns = request.columns();
        let mut out = Map::new();
        out.insert("ids".into(), json!(selected.iter().map(|r| &r.id).collect::<Vec<_>>()));
        for name in &columns {
            out.insert(name.clone(), column(&selected, name));
        }
        out.insert("include".into(), json!(columns));
        Ok(Value::Object(out))
    }

    async fn update_records(
        &self,
        collection: &str,
        ids: Vec<String>,
        metadatas: Vec<Value>,
    ) -> Result<(), StoreError> {
        if ids.len() != metadatas.len() {
            return Err(StoreError::InvalidRequest(
                "ids and metadatas must have the same length".into(),
            ));
        }
        let mut entry = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| Self::missing(collection))?;
        for (id, metadata) in ids.into_iter().zip(metadatas) {
            if let Some(record) = entry.records.iter_mut().find(|r| r.id == id) {
                record.metadata = Some(metadata);
            }
        }
        Ok(())
    }

    async fn delete_vectors(&self, collection: &str, ids: Vec<String>) -> Result<(), StoreError> {
        let mut entry = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| Self::missing(collection))?;
        entry.records.retain(|r| !ids.contains(&r.id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, embedding: &[f32], topic: &str) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            embedding: embedding.to_vec(),
            metadata: Some(json!({ "topic": topic })),
            document: Some(format!("doc {}", id)),
        }
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.ensure_collection("notes").await.unwrap();
        store
            .add_vectors(
                "notes",
                vec![
                    record("a", &[1.0, 0.0], "x"),
                    record("b", &[0.0, 1.0], "y"),
                    record("c", &[0.7, 0.7], "x"),
                ],
            )
            .await
            .unwrap();
        store
    }

    #[test]
    fn cosine_edge_cases() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn ensure_collection_is_idempotent() {
        let store = MemoryStore::new();
        store.ensure_collection("notes").await.unwrap();
        store.ensure_collection("notes").await.unwrap();
        let list = store.list_collections().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "notes");
    }

    #[tokio::test]
    async fn query_ranks_by_similarity() {
        let store = seeded().await;
        let result = store
            .query(
                "notes",
                QueryRequest {
                    query_embeddings: vec![vec![1.0, 0.1]],
                    n_results: 2,
                    include: vec!["documents".into()],
                },
            )
            .await
            .unwrap();

        assert_eq!(result["ids"], json!([["a", "c"]]));
        assert_eq!(result["documents"], json!([["doc a", "doc c"]]));
        assert!(result.get("metadatas").is_none());
    }

    #[tokio::test]
    async fn get_filters_and_pages() {
        let store = seeded().await;
        let result = store
            .get_records(
                "notes",
                GetRequest {
                    r#where: Some(json!({ "topic": "x" })),
                    limit: Some(1),
                    offset: 1,
                    ..GetRequest::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result["ids"], json!(["c"]));
    }

    #[tokio::test]
    async fn update_and_delete() {
        let store = seeded().await;
        store
            .update_records("notes", vec!["b".into()], vec![json!({ "topic": "z" })])
            .await
            .unwrap();
        store.delete_vectors("notes", vec!["a".into()]).await.unwrap();

        let result = store.get_records("notes", GetRequest::default()).await.unwrap();
        assert_eq!(result["ids"], json!(["b", "c"]));
        assert_eq!(result["metadatas"][0], json!({ "topic": "z" }));
    }

    #[tokio::test]
    async fn missing_collection_is_not_found() {
        let store = MemoryStore::new();
        let err = store.delete_vectors("nope", vec!["a".into()]).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
