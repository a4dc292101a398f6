//! Messages pushed to status subscribers.

use bytes::Bytes;
use chrono::Utc;
use serde_json::json;

use super::counters::CollectionCounters;

/// First frame on a new status connection.
pub fn snapshot_message(counters: &CollectionCounters, collection_list: &[String]) -> Bytes {
    let body = json!({
        "timestamp": Utc::now().to_rfc3339(),
        "collections": counters.snapshot(),
        "collectionList": collection_list,
        "totalCollections": collection_list.len(),
    });
    Bytes::from(body.to_string())
}

/// Frame sent to every subscriber after an ingestion event.
pub fn update_message(counters: &CollectionCounters, collection: &str, new_count: u64) -> Bytes {
    let body = json!({
        "type": "collection-update",
        "timestamp": Utc::now().to_rfc3339(),
        "collection": collection,
        "newCount": new_count,
        "totalCollections": counters.len(),
        "collections": counters.snapshot(),
    });
    Bytes::from(body.to_string())
}
