//! Ingestion notifications.

/// `count` items were added to `collection`.
///
/// Produced by the write routes after the store accepted the records and
/// applied by [`WebSocketGateway::apply_ingest`](crate::websocket::WebSocketGateway::apply_ingest)
/// on the same call path, so no notification can be dropped between the two.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestEvent {
    pub collection: String,
    pub count: u64,
}

impl IngestEvent {
    pub fn new(collection: impl Into<String>, count: u64) -> Self {
        Self {
            collection: collection.into(),
            count,
        }
    }
}
