//! Per-collection ingestion counters.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionCount {
    pub count: u64,
    pub last_updated: DateTime<Utc>,
}

/// Collection name → items ingested since start. Counts only grow.
#[derive(Debug, Default)]
pub struct CollectionCounters {
    inner: DashMap<String, CollectionCount>,
}

impl CollectionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` to `collection` and return the new count.
    pub fn increment(&self, collection: &str, delta: u64) -> u64 {
        let now = Utc::now();
        let mut entry = self
            .inner
            .entry(collection.to_string())
            .or_insert(CollectionCount {
                count: 0,
                last_updated: now,
            });
        entry.count = entry.count.saturating_add(delta);
        entry.last_updated = now;
        entry.count
    }

    pub fn get(&self, collection: &str) -> Option<CollectionCount> {
        self.inner.get(collection).map(|e| e.value().clone())
    }

    /// Sorted copy for serialization.
    pub fn snapshot(&self) -> BTreeMap<String, CollectionCount> {
        self.inner
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Sum over every collection.
    pub fn total(&self) -> u64 {
        self.inner.iter().map(|e| e.value().count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate() {
        let counters = CollectionCounters::new();
        assert_eq!(counters.increment("docs", 3), 3);
        assert_eq!(counters.increment("docs", 2), 5);
        assert_eq!(counters.increment("notes", 1), 1);

        assert_eq!(counters.len(), 2);
        assert_eq!(counters.total(), 6);
        assert_eq!(counters.names(), vec!["docs", "notes"]);
    }

    #[test]
    fn zero_delta_still_touches_timestamp() {
        let counters = CollectionCounters::new();
        counters.increment("docs", 1);
        let before = counters.get("docs").unwrap().last_updated;
        assert_eq!(counters.increment("docs", 0), 1);
        assert!(counters.get("docs").unwrap().last_updated >= before);
    }

    #[test]
    fn serializes_camel_case() {
        let counters = CollectionCounters::new();
        counters.increment("docs", 1);
        let json = serde_json::to_value(counters.snapshot()).unwrap();
        assert_eq!(json["docs"]["count"], 1);
        assert!(json["docs"]["lastUpdated"].is_string());
    }
}
