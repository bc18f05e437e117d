//! In-memory record store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{RecordStore, StoreError, StoreResult};

/// Records held in process memory, keyed by kind then id.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(kind: &str, id: &str) -> StoreError {
    StoreError::NotFound {
        kind: kind.to_string(),
        id: id.to_string(),
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert(&self, kind: &str, id: &str, record: Value) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let table = records.entry(kind.to_string()).or_default();
        if table.contains_key(id) {
            return Err(StoreError::AlreadyExists {
                kind: kind.to_string(),
                id: id.to_string(),
            });
        }
        table.insert(id.to_string(), record);
        Ok(())
    }

    async fn fetch(&self, kind: &str, id: &str) -> StoreResult<Value> {
        let records = self.records.read().await;
        records
            .get(kind)
            .and_then(|table| table.get(id))
            .cloned()
            .ok_or_else(|| not_found(kind, id))
    }

    async fn update(&self, kind: &str, id: &str, record: Value) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let slot = records
            .get_mut(kind)
            .and_then(|table| table.get_mut(id))
            .ok_or_else(|| not_found(kind, id))?;
        *slot = record;
        Ok(())
    }

    async fn remove(&self, kind: &str, id: &str) -> StoreResult<()> {
        let mut records = self.records.write().await;
        records
            .get_mut(kind)
            .and_then(|table| table.remove(id))
            .map(|_| ())
            .ok_or_else(|| not_found(kind, id))
    }

    async fn list(&self, kind: &str) -> StoreResult<Vec<Value>> {
        let records = self.records.read().await;
        Ok(records
            .get(kind)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default())
    }
}
