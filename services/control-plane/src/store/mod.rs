//! Resource record store.
//!
//! The control plane persists every resource as a JSON record addressed by
//! `(kind, id)`. [`RecordStore`] is the backend seam; [`Store`] is the typed
//! facade the rest of the crate uses.

mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use herd_model::Resource;
use serde_json::Value;
use thiserror::Error;

pub use memory::MemoryStore;

/// Store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with this id exists.
    #[error("{kind} {id} not found")]
    NotFound { kind: String, id: String },

    /// A record with this id already exists.
    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: String, id: String },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Backend for persisted records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert(&self, kind: &str, id: &str, record: Value) -> StoreResult<()>;

    async fn fetch(&self, kind: &str, id: &str) -> StoreResult<Value>;

    async fn update(&self, kind: &str, id: &str, record: Value) -> StoreResult<()>;

    async fn remove(&self, kind: &str, id: &str) -> StoreResult<()>;

    async fn list(&self, kind: &str) -> StoreResult<Vec<Value>>;
}

/// Typed access to a [`RecordStore`].
#[derive(Clone)]
pub struct Store {
    inner: Arc<dyn RecordStore>,
}

impl Store {
    pub fn new(inner: Arc<dyn RecordStore>) -> Self {
        Self { inner }
    }

    /// A store backed by process memory.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub async fn create<R: Resource>(&self, resource: &R) -> StoreResult<()> {
        let record = serde_json::to_value(resource)?;
        self.inner.insert(R::KIND, resource.id(), record).await
    }

    pub async fn get<R: Resource>(&self, id: &str) -> StoreResult<R> {
        let record = self.inner.fetch(R::KIND, id).await?;
        Ok(serde_json::from_value(record)?)
    }

    /// Persist an existing record.
    pub async fn save<R: Resource>(&self, resource: &R) -> StoreResult<()> {
        let record = serde_json::to_value(resource)?;
        self.inner.update(R::KIND, resource.id(), record).await
    }

    pub async fn delete<R: Resource>(&self, id: &str) -> StoreResult<()> {
        self.inner.remove(R::KIND, id).await
    }

    pub async fn list<R: Resource>(&self) -> StoreResult<Vec<R>> {
        self.inner
            .list(R::KIND)
            .await?
            .into_iter()
            .map(|record| serde_json::from_value(record).map_err(StoreError::from))
            .collect()
    }

    /// All records of a kind matching `predicate`.
    pub async fn find<R, P>(&self, predicate: P) -> StoreResult<Vec<R>>
    where
        R: Resource,
        P: Fn(&R) -> bool,
    {
        let mut records = self.list::<R>().await?;
        records.retain(|r| predicate(r));
        Ok(records)
    }
}
