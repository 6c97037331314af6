//! Handover records
//!
//! A handover is a persisted id list plus the collection and field it
//! refers to. Its access id lets a later request page through or reuse a
//! result set without re-running the query.

use crate::definitions::DEFAULT_HANDOVER_MAX_BYTES;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoverRecord {
    pub id: String,
    pub target_key: String,
    pub target_collection: String,
    pub source_db: String,
    pub target_values: Vec<String>,
    pub target_count: u64,
}

#[derive(Debug, ThisError)]
pub enum HandoverLookupError {
    #[error("Handover not found: {0}")]
    NotFound(String),

    #[error("Handover store error: {0}")]
    Store(String),
}

/// Persistence for handover records.
#[async_trait]
pub trait HandoverBackend: Send + Sync {
    async fn save(&self, record: &HandoverRecord) -> Result<()>;

    async fn load(&self, id: &str) -> Result<Option<HandoverRecord>>;

    /// Release held connections. Called once at shutdown.
    async fn close(&self) {}
}

#[derive(Default)]
pub struct MemoryHandoverBackend {
    records: RwLock<HashMap<String, HandoverRecord>>,
}

impl MemoryHandoverBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl HandoverBackend for MemoryHandoverBackend {
    async fn save(&self, record: &HandoverRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<HandoverRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn close(&self) {
        self.records.write().await.clear();
    }
}

/// Result of [`HandoverStore::create`].
#[derive(Debug, Clone)]
pub struct CreatedHandover {
    pub record: HandoverRecord,
    /// False when the id list exceeded the size ceiling and only lives in
    /// this response.
    pub persisted: bool,
    pub size_bytes: usize,
}

impl CreatedHandover {
    pub fn access_id(&self) -> &str {
        &self.record.id
    }
}

#[derive(Clone)]
pub struct HandoverStore {
    backend: Arc<dyn HandoverBackend>,
    max_payload_bytes: usize,
}

impl HandoverStore {
    pub fn new(backend: Arc<dyn HandoverBackend>, max_payload_bytes: usize) -> Self {
        Self {
            backend,
            max_payload_bytes,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryHandoverBackend::new()), DEFAULT_HANDOVER_MAX_BYTES)
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    /// Registers an id list under a fresh access id.
    ///
    /// Lists whose serialized form exceeds the ceiling get an access id but
    /// are not written; the returned record still carries the values.
    pub async fn create(
        &self,
        target_key: &str,
        target_collection: &str,
        source_db: &str,
        values: Vec<String>,
        total_count: u64,
    ) -> Result<CreatedHandover> {
        let size_bytes = serde_json::to_vec(&values)?.len();
        let record = HandoverRecord {
            id: uuid::Uuid::new_v4().to_string(),
            target_key: target_key.to_string(),
            target_collection: target_collection.to_string(),
            source_db: source_db.to_string(),
            target_values: values,
            target_count: total_count,
        };

        if size_bytes > self.max_payload_bytes {
            tracing::warn!(
                access_id = %record.id,
                collection = %target_collection,
                size_bytes,
                max_bytes = self.max_payload_bytes,
                "Handover too large to persist"
            );
            return Ok(CreatedHandover {
                record,
                persisted: false,
                size_bytes,
            });
        }

        self.backend.save(&record).await.inspect_err(|e| {
            tracing::error!(access_id = %record.id, error = %e, "Failed to persist handover");
        })?;

        Ok(CreatedHandover {
            record,
            persisted: true,
            size_bytes,
        })
    }

    pub async fn retrieve(&self, access_id: &str) -> std::result::Result<HandoverRecord, HandoverLookupError> {
        match self.backend.load(access_id).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(HandoverLookupError::NotFound(access_id.to_string())),
            Err(e) => Err(HandoverLookupError::Store(e.to_string())),
        }
    }

    pub async fn close(&self) {
        self.backend.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("pgxbs-{i:06}")).collect()
    }

    #[tokio::test]
    async fn retrieve_returns_created_record() {
        let store = HandoverStore::in_memory();
        let created = store
            .create("_id", "biosamples", "progenetix", ids(3), 3)
            .await
            .unwrap();
        assert!(created.persisted);

        let record = store.retrieve(created.access_id()).await.unwrap();
        assert_eq!(record.target_values, ids(3));
        assert_eq!(record.target_count, 3);
        assert_eq!(record.target_collection, "biosamples");
    }

    #[tokio::test]
    async fn oversized_payload_is_not_persisted() {
        let backend = Arc::new(MemoryHandoverBackend::new());
        let store = HandoverStore::new(backend.clone(), 64);
        let created = store
            .create("_id", "variants", "progenetix", ids(100), 100)
            .await
            .unwrap();

        assert!(!created.persisted);
        assert!(created.size_bytes > 64);
        assert_eq!(created.record.target_values.len(), 100);
        assert_eq!(backend.len().await, 0);
        assert!(matches!(
            store.retrieve(created.access_id()).await,
            Err(HandoverLookupError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_access_id_is_not_found() {
        let store = HandoverStore::in_memory();
        let err = store.retrieve("no-such-id").await.unwrap_err();
        assert!(matches!(err, HandoverLookupError::NotFound(id) if id == "no-such-id"));
    }

    #[tokio::test]
    async fn access_ids_are_unique() {
        let store = HandoverStore::in_memory();
        let a = store.create("_id", "biosamples", "db", ids(1), 1).await.unwrap();
        let b = store.create("_id", "biosamples", "db", ids(1), 1).await.unwrap();
        assert_ne!(a.access_id(), b.access_id());
    }
}
