//! Document store contract
//!
//! The engine never talks to a database driver directly. Anything that can
//! evaluate a [`Predicate`] against a named collection in a named logical
//! database can back it: Postgres in the server, memory in tests.

use crate::error::Result;
use crate::predicate::{values_at, Predicate};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Field holding the store-assigned document id.
pub const ID_FIELD: &str = "_id";

/// Read operations the engine needs from a document store.
///
/// Every call is one unit of work; implementations acquire and release
/// their connections inside it.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch matching documents
    ///
    /// # Arguments
    /// * `database` - Logical database (dataset) name
    /// * `collection` - Collection name, e.g. "biosamples"
    /// * `predicate` - Query; `None` selects every document
    /// * `limit` - Optional maximum number of documents
    async fn find(
        &self,
        database: &str,
        collection: &str,
        predicate: Option<&Predicate>,
        limit: Option<usize>,
    ) -> Result<Vec<JsonValue>>;

    /// Ids (`_id`) of all matching documents, in store order
    async fn find_ids(
        &self,
        database: &str,
        collection: &str,
        predicate: &Predicate,
    ) -> Result<Vec<String>>;

    async fn count(
        &self,
        database: &str,
        collection: &str,
        predicate: Option<&Predicate>,
    ) -> Result<u64>;

    /// Distinct values reachable at `field` over matching documents
    async fn distinct(
        &self,
        database: &str,
        collection: &str,
        field: &str,
        predicate: Option<&Predicate>,
    ) -> Result<Vec<JsonValue>>;

    /// Fetch documents by `_id`, returned in the order of `ids`
    async fn find_by_ids(
        &self,
        database: &str,
        collection: &str,
        ids: &[String],
    ) -> Result<Vec<JsonValue>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let predicate = Predicate::is_in(ID_FIELD, ids.iter().cloned());
        let mut documents = self.find(database, collection, Some(&predicate), None).await?;
        documents.sort_by_key(|doc| {
            document_id(doc)
                .and_then(|id| ids.iter().position(|candidate| *candidate == id))
                .unwrap_or(usize::MAX)
        });
        Ok(documents)
    }
}

/// String form of a document's `_id`.
pub fn document_id(document: &JsonValue) -> Option<String> {
    match document.get(ID_FIELD)? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// In-memory document store evaluating predicates with [`Predicate::matches`].
#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<(String, String), Vec<JsonValue>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a document, assigning an `_id` when it has none. Returns the id.
    pub async fn insert(&self, database: &str, collection: &str, mut document: JsonValue) -> String {
        let id = match document_id(&document) {
            Some(id) => id,
            None => {
                let id = uuid::Uuid::new_v4().simple().to_string();
                if let Some(map) = document.as_object_mut() {
                    map.insert(ID_FIELD.to_string(), JsonValue::String(id.clone()));
                }
                id
            }
        };
        self.collections
            .write()
            .await
            .entry((database.to_string(), collection.to_string()))
            .or_default()
            .push(document);
        id
    }

    pub async fn insert_many(
        &self,
        database: &str,
        collection: &str,
        documents: impl IntoIterator<Item = JsonValue>,
    ) -> Vec<String> {
        let mut ids = Vec::new();
        for document in documents {
            ids.push(self.insert(database, collection, document).await);
        }
        ids
    }

    async fn matching(
        &self,
        database: &str,
        collection: &str,
        predicate: Option<&Predicate>,
    ) -> Vec<JsonValue> {
        let guard = self.collections.read().await;
        guard
            .get(&(database.to_string(), collection.to_string()))
            .map(|docs| {
                docs.iter()
                    .filter(|doc| predicate.map_or(true, |p| p.matches(doc)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find(
        &self,
        database: &str,
        collection: &str,
        predicate: Option<&Predicate>,
        limit: Option<usize>,
    ) -> Result<Vec<JsonValue>> {
        let mut documents = self.matching(database, collection, predicate).await;
        if let Some(limit) = limit {
            documents.truncate(limit);
        }
        Ok(documents)
    }

    async fn find_ids(
        &self,
        database: &str,
        collection: &str,
        predicate: &Predicate,
    ) -> Result<Vec<String>> {
        Ok(self
            .matching(database, collection, Some(predicate))
            .await
            .iter()
            .filter_map(document_id)
            .collect())
    }

    async fn count(
        &self,
        database: &str,
        collection: &str,
        predicate: Option<&Predicate>,
    ) -> Result<u64> {
        Ok(self.matching(database, collection, predicate).await.len() as u64)
    }

    async fn distinct(
        &self,
        database: &str,
        collection: &str,
        field: &str,
        predicate: Option<&Predicate>,
    ) -> Result<Vec<JsonValue>> {
        let documents = self.matching(database, collection, predicate).await;
        let mut values: Vec<JsonValue> = Vec::new();
        for document in &documents {
            for value in values_at(document, field) {
                if !values.contains(value) {
                    values.push(value.clone());
                }
            }
        }
        Ok(values)
    }
}
