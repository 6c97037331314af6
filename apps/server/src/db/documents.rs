//! Postgres-backed document store
//!
//! All collections of all logical databases share the `documents` table;
//! `(database, collection, id)` is the key and the document itself lives
//! in `body`. Insertion order (`seq`) is the store order.

use async_trait::async_trait;
use beacon_query::store::ID_FIELD;
use beacon_query::{DocumentStore, Predicate};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};

use super::sql::{push_text, render_predicate, values_path, BindValue};

#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `WHERE` clause for one collection; `$1`/`$2` are database and collection.
    fn scoped(
        database: &str,
        collection: &str,
        predicate: Option<&Predicate>,
    ) -> (String, Vec<BindValue>) {
        let mut bind_params = Vec::new();
        push_text(&mut bind_params, database.to_string());
        push_text(&mut bind_params, collection.to_string());

        let mut clause = "d.database = $1 AND d.collection = $2".to_string();
        if let Some(predicate) = predicate {
            let rendered = render_predicate(predicate, &mut bind_params);
            clause.push_str(" AND ");
            clause.push_str(&rendered);
        }
        (clause, bind_params)
    }
}

fn store_error(e: sqlx::Error) -> beacon_query::Error {
    tracing::error!(error = %e, "Document store query failed");
    beacon_query::Error::store(e.to_string())
}

macro_rules! bind_all {
    ($query:expr, $values:expr) => {{
        let mut query = $query;
        for value in $values {
            query = match value {
                BindValue::Text(v) => query.bind(v),
                BindValue::TextArray(vs) => query.bind(vs),
            };
        }
        query
    }};
}

fn with_id(id: String, mut body: JsonValue) -> JsonValue {
    if let Some(map) = body.as_object_mut() {
        map.insert(ID_FIELD.to_string(), JsonValue::String(id));
    }
    body
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn find(
        &self,
        database: &str,
        collection: &str,
        predicate: Option<&Predicate>,
        limit: Option<usize>,
    ) -> beacon_query::Result<Vec<JsonValue>> {
        let (clause, bind_params) = Self::scoped(database, collection, predicate);
        let mut sql = format!("SELECT d.id, d.body FROM documents d WHERE {clause} ORDER BY d.seq");
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let rows = bind_all!(sqlx::query(&sql), bind_params)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;

        rows.into_iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(store_error)?;
                let body: sqlx::types::Json<JsonValue> = row.try_get("body").map_err(store_error)?;
                Ok(with_id(id, body.0))
            })
            .collect()
    }

    async fn find_ids(
        &self,
        database: &str,
        collection: &str,
        predicate: &Predicate,
    ) -> beacon_query::Result<Vec<String>> {
        let (clause, bind_params) = Self::scoped(database, collection, Some(predicate));
        let sql = format!("SELECT d.id FROM documents d WHERE {clause} ORDER BY d.seq");

        bind_all!(sqlx::query_scalar::<_, String>(&sql), bind_params)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)
    }

    async fn count(
        &self,
        database: &str,
        collection: &str,
        predicate: Option<&Predicate>,
    ) -> beacon_query::Result<u64> {
        let (clause, bind_params) = Self::scoped(database, collection, predicate);
        let sql = format!("SELECT COUNT(*) FROM documents d WHERE {clause}");

        let total = bind_all!(sqlx::query_scalar::<_, i64>(&sql), bind_params)
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(total.max(0) as u64)
    }

    async fn distinct(
        &self,
        database: &str,
        collection: &str,
        field: &str,
        predicate: Option<&Predicate>,
    ) -> beacon_query::Result<Vec<JsonValue>> {
        let (clause, mut bind_params) = Self::scoped(database, collection, predicate);
        let path_idx = push_text(&mut bind_params, values_path(field));
        let sql = format!(
            "SELECT v.value FROM documents d, \
             jsonb_path_query(d.body, ${path_idx}::jsonpath) AS v(value) \
             WHERE {clause} ORDER BY d.seq"
        );

        let rows = bind_all!(
            sqlx::query_scalar::<_, sqlx::types::Json<JsonValue>>(&sql),
            bind_params
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        let mut values: Vec<JsonValue> = Vec::new();
        for sqlx::types::Json(value) in rows {
            if !value.is_object() && !value.is_array() && !values.contains(&value) {
                values.push(value);
            }
        }
        Ok(values)
    }
}
