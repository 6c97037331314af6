//! Postgres handover backend

use async_trait::async_trait;
use beacon_query::{HandoverBackend, HandoverRecord};
use chrono::{Duration, Utc};
use sqlx::PgPool;

#[derive(Clone)]
pub struct PgHandoverBackend {
    pool: PgPool,
}

impl PgHandoverBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Deletes handovers created more than `hours` ago. Returns the number removed.
    pub async fn purge_older_than(&self, hours: u64) -> Result<u64, sqlx::Error> {
        let hours = i64::try_from(hours).unwrap_or(i64::MAX);
        let Some(cutoff) = Duration::try_hours(hours).and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(0);
        };
        let result = sqlx::query("DELETE FROM handovers WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn store_error(e: sqlx::Error) -> beacon_query::Error {
    tracing::error!(error = %e, "Handover store query failed");
    beacon_query::Error::store(e.to_string())
}

#[async_trait]
impl HandoverBackend for PgHandoverBackend {
    async fn save(&self, record: &HandoverRecord) -> beacon_query::Result<()> {
        sqlx::query("INSERT INTO handovers (id, record) VALUES ($1, $2)")
            .bind(&record.id)
            .bind(sqlx::types::Json(record))
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn load(&self, id: &str) -> beacon_query::Result<Option<HandoverRecord>> {
        let record: Option<sqlx::types::Json<HandoverRecord>> =
            sqlx::query_scalar("SELECT record FROM handovers WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error)?;
        Ok(record.map(|r| r.0))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
