//! Shared application state

use crate::config::Config;
use crate::db::{self, PgDocumentStore, PgHandoverBackend};
use anyhow::Context;
use beacon_query::{
    Collation, CollationIndex, Definitions, DocumentStore, GeneCoordinateResolver,
    HandoverBackend, HandoverStore, QueryAssembler, QueryExecutor, SchemaRegistry,
    StoreGeneResolver,
};
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub definitions: Arc<Definitions>,
    pub assembler: Arc<QueryAssembler>,
    pub executor: QueryExecutor,
    pub handovers: HandoverStore,
    pub genes: Arc<dyn GeneCoordinateResolver>,
    pub schemas: Arc<SchemaRegistry>,
    pub store: Arc<dyn DocumentStore>,
    /// `None` when running on in-memory stores.
    pub db_pool: Option<PgPool>,
}

impl AppState {
    /// Connects to Postgres, runs migrations when enabled, and wires the
    /// Postgres-backed stores into the engine.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let pool = db::connect(&config.database)
            .await
            .context("Failed to connect to database")?;

        if config.database.run_migrations {
            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            tracing::info!("Database migrations applied");
        }

        let backend = PgHandoverBackend::new(pool.clone());
        if config.beacon.handover_retention_hours > 0 {
            let purged = backend
                .purge_older_than(config.beacon.handover_retention_hours)
                .await
                .context("Failed to purge expired handovers")?;
            tracing::info!(purged, "Expired handovers purged");
        }

        let store: Arc<dyn DocumentStore> = Arc::new(PgDocumentStore::new(pool.clone()));
        let mut state = Self::with_stores(config, store, Arc::new(backend)).await?;
        state.db_pool = Some(pool);
        Ok(state)
    }

    /// Builds the state on top of the given stores.
    ///
    /// Definitions, collations and response schemas are loaded here once;
    /// everything is read-only afterwards.
    pub async fn with_stores(
        config: Config,
        store: Arc<dyn DocumentStore>,
        handover_backend: Arc<dyn HandoverBackend>,
    ) -> anyhow::Result<Self> {
        let definitions = Arc::new(
            config
                .engine_definitions()
                .context("Failed to load engine definitions")?,
        );

        let collations = load_collations(
            store.as_ref(),
            &config.beacon.info_database,
            &config.beacon.collations_collection,
        )
        .await?;
        tracing::info!(count = collations.len(), "Collations loaded");

        let schemas = SchemaRegistry::load_dir(&config.beacon.schemas_dir).with_context(|| {
            format!(
                "Failed to load response schemas from {}",
                config.beacon.schemas_dir.display()
            )
        })?;
        tracing::info!(count = schemas.len(), "Response schemas loaded");

        let handovers = HandoverStore::new(
            handover_backend,
            definitions.handover().max_payload_bytes,
        );
        let genes: Arc<dyn GeneCoordinateResolver> = Arc::new(StoreGeneResolver::new(
            store.clone(),
            config.beacon.info_database.clone(),
            config.beacon.genes_collection.clone(),
        ));

        Ok(Self {
            assembler: Arc::new(QueryAssembler::new(
                definitions.clone(),
                Arc::new(collations),
            )),
            executor: QueryExecutor::new(store.clone(), handovers.clone())
                .with_links(definitions.links().iter().cloned()),
            config: Arc::new(config),
            definitions,
            handovers,
            genes,
            schemas: Arc::new(schemas),
            store,
            db_pool: None,
        })
    }

    /// Releases store connections.
    pub async fn close(&self) {
        self.handovers.close().await;
        if let Some(pool) = &self.db_pool {
            pool.close().await;
        }
    }
}

async fn load_collations(
    store: &dyn DocumentStore,
    database: &str,
    collection: &str,
) -> anyhow::Result<CollationIndex> {
    let documents = store
        .find(database, collection, None, None)
        .await
        .context("Failed to read collations")?;

    let mut index = CollationIndex::new();
    for document in documents {
        match serde_json::from_value::<Collation>(document) {
            Ok(collation) => index.insert(collation),
            Err(e) => tracing::warn!(error = %e, "Skipping malformed collation"),
        }
    }
    Ok(index)
}
