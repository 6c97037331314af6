//! End-to-end runs of the query pipeline against the in-memory store.

use anyhow::{Context, Result};
use beacon_query::definitions::VariantDefinitions;
use beacon_query::{
    Collation, CollationIndex, Definitions, EngineConfig, Filter, FilterDefinition, FilterFlags,
    HandoverStore, Logic, MemoryDocumentStore, Pagination, Predicate, QueryAssembler,
    QueryExecutor, RequestContext, StoreGeneResolver, VariantParameters, VariantRequestType,
};
use serde_json::json;
use std::sync::Arc;

const DATASET: &str = "progenetix";
const SERVICES_DB: &str = "_byconServicesDB";

struct Fixture {
    assembler: QueryAssembler,
    executor: QueryExecutor,
    handovers: HandoverStore,
    genes: StoreGeneResolver,
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.filter_definitions.insert(
        "NCIT".to_string(),
        FilterDefinition {
            pattern: r"^NCIT:C\d+$".to_string(),
            scope: "biosamples".to_string(),
            db_key: "histological_diagnosis.id".to_string(),
            collationed: true,
            namespace_prefix: Some("NCIT".to_string()),
            name: Some("NCIt neoplasm".to_string()),
        },
    );
    config.filter_definitions.insert(
        "pgx".to_string(),
        FilterDefinition {
            pattern: r"^pgx:cohort-\w+$".to_string(),
            scope: "biosamples".to_string(),
            db_key: "cohorts.id".to_string(),
            collationed: false,
            namespace_prefix: None,
            name: None,
        },
    );
    config.variants = VariantDefinitions::default();
    config
        .variants
        .reference_aliases
        .insert("9".to_string(), "refseq:NC_000009.12".to_string());
    config
}

async fn fixture(max_handover_bytes: usize) -> Fixture {
    let store = Arc::new(MemoryDocumentStore::new());

    store
        .insert_many(
            DATASET,
            "biosamples",
            [
                json!({"_id": "bs1", "id": "pgxbs-1", "histological_diagnosis": {"id": "NCIT:C3058"}, "cohorts": [{"id": "pgx:cohort-TCGA"}]}),
                json!({"_id": "bs2", "id": "pgxbs-2", "histological_diagnosis": {"id": "NCIT:C3493"}, "cohorts": [{"id": "pgx:cohort-TCGA"}]}),
                json!({"_id": "bs3", "id": "pgxbs-3", "histological_diagnosis": {"id": "NCIT:C4017"}, "cohorts": []}),
                json!({"_id": "bs4", "id": "pgxbs-4", "histological_diagnosis": {"id": "NCIT:C3058"}, "cohorts": []}),
            ],
        )
        .await;

    store
        .insert_many(
            DATASET,
            "variants",
            [
                json!({"_id": "v1", "id": "pgxvar-1", "location": {"sequence_id": "refseq:NC_000009.12", "start": 21_900_000, "end": 22_000_000}, "variant_state": {"id": "EFO:0030067"}}),
                json!({"_id": "v2", "id": "pgxvar-2", "location": {"sequence_id": "refseq:NC_000009.12", "start": 21_000_000, "end": 23_000_000}, "variant_state": {"id": "EFO:0030070"}}),
                json!({"_id": "v3", "id": "pgxvar-3", "location": {"sequence_id": "refseq:NC_000017.11", "start": 7_670_000, "end": 7_680_000}, "variant_state": {"id": "EFO:0030067"}}),
            ],
        )
        .await;

    store
        .insert(
            SERVICES_DB,
            "genes",
            json!({"symbol": "CDKN2A", "accession_version": "NC_000009.12", "reference_name": "9", "start": 21_967_752, "end": 21_995_301}),
        )
        .await;

    let collations: CollationIndex = [
        Collation {
            id: "NCIT:C3262".to_string(),
            scope: "biosamples".to_string(),
            db_key: "histological_diagnosis.id".to_string(),
            child_terms: vec![
                "NCIT:C3262".to_string(),
                "NCIT:C3058".to_string(),
                "NCIT:C3493".to_string(),
            ],
            collation_type: Some("NCIT".to_string()),
            label: Some("Neoplasm".to_string()),
        },
        Collation {
            id: "NCIT:C3058".to_string(),
            scope: "biosamples".to_string(),
            db_key: "histological_diagnosis.id".to_string(),
            child_terms: vec!["NCIT:C3058".to_string()],
            collation_type: Some("NCIT".to_string()),
            label: Some("Glioblastoma".to_string()),
        },
    ]
    .into_iter()
    .collect();

    let definitions = Arc::new(Definitions::new(config()).expect("valid config"));
    let links = definitions.links().to_vec();
    let handovers = HandoverStore::new(
        Arc::new(beacon_query::MemoryHandoverBackend::new()),
        max_handover_bytes,
    );

    Fixture {
        assembler: QueryAssembler::new(definitions, Arc::new(collations)),
        executor: QueryExecutor::new(store.clone(), handovers.clone()).with_links(links),
        handovers,
        genes: StoreGeneResolver::new(store, SERVICES_DB, "genes"),
    }
}

#[tokio::test]
async fn filter_with_descendants_finds_all_children() -> Result<()> {
    let fx = fixture(beacon_query::definitions::DEFAULT_HANDOVER_MAX_BYTES).await;
    let ctx = RequestContext::builder("t1")
        .dataset_ids([DATASET])
        .response_entity("biosamples")
        .filter(Filter::new("NCIT:C3262"))
        .build();

    let query = fx.assembler.assemble(&ctx, &fx.handovers, &fx.genes).await?;
    let results = fx.executor.execute(&ctx, &query).await?;
    assert_eq!(results[0].count("biosamples"), 3);

    let no_descendants = RequestContext::builder("t1b")
        .dataset_ids([DATASET])
        .filter(Filter::new("NCIT:C3262"))
        .filter_flags(FilterFlags {
            logic: Logic::And,
            descendants: false,
        })
        .build();
    let query = fx
        .assembler
        .assemble(&no_descendants, &fx.handovers, &fx.genes)
        .await?;
    assert_eq!(
        query.queries["biosamples"],
        Predicate::equals("histological_diagnosis.id", "NCIT:C3262")
    );
    Ok(())
}

#[tokio::test]
async fn cross_field_filters_intersect_by_default() -> Result<()> {
    let fx = fixture(beacon_query::definitions::DEFAULT_HANDOVER_MAX_BYTES).await;
    let ctx = RequestContext::builder("t2")
        .dataset_ids([DATASET])
        .filters([Filter::new("NCIT:C3058"), Filter::new("pgx:cohort-TCGA")])
        .build();

    let query = fx.assembler.assemble(&ctx, &fx.handovers, &fx.genes).await?;
    let results = fx.executor.execute(&ctx, &query).await?;
    let created = results[0]
        .handover_for("biosamples")
        .context("biosample handover")?;
    assert_eq!(created.record.target_values, vec!["bs1".to_string()]);
    Ok(())
}

#[tokio::test]
async fn cnv_bracket_request_matches_contained_variants() -> Result<()> {
    let fx = fixture(beacon_query::definitions::DEFAULT_HANDOVER_MAX_BYTES).await;
    let ctx = RequestContext::builder("t3")
        .dataset_ids([DATASET])
        .response_entity("variants")
        .variant(VariantParameters {
            reference_name: Some("9".into()),
            start: vec![21_500_000, 21_975_098],
            end: vec![21_967_753, 22_500_000],
            variant_type: Some("DEL".into()),
            ..Default::default()
        })
        .build();

    let query = fx.assembler.assemble(&ctx, &fx.handovers, &fx.genes).await?;
    assert_eq!(query.variant_request_type, Some(VariantRequestType::CopyNumber));

    let results = fx.executor.execute(&ctx, &query).await?;
    let page = fx
        .executor
        .fetch_page(&results[0], "variants", Pagination::default())
        .await?;
    let ids: Vec<_> = page.documents.iter().map(|d| d["id"].clone()).collect();
    assert_eq!(ids, vec![json!("pgxvar-1")]);
    Ok(())
}

#[tokio::test]
async fn gene_request_uses_gene_interval() -> Result<()> {
    let fx = fixture(beacon_query::definitions::DEFAULT_HANDOVER_MAX_BYTES).await;
    let ctx = RequestContext::builder("t4")
        .dataset_ids([DATASET])
        .variant(VariantParameters {
            gene_id: Some("CDKN2A".into()),
            ..Default::default()
        })
        .build();

    let query = fx.assembler.assemble(&ctx, &fx.handovers, &fx.genes).await?;
    assert_eq!(query.variant_request_type, Some(VariantRequestType::Gene));
    let results = fx.executor.execute(&ctx, &query).await?;
    assert_eq!(results[0].count("variants"), 2);
    Ok(())
}

#[tokio::test]
async fn handover_continues_previous_result() -> Result<()> {
    let fx = fixture(beacon_query::definitions::DEFAULT_HANDOVER_MAX_BYTES).await;
    let first = RequestContext::builder("t5")
        .dataset_ids([DATASET])
        .filter(Filter::new("NCIT:C3262"))
        .build();
    let query = fx.assembler.assemble(&first, &fx.handovers, &fx.genes).await?;
    let results = fx.executor.execute(&first, &query).await?;
    let access_id = results[0]
        .handover_for("biosamples")
        .context("handover")?
        .access_id()
        .to_string();

    let follow_up = RequestContext::builder("t6")
        .dataset_ids([DATASET])
        .access_id(access_id)
        .pagination(Pagination::new(1, 2))
        .build();
    let query = fx.assembler.assemble(&follow_up, &fx.handovers, &fx.genes).await?;
    assert!(query.handover.is_some());
    let results = fx.executor.execute(&follow_up, &query).await?;
    let page = fx
        .executor
        .fetch_page(&results[0], "biosamples", follow_up.pagination())
        .await?;
    assert_eq!(page.total, 3);
    assert_eq!(page.documents.len(), 1);
    Ok(())
}

#[tokio::test]
async fn oversized_results_are_not_resumable() -> Result<()> {
    let fx = fixture(8).await;
    let ctx = RequestContext::builder("t7")
        .dataset_ids([DATASET])
        .filter(Filter::new("NCIT:C3262"))
        .build();
    let query = fx.assembler.assemble(&ctx, &fx.handovers, &fx.genes).await?;
    let results = fx.executor.execute(&ctx, &query).await?;
    let created = results[0].handover_for("biosamples").context("handover")?;
    assert!(!created.persisted);
    assert_eq!(results[0].count("biosamples"), 3);

    let follow_up = RequestContext::builder("t8")
        .dataset_ids([DATASET])
        .access_id(created.access_id())
        .build();
    let query = fx.assembler.assemble(&follow_up, &fx.handovers, &fx.genes).await?;
    assert!(query.handover.is_none());
    assert!(query.is_empty());
    Ok(())
}

#[tokio::test]
async fn unresolvable_scope_is_purged() -> Result<()> {
    let fx = fixture(beacon_query::definitions::DEFAULT_HANDOVER_MAX_BYTES).await;
    let ctx = RequestContext::builder("t9")
        .dataset_ids([DATASET])
        .filters([Filter::new("NCIT:C9999999"), Filter::new("HP:0000001")])
        .variant(VariantParameters {
            reference_name: Some("9".into()),
            start: vec![21_500_000],
            end: vec![21_600_000],
            ..Default::default()
        })
        .build();

    let query = fx.assembler.assemble(&ctx, &fx.handovers, &fx.genes).await?;
    assert!(!query.queries.contains_key("biosamples"));
    assert_eq!(query.scopes().collect::<Vec<_>>(), vec!["variants"]);
    Ok(())
}
