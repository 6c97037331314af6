use beacon_query::MemoryDocumentStore;
use serde_json::json;

pub const DATASET: &str = "progenetix";
pub const SERVICES_DB: &str = "_byconServicesDB";

/// Seeds collations, biosamples, individuals and per-dataset filtering terms.
pub async fn seed(store: &MemoryDocumentStore) {
    store
        .insert_many(
            SERVICES_DB,
            "collations",
            [
                json!({
                    "id": "NCIT:C3058",
                    "scope": "biosamples",
                    "db_key": "histological_diagnosis.id",
                    "child_terms": ["NCIT:C3058", "NCIT:C3059"],
                    "collation_type": "NCIT",
                    "label": "Glioblastoma"
                }),
                json!({
                    "id": "NCIT:C3059",
                    "scope": "biosamples",
                    "db_key": "histological_diagnosis.id",
                    "child_terms": ["NCIT:C3059"],
                    "collation_type": "NCIT",
                    "label": "Glioma"
                }),
                json!({"label": "no id or scope"}),
            ],
        )
        .await;

    store
        .insert_many(
            DATASET,
            "biosamples",
            [
                json!({
                    "_id": "bs1",
                    "id": "pgxbs-1",
                    "individual_id": "pgxind-1",
                    "histological_diagnosis": {"id": "NCIT:C3058", "label": "Glioblastoma"},
                    "cohorts": [{"id": "pgx:cohort-TCGA"}]
                }),
                json!({
                    "_id": "bs2",
                    "id": "pgxbs-2",
                    "individual_id": "pgxind-2",
                    "histological_diagnosis": {"id": "NCIT:C3059", "label": "Glioma"},
                    "cohorts": [{"id": "pgx:cohort-TCGA"}]
                }),
                json!({
                    "_id": "bs3",
                    "id": "pgxbs-3",
                    "individual_id": "pgxind-3",
                    "histological_diagnosis": {"id": "NCIT:C3059", "label": "Glioma"}
                }),
                json!({
                    "_id": "bs4",
                    "id": "pgxbs-4",
                    "individual_id": "pgxind-4",
                    "histological_diagnosis": {"id": "NCIT:C4017", "label": "Ductal carcinoma"}
                }),
            ],
        )
        .await;

    store
        .insert_many(
            DATASET,
            "individuals",
            [
                json!({"_id": "ind1", "id": "pgxind-1"}),
                json!({"_id": "ind2", "id": "pgxind-2"}),
            ],
        )
        .await;

    store
        .insert_many(
            DATASET,
            "collations",
            [
                json!({
                    "id": "NCIT:C3058",
                    "label": "Glioblastoma",
                    "collation_type": "NCIT",
                    "scope": "biosamples",
                    "count": 1
                }),
                json!({
                    "id": "NCIT:C3059",
                    "label": "Glioma",
                    "collation_type": "NCIT",
                    "scope": "biosamples",
                    "count": 2
                }),
                json!({
                    "id": "pgx:cohort-TCGA",
                    "label": "TCGA samples",
                    "collation_type": "cohort",
                    "scope": "biosamples",
                    "count": 2
                }),
            ],
        )
        .await;
}
