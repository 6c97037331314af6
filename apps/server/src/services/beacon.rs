//! Beacon query orchestration
//!
//! Normalized parameters in, populated response document out:
//! context, assembly, execution, paging, response population.

use crate::api::params::{Granularity, RequestParameters};
use crate::error::{Error, Result};
use crate::services::response::{ResponseBuilder, ResultsetsInput};
use crate::state::AppState;
use beacon_query::{filtering_terms_query, Predicate};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeSet;

/// Collections addressed by a request path.
#[derive(Debug, Clone)]
pub struct QueryTarget {
    /// Collection of the path entity; a path id selects within it.
    pub collection: String,
    pub path_id: Option<String>,
    /// Collection whose records are returned.
    pub response_collection: String,
}

pub struct BeaconService {
    state: AppState,
}

impl BeaconService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    fn dataset_ids(&self, params: &RequestParameters) -> Result<Vec<String>> {
        let requested = params.dataset_ids();
        let dataset_ids = if requested.is_empty() {
            self.state.config.beacon.default_datasets.clone()
        } else {
            requested.to_vec()
        };
        if dataset_ids.is_empty() {
            return Err(Error::Validation(
                "no datasetIds given and no default datasets configured".to_string(),
            ));
        }
        Ok(dataset_ids)
    }

    /// Runs a record query and returns the result-sets response.
    #[tracing::instrument(skip_all, fields(request_id = %request_id, entity = %target.response_collection))]
    pub async fn query(
        &self,
        request_id: &str,
        target: &QueryTarget,
        params: &RequestParameters,
    ) -> Result<JsonValue> {
        let state = &self.state;
        let default_granularity = Granularity::parse(&state.config.beacon.default_granularity)
            .unwrap_or(Granularity::Record);
        let granularity = params.granularity(default_granularity)?;
        let dataset_ids = self.dataset_ids(params)?;

        let ctx = params.to_context(
            request_id,
            &state.definitions,
            dataset_ids.clone(),
            &target.response_collection,
            target
                .path_id
                .as_deref()
                .map(|id| (target.collection.as_str(), id)),
        )?;

        let query = state
            .assembler
            .assemble(&ctx, &state.handovers, state.genes.as_ref())
            .await?;
        if query.is_empty() {
            tracing::info!("Request produced no query");
            return Err(Error::NoQuery);
        }

        let results = state.executor.execute(&ctx, &query).await?;

        let mut datasets = Vec::with_capacity(results.len());
        for result in results {
            let page = if granularity == Granularity::Record {
                Some(
                    state
                        .executor
                        .fetch_page(&result, &target.response_collection, ctx.pagination())
                        .await?,
                )
            } else {
                None
            };
            datasets.push((result, page));
        }

        tracing::info!(
            datasets = datasets.len(),
            scopes = ?query.scopes().collect::<Vec<_>>(),
            "Query executed"
        );

        ResponseBuilder::new(&state.schemas, &state.config.beacon).resultsets(ResultsetsInput {
            entity: &target.response_collection,
            granularity,
            inclusion: params.resultset_inclusion(),
            dataset_ids: &dataset_ids,
            params,
            query: &query,
            datasets,
        })
    }

    /// Filtering terms of the requested datasets plus the resources their
    /// collation types come from.
    #[tracing::instrument(skip_all, fields(request_id = %request_id))]
    pub async fn filtering_terms(
        &self,
        request_id: &str,
        params: &RequestParameters,
    ) -> Result<JsonValue> {
        let state = &self.state;
        let collection = &state.config.beacon.collations_collection;
        let predicate =
            filtering_terms_query(&state.definitions, params.filters(), params.first("scope"));

        let mut terms = Vec::new();
        let mut collation_types = BTreeSet::new();
        for dataset_id in self.dataset_ids(params)? {
            let documents = state
                .store
                .find(&dataset_id, collection, predicate.as_ref(), None)
                .await?;
            terms.extend(documents.iter().map(|doc| self.filtering_term(doc)));

            for value in state
                .store
                .distinct(&dataset_id, collection, "collation_type", predicate.as_ref())
                .await?
            {
                if let Some(collation_type) = value.as_str() {
                    collation_types.insert(collation_type.to_string());
                }
            }
        }

        let resources = collation_types
            .iter()
            .filter_map(|name| state.definitions.filter_definition(name))
            .filter_map(|definition| {
                let id = definition.namespace_prefix.as_deref()?;
                Some(json!({
                    "id": id,
                    "name": definition.name.as_deref().unwrap_or(id),
                    "namespace_prefix": id,
                }))
            })
            .collect();

        ResponseBuilder::new(&state.schemas, &state.config.beacon).filtering_terms(terms, resources)
    }

    fn filtering_term(&self, document: &JsonValue) -> JsonValue {
        let mut term = json!({
            "id": document.get("id").cloned().unwrap_or(JsonValue::Null),
            "type": "ontologyTerm",
            "count": document.get("count").cloned().unwrap_or(json!(0)),
        });
        if let Some(label) = document.get("label") {
            term["label"] = label.clone();
        }
        if let Some(scope) = document.get("scope") {
            term["scope"] = scope.clone();
        }
        let definition = document
            .get("collation_type")
            .and_then(JsonValue::as_str)
            .and_then(|t| self.state.definitions.filter_definition(t));
        if let Some(name) = definition.and_then(|d| d.name.as_deref()) {
            term["type"] = json!(name);
        }
        term
    }

    /// Document counts per collection for each default dataset.
    pub async fn info(&self) -> Result<JsonValue> {
        let state = &self.state;
        let mut datasets = Vec::new();
        for dataset_id in &state.config.beacon.default_datasets {
            let mut counts = serde_json::Map::new();
            for collection in &state.definitions.config().collections {
                let count = state
                    .store
                    .count(dataset_id, collection, None::<&Predicate>)
                    .await?;
                counts.insert(collection.clone(), json!(count));
            }
            datasets.push(json!({ "id": dataset_id, "counts": counts }));
        }

        Ok(json!({
            "meta": {
                "beaconId": state.config.beacon.beacon_id,
                "apiVersion": state.config.beacon.api_version,
                "returnedSchemas": [{"entityType": "Info"}],
            },
            "response": {
                "id": state.config.beacon.beacon_id,
                "apiVersion": state.config.beacon.api_version,
                "datasets": datasets,
            }
        }))
    }
}
