//! Beacon response population
//!
//! Responses start from schema skeletons (persisted snake_case keys), get
//! filled in, and are camelized before stored record documents are added.
//! Records get the output-only camelization so their own capitals survive.

use crate::api::params::{Granularity, RequestParameters, ResultsetInclusion};
use crate::config::BeaconConfig;
use crate::error::{Error, Result};
use beacon_query::schema::pascal_case;
use beacon_query::{
    convert_keys, AssembledQuery, DatasetResult, KeyCase, ResultPage, SchemaRegistry,
};
use serde_json::{json, Map, Value as JsonValue};

use beacon_query::store::ID_FIELD;

pub const RESULTSETS_SCHEMA: &str = "beaconResultsetsResponse";
pub const RESULT_SET_SCHEMA: &str = "beaconResultSet";
pub const FILTERING_TERMS_SCHEMA: &str = "beaconFilteringTermsResponse";

/// Everything a result-sets response is assembled from.
pub struct ResultsetsInput<'a> {
    pub entity: &'a str,
    pub granularity: Granularity,
    pub inclusion: ResultsetInclusion,
    pub dataset_ids: &'a [String],
    pub params: &'a RequestParameters,
    pub query: &'a AssembledQuery,
    pub datasets: Vec<(DatasetResult, Option<ResultPage>)>,
}

pub struct ResponseBuilder<'a> {
    schemas: &'a SchemaRegistry,
    beacon: &'a BeaconConfig,
}

impl<'a> ResponseBuilder<'a> {
    pub fn new(schemas: &'a SchemaRegistry, beacon: &'a BeaconConfig) -> Self {
        Self { schemas, beacon }
    }

    pub fn resultsets(&self, input: ResultsetsInput<'_>) -> Result<JsonValue> {
        let mut response = self.schemas.instantiate(RESULTSETS_SCHEMA)?;
        self.fill_meta(&mut response, input.entity, Some(input.granularity));
        self.fill_request_summary(&mut response, &input);

        let mut result_sets = Vec::new();
        let mut total = 0u64;
        for (result, page) in input.datasets {
            let count = result.count(input.entity);
            let exists = count > 0;
            if !input.inclusion.includes(exists) {
                continue;
            }
            total += count;
            result_sets.push(self.result_set(&result, input.entity, page, input.granularity)?);
        }

        let exists = total > 0;
        let summary = object_at(&mut response, &["response_summary"]);
        summary.insert("exists".to_string(), JsonValue::Bool(exists));
        if input.granularity == Granularity::Boolean {
            summary.remove("num_total_results");
        } else {
            summary.insert("num_total_results".to_string(), JsonValue::from(total));
        }

        if input.granularity != Granularity::Record {
            if let Some(root) = response.as_object_mut() {
                root.remove("response");
            }
        }

        // Skeleton keys are converted before stored documents go in.
        let mut response = convert_keys(response, KeyCase::External);
        if input.granularity == Granularity::Record {
            object_at(&mut response, &["response"])
                .insert("resultSets".to_string(), JsonValue::Array(result_sets));
        }

        // Store-dialect documents keep their own field names.
        let info = object_at(&mut response, &["meta", "info"]);
        info.insert("originalQueries".to_string(), input.query.to_documents());
        if let Some(kind) = input.query.variant_request_type {
            info.insert("variantRequestType".to_string(), JsonValue::from(kind.as_str()));
        }
        if let Some(kind) = input.query.geo_request {
            info.insert("geoRequestType".to_string(), serde_json::to_value(kind).map_err(beacon_query::Error::from)?);
        }

        Ok(response)
    }

    pub fn filtering_terms(
        &self,
        terms: Vec<JsonValue>,
        resources: Vec<JsonValue>,
    ) -> Result<JsonValue> {
        let mut response = self.schemas.instantiate(FILTERING_TERMS_SCHEMA)?;
        self.fill_meta(&mut response, "filtering_terms", None);

        let body = object_at(&mut response, &["response"]);
        body.insert("filtering_terms".to_string(), JsonValue::Array(terms));
        body.insert("resources".to_string(), JsonValue::Array(resources));

        Ok(convert_keys(response, KeyCase::External))
    }

    fn fill_meta(&self, response: &mut JsonValue, entity: &str, granularity: Option<Granularity>) {
        let meta = object_at(response, &["meta"]);
        meta.insert("beacon_id".to_string(), json!(self.beacon.beacon_id));
        meta.insert("api_version".to_string(), json!(self.beacon.api_version));
        meta.insert(
            "returned_schemas".to_string(),
            json!([{ "entity_type": pascal_case(entity) }]),
        );
        if let Some(granularity) = granularity {
            meta.insert(
                "returned_granularity".to_string(),
                json!(granularity.as_str()),
            );
        }
    }

    fn fill_request_summary(&self, response: &mut JsonValue, input: &ResultsetsInput<'_>) {
        let summary = object_at(response, &["meta", "received_request_summary"]);

        summary.insert("api_version".to_string(), json!(self.beacon.api_version));
        summary.insert(
            "requested_schemas".to_string(),
            json!([{ "entity_type": pascal_case(input.entity) }]),
        );
        summary.insert("dataset_ids".to_string(), json!(input.dataset_ids));
        summary.insert(
            "requested_granularity".to_string(),
            json!(input.granularity.as_str()),
        );
        summary.insert(
            "include_resultset_responses".to_string(),
            json!(input.inclusion.as_str()),
        );

        let filters: Vec<&str> = input.params.filters().iter().map(|f| f.id.as_str()).collect();
        if filters.is_empty() {
            summary.remove("filters");
        } else {
            summary.insert("filters".to_string(), json!(filters));
        }

        let request_parameters = input.params.summary();
        if !request_parameters.is_empty() {
            summary.insert(
                "request_parameters".to_string(),
                JsonValue::Object(request_parameters.into_iter().collect()),
            );
        }

        if let Ok(pagination) = input.params.pagination() {
            summary.insert(
                "pagination".to_string(),
                json!({ "skip": pagination.skip, "limit": pagination.limit }),
            );
        }
    }

    fn result_set(
        &self,
        result: &DatasetResult,
        entity: &str,
        page: Option<ResultPage>,
        granularity: Granularity,
    ) -> Result<JsonValue> {
        let mut set = self.schemas.instantiate(RESULT_SET_SCHEMA)?;
        let count = result.count(entity);

        let access_ids: Map<String, JsonValue> = result
            .handovers
            .values()
            .filter(|h| h.persisted)
            .map(|h| {
                (
                    h.record.target_collection.clone(),
                    JsonValue::from(h.access_id()),
                )
            })
            .collect();

        let map = set
            .as_object_mut()
            .ok_or_else(|| Error::Internal(format!("{RESULT_SET_SCHEMA} is not an object")))?;
        map.insert("id".to_string(), json!(result.dataset_id));
        map.insert("set_type".to_string(), json!("dataset"));
        map.insert("exists".to_string(), JsonValue::Bool(count > 0));
        map.insert("results_count".to_string(), JsonValue::from(count));
        map.insert(
            "info".to_string(),
            json!({ "counts": result.counts(), "access_ids": access_ids }),
        );

        if granularity != Granularity::Record {
            map.remove("results");
        }

        let mut set = convert_keys(set, KeyCase::External);
        if granularity == Granularity::Record {
            let results: Vec<JsonValue> = page
                .map(|p| p.documents)
                .unwrap_or_default()
                .into_iter()
                .map(|document| convert_keys(strip_store_id(document), KeyCase::Camel))
                .collect();
            ensure_object(&mut set).insert("results".to_string(), JsonValue::Array(results));
        }

        Ok(set)
    }
}

/// Object at `path` below `value`, creating (or replacing non-object) members on the way.
fn object_at<'v>(value: &'v mut JsonValue, path: &[&str]) -> &'v mut Map<String, JsonValue> {
    let mut current = ensure_object(value);
    for key in path {
        let map = current;
        let child = map
            .entry(key.to_string())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        current = ensure_object(child);
    }
    current
}

fn ensure_object(value: &mut JsonValue) -> &mut Map<String, JsonValue> {
    if !value.is_object() {
        *value = JsonValue::Object(Map::new());
    }
    match value {
        JsonValue::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

fn strip_store_id(mut document: JsonValue) -> JsonValue {
    if let Some(map) = document.as_object_mut() {
        map.remove(ID_FIELD);
    }
    document
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_query::{HandoverStore, PageRange};
    use std::collections::BTreeMap;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry
            .insert(
                RESULTSETS_SCHEMA,
                &json!({
                    "meta": {"type": "object", "properties": {
                        "beaconId": {"type": "string"},
                        "receivedRequestSummary": {"type": "object"}
                    }},
                    "responseSummary": {"type": "object", "properties": {
                        "exists": {"type": "boolean"},
                        "numTotalResults": {"type": "integer"}
                    }},
                    "response": {"type": "object", "properties": {
                        "resultSets": {"type": "array"}
                    }}
                }),
            )
            .unwrap();
        registry
            .insert(
                RESULT_SET_SCHEMA,
                &json!({
                    "id": {"type": "string"},
                    "setType": {"type": "string"},
                    "exists": {"type": "boolean"},
                    "resultsCount": {"type": "integer"},
                    "results": {"type": "array"}
                }),
            )
            .unwrap();
        registry
    }

    async fn dataset(id: &str, ids: &[&str]) -> DatasetResult {
        let created = HandoverStore::in_memory()
            .create(
                ID_FIELD,
                "biosamples",
                id,
                ids.iter().map(|s| s.to_string()).collect(),
                ids.len() as u64,
            )
            .await
            .unwrap();
        let mut handovers = BTreeMap::new();
        handovers.insert(DatasetResult::handover_key("biosamples"), created);
        DatasetResult {
            dataset_id: id.to_string(),
            handovers,
        }
    }

    fn page(documents: Vec<JsonValue>) -> ResultPage {
        ResultPage {
            range: PageRange {
                start: 0,
                end: documents.len(),
            },
            total: documents.len() as u64,
            documents,
        }
    }

    #[tokio::test]
    async fn record_response_is_camelized_without_store_ids() {
        let schemas = registry();
        let beacon = BeaconConfig::default();
        let params = RequestParameters::default();
        let query = AssembledQuery::default();
        let datasets = vec![(
            dataset("progenetix", &["bs1"]).await,
            Some(page(vec![json!({"_id": "bs1", "id": "pgxbs-1", "histological_diagnosis": {"id": "NCIT:C3058"}})])),
        )];

        let response = ResponseBuilder::new(&schemas, &beacon)
            .resultsets(ResultsetsInput {
                entity: "biosamples",
                granularity: Granularity::Record,
                inclusion: ResultsetInclusion::Hit,
                dataset_ids: &["progenetix".to_string()],
                params: &params,
                query: &query,
                datasets,
            })
            .unwrap();

        assert_eq!(response["meta"]["beaconId"], json!(beacon.beacon_id));
        assert_eq!(response["meta"]["returnedGranularity"], json!("record"));
        assert_eq!(response["responseSummary"], json!({"exists": true, "numTotalResults": 1}));

        let set = &response["response"]["resultSets"][0];
        assert_eq!(set["setType"], json!("dataset"));
        assert_eq!(set["resultsCount"], json!(1));
        assert_eq!(set["info"]["counts"]["biosamples"], json!(1));
        assert_eq!(
            set["results"][0],
            json!({"id": "pgxbs-1", "histologicalDiagnosis": {"id": "NCIT:C3058"}})
        );
    }

    #[tokio::test]
    async fn stored_upper_case_keys_are_not_escaped() {
        let schemas = registry();
        let beacon = BeaconConfig::default();
        let params = RequestParameters::default();
        let query = AssembledQuery::default();
        let datasets = vec![(
            dataset("progenetix", &["bs1"]).await,
            Some(page(vec![json!({
                "_id": "bs1",
                "id": "pgxbs-1",
                "info": {"ISCN": "46,XX", "cnv_fraction": 0.2}
            })])),
        )];

        let response = ResponseBuilder::new(&schemas, &beacon)
            .resultsets(ResultsetsInput {
                entity: "biosamples",
                granularity: Granularity::Record,
                inclusion: ResultsetInclusion::Hit,
                dataset_ids: &["progenetix".to_string()],
                params: &params,
                query: &query,
                datasets,
            })
            .unwrap();

        assert_eq!(
            response["response"]["resultSets"][0]["results"][0]["info"],
            json!({"ISCN": "46,XX", "cnvFraction": 0.2})
        );
    }

    #[tokio::test]
    async fn boolean_response_drops_counts_and_records() {
        let schemas = registry();
        let beacon = BeaconConfig::default();
        let params = RequestParameters::default();
        let query = AssembledQuery::default();

        let response = ResponseBuilder::new(&schemas, &beacon)
            .resultsets(ResultsetsInput {
                entity: "biosamples",
                granularity: Granularity::Boolean,
                inclusion: ResultsetInclusion::Hit,
                dataset_ids: &["a".to_string(), "b".to_string()],
                params: &params,
                query: &query,
                datasets: vec![(dataset("a", &[]).await, None), (dataset("b", &["x"]).await, None)],
            })
            .unwrap();

        assert!(response.get("response").is_none());
        assert_eq!(response["responseSummary"], json!({"exists": true}));
    }

    #[tokio::test]
    async fn missing_schema_is_an_error() {
        let schemas = SchemaRegistry::new();
        let beacon = BeaconConfig::default();
        let result = ResponseBuilder::new(&schemas, &beacon).filtering_terms(vec![], vec![]);
        assert!(matches!(
            result,
            Err(Error::Engine(beacon_query::Error::UnknownSchema(_)))
        ));
    }
}
