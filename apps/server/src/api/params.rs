//! Request parameter normalization
//!
//! GET query strings and POST Beacon v2 bodies both end up as
//! [`RequestParameters`]: snake_case keys mapped to string lists, plus the
//! filter list. Typed access (integers, booleans) happens on read so a bad
//! value is reported against the parameter that carried it.

use crate::error::{Error, Result};
use beacon_query::{
    to_persisted_key, Definitions, Filter, FilterFlags, Logic, Pagination, RequestContext,
    VariantParameters,
};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// List members that clients send for "no value".
const NULL_VALUES: &[&str] = &["null", "undefined", ""];

/// Parameters consumed while building the context; everything else is
/// checked against id-list and geolocation names.
const VARIANT_PARAMETERS: &[&str] = &[
    "variant_id",
    "variant_internal_id",
    "reference_name",
    "start",
    "end",
    "variant_type",
    "alternate_bases",
    "reference_bases",
    "variant_min_length",
    "variant_max_length",
    "assembly_id",
    "gene_id",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Boolean,
    Count,
    Record,
}

impl Granularity {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "boolean" => Some(Self::Boolean),
            "count" => Some(Self::Count),
            "record" => Some(Self::Record),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Count => "count",
            Self::Record => "record",
        }
    }
}

/// Which dataset result sets appear in the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultsetInclusion {
    Hit,
    Miss,
    All,
    None,
}

impl ResultsetInclusion {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "MISS" => Self::Miss,
            "ALL" => Self::All,
            "NONE" => Self::None,
            _ => Self::Hit,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::All => "ALL",
            Self::None => "NONE",
        }
    }

    pub fn includes(self, exists: bool) -> bool {
        match self {
            Self::Hit => exists,
            Self::Miss => !exists,
            Self::All => true,
            Self::None => false,
        }
    }
}

/// Normalized request parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestParameters {
    values: BTreeMap<String, Vec<String>>,
    filters: Vec<Filter>,
}

impl RequestParameters {
    /// From decoded query-string pairs. Repeated keys accumulate.
    pub fn from_query(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut params = Self::default();
        for (key, value) in pairs {
            let key = to_persisted_key(&key);
            if key == "filters" {
                params.filters.extend(split_list(&value).map(Filter::new));
            } else {
                params.push(&key, split_list(&value).map(str::to_string));
            }
        }
        params
    }

    /// From a Beacon v2 request body.
    ///
    /// `query.requestParameters` is flattened (nested objects such as
    /// `g_variant` or `datasets` contribute their members), `query.filters`
    /// takes term strings or filter objects, and `query.pagination` yields
    /// `skip`/`limit`. Other `query` members and top-level request options
    /// are taken as parameters of their own.
    pub fn from_body(body: &JsonValue) -> Result<Self> {
        let JsonValue::Object(root) = body else {
            return Err(Error::Validation(
                "request body must be a JSON object".to_string(),
            ));
        };

        let mut params = Self::default();
        for (key, value) in root {
            match key.as_str() {
                "meta" => {}
                "query" => {
                    let JsonValue::Object(query) = value else {
                        return Err(Error::Validation("query must be an object".to_string()));
                    };
                    for (key, value) in query {
                        params.insert_body_member(key, value)?;
                    }
                }
                _ => params.insert_body_member(key, value)?,
            }
        }
        Ok(params)
    }

    /// Adds `other`'s values, replacing same-named parameters.
    pub fn merge(&mut self, other: RequestParameters) {
        self.values.extend(other.values);
        self.filters.extend(other.filters);
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn list(&self, key: &str) -> &[String] {
        self.values.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first(&self, key: &str) -> Option<&str> {
        self.list(key).first().map(String::as_str)
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        self.first(key)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "y" | "yes"))
    }

    pub fn integers(&self, key: &str) -> Result<Vec<u64>> {
        self.list(key)
            .iter()
            .map(|v| {
                v.trim().parse::<u64>().map_err(|_| {
                    Error::Validation(format!("{key} must be a non-negative integer, got '{v}'"))
                })
            })
            .collect()
    }

    pub fn integer(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.integers(key)?.into_iter().next())
    }

    pub fn granularity(&self, default: Granularity) -> Result<Granularity> {
        match self.first("requested_granularity") {
            None => Ok(default),
            Some(value) => Granularity::parse(value).ok_or_else(|| {
                Error::Validation(format!(
                    "requestedGranularity must be boolean, count or record, got '{value}'"
                ))
            }),
        }
    }

    pub fn resultset_inclusion(&self) -> ResultsetInclusion {
        self.first("include_resultset_responses")
            .map(ResultsetInclusion::parse)
            .unwrap_or(ResultsetInclusion::Hit)
    }

    pub fn pagination(&self) -> Result<Pagination> {
        let skip = self.integer("skip")?.unwrap_or(0);
        let limit = self.integer("limit")?.unwrap_or(0);
        Ok(Pagination::new(
            usize::try_from(skip).unwrap_or(usize::MAX),
            usize::try_from(limit).unwrap_or(usize::MAX),
        ))
    }

    pub fn dataset_ids(&self) -> &[String] {
        self.list("dataset_ids")
    }

    pub fn variant(&self) -> Result<VariantParameters> {
        let text = |key: &str| self.first(key).map(str::to_string);
        Ok(VariantParameters {
            id: text("variant_id"),
            digest: text("variant_internal_id"),
            reference_name: text("reference_name"),
            start: self.integers("start")?,
            end: self.integers("end")?,
            variant_type: text("variant_type"),
            alternate_bases: text("alternate_bases"),
            reference_bases: text("reference_bases"),
            variant_min_length: self.integer("variant_min_length")?,
            variant_max_length: self.integer("variant_max_length")?,
            assembly_id: text("assembly_id"),
            gene_id: text("gene_id"),
        })
    }

    pub fn filter_flags(&self, definitions: &Definitions) -> FilterFlags {
        let defaults = definitions.filter_defaults();
        FilterFlags {
            logic: self
                .first("filter_logic")
                .map(Logic::parse)
                .unwrap_or(defaults.logic),
            descendants: self
                .flag("include_descendant_terms")
                .unwrap_or(defaults.include_descendant_terms),
        }
    }

    /// Builds the engine context for one request.
    ///
    /// `path_id` is the `{scope, id}` taken from the request path; id-list
    /// and geolocation parameters are recognized by their configured names.
    pub fn to_context(
        &self,
        request_id: &str,
        definitions: &Definitions,
        dataset_ids: Vec<String>,
        response_entity: &str,
        path_id: Option<(&str, &str)>,
    ) -> Result<RequestContext> {
        let mut builder = RequestContext::builder(request_id)
            .dataset_ids(dataset_ids)
            .response_entity(response_entity)
            .filters(self.filters.iter().cloned())
            .filter_flags(self.filter_flags(definitions))
            .variant(self.variant()?)
            .pagination(self.pagination()?);

        if let Some((scope, id)) = path_id {
            builder = builder.path_id(scope, id);
        }
        if let Some(access_id) = self.first("accessid").or_else(|| self.first("access_id")) {
            builder = builder.access_id(access_id);
        }

        let geo_parameters = &definitions.geolocation().parameters;
        for (key, values) in &self.values {
            if VARIANT_PARAMETERS.contains(&key.as_str()) {
                continue;
            }
            if definitions.id_scope(key).is_some() {
                builder = builder.id_list(key.as_str(), values.iter().cloned());
            } else if geo_parameters.contains_key(key) {
                if let Some(value) = values.first() {
                    builder = builder.geo_parameter(key.as_str(), value.as_str());
                }
            }
        }

        Ok(builder.build())
    }

    /// Parameters echoed in `meta.receivedRequestSummary.requestParameters`.
    pub fn summary(&self) -> BTreeMap<String, JsonValue> {
        self.values
            .iter()
            .filter(|(key, _)| {
                !matches!(
                    key.as_str(),
                    "requested_granularity" | "include_resultset_responses" | "skip" | "limit"
                )
            })
            .map(|(key, values)| {
                let value = match values.as_slice() {
                    [single] => JsonValue::String(single.clone()),
                    many => JsonValue::from(many.to_vec()),
                };
                (key.clone(), value)
            })
            .collect()
    }

    fn push(&mut self, key: &str, values: impl IntoIterator<Item = String>) {
        let values: Vec<String> = values.into_iter().collect();
        if values.is_empty() {
            return;
        }
        self.values.entry(key.to_string()).or_default().extend(values);
    }

    fn insert_body_member(&mut self, key: &str, value: &JsonValue) -> Result<()> {
        match key {
            "requestParameters" => self.insert_nested(value),
            "filters" => {
                let JsonValue::Array(items) = value else {
                    return Err(Error::Validation("filters must be a list".to_string()));
                };
                for item in items {
                    self.filters.push(filter_from_json(item)?);
                }
            }
            "pagination" => {
                if let JsonValue::Object(pagination) = value {
                    for key in ["skip", "limit"] {
                        if let Some(v) = pagination.get(key) {
                            self.insert_value(key, v);
                        }
                    }
                }
            }
            _ => self.insert_value(&to_persisted_key(key), value),
        }
        Ok(())
    }

    /// Flattens `requestParameters`; object members contribute their own members.
    fn insert_nested(&mut self, value: &JsonValue) {
        let JsonValue::Object(members) = value else {
            return;
        };
        for (key, value) in members {
            match value {
                JsonValue::Object(_) => self.insert_nested(value),
                _ => self.insert_value(&to_persisted_key(key), value),
            }
        }
    }

    fn insert_value(&mut self, key: &str, value: &JsonValue) {
        let values: Vec<String> = match value {
            JsonValue::Array(items) => items.iter().flat_map(scalar_strings).collect(),
            other => scalar_strings(other),
        };
        self.push(key, values);
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !NULL_VALUES.contains(v))
}

fn scalar_strings(value: &JsonValue) -> Vec<String> {
    match value {
        JsonValue::String(s) => split_list(s).map(str::to_string).collect(),
        JsonValue::Number(n) => vec![n.to_string()],
        JsonValue::Bool(b) => vec![b.to_string()],
        _ => Vec::new(),
    }
}

fn filter_from_json(value: &JsonValue) -> Result<Filter> {
    match value {
        JsonValue::String(id) => Ok(Filter::new(id.trim())),
        JsonValue::Object(_) => serde_json::from_value(value.clone())
            .map_err(|e| Error::Validation(format!("invalid filter {value}: {e}"))),
        other => Err(Error::Validation(format!("invalid filter {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_query::EngineConfig;
    use serde_json::json;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn query_keys_are_decamelized_and_lists_split() {
        let params = RequestParameters::from_query(pairs(&[
            ("referenceName", "17"),
            ("start", "7669607,7669609"),
            ("datasetIds", "progenetix,null,undefined"),
            ("filters", "NCIT:C3058,PMID:22824167"),
        ]));

        assert_eq!(params.first("reference_name"), Some("17"));
        assert_eq!(params.integers("start").unwrap(), vec![7_669_607, 7_669_609]);
        assert_eq!(params.dataset_ids(), ["progenetix".to_string()]);
        assert_eq!(
            params.filters(),
            [Filter::new("NCIT:C3058"), Filter::new("PMID:22824167")]
        );
    }

    #[test]
    fn non_integer_coordinates_are_rejected() {
        let params = RequestParameters::from_query(pairs(&[("start", "abc")]));
        assert!(matches!(params.variant(), Err(Error::Validation(_))));
    }

    #[test]
    fn body_is_flattened() {
        let params = RequestParameters::from_body(&json!({
            "meta": {"apiVersion": "2.0"},
            "query": {
                "requestParameters": {
                    "g_variant": {"referenceName": "9", "start": [21500000, 21975098], "variantType": "DEL"},
                    "datasets": {"datasetIds": ["progenetix"]}
                },
                "filters": ["NCIT:C3058", {"id": "NCIT:C3262", "includeDescendantTerms": false}],
                "pagination": {"skip": 1, "limit": 5},
                "requestedGranularity": "count"
            }
        }))
        .unwrap();

        let variant = params.variant().unwrap();
        assert_eq!(variant.reference_name.as_deref(), Some("9"));
        assert_eq!(variant.start, vec![21_500_000, 21_975_098]);
        assert_eq!(variant.variant_type.as_deref(), Some("DEL"));
        assert_eq!(params.dataset_ids(), ["progenetix".to_string()]);
        assert_eq!(params.filters()[1].include_descendant_terms, Some(false));
        assert_eq!(params.pagination().unwrap(), Pagination::new(1, 5));
        assert_eq!(params.granularity(Granularity::Record).unwrap(), Granularity::Count);
    }

    #[test]
    fn unknown_granularity_is_rejected() {
        let params = RequestParameters::from_query(pairs(&[("requestedGranularity", "aggregated")]));
        assert!(params.granularity(Granularity::Record).is_err());
    }

    #[test]
    fn context_routes_id_lists_and_geo_parameters() {
        let definitions = Definitions::new(EngineConfig::default()).unwrap();
        let params = RequestParameters::from_query(pairs(&[
            ("biosampleIds", "pgxbs-1,pgxbs-2"),
            ("city", "Zurich"),
            ("filterLogic", "OR"),
            ("includeDescendantTerms", "false"),
            ("accessid", "abc"),
        ]));

        let ctx = params
            .to_context("req", &definitions, vec!["progenetix".into()], "biosamples", None)
            .unwrap();

        assert_eq!(
            ctx.id_lists().get("biosample_ids"),
            Some(&vec!["pgxbs-1".to_string(), "pgxbs-2".to_string()])
        );
        assert_eq!(ctx.geo().get("city").map(String::as_str), Some("Zurich"));
        assert_eq!(ctx.filter_flags().logic, Logic::Or);
        assert!(!ctx.filter_flags().descendants);
        assert_eq!(ctx.access_id(), Some("abc"));
    }

    #[test]
    fn resultset_inclusion_filters_by_existence() {
        assert!(ResultsetInclusion::Hit.includes(true));
        assert!(!ResultsetInclusion::Hit.includes(false));
        assert!(ResultsetInclusion::Miss.includes(false));
        assert!(!ResultsetInclusion::None.includes(true));
    }
}
