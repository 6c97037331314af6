//! Per-request context
//!
//! Built once by [`RequestContextBuilder`] from normalized parameters and
//! read-only afterwards. Every pipeline stage takes it by reference.

use crate::pagination::Pagination;
use crate::predicate::Logic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A caller-supplied filter term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_descendant_terms: Option<bool>,
}

impl Filter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scope: None,
            include_descendant_terms: None,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_descendants(mut self, include: bool) -> Self {
        self.include_descendant_terms = Some(include);
        self
    }
}

/// Global filter combination settings for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterFlags {
    pub logic: Logic,
    pub descendants: bool,
}

impl Default for FilterFlags {
    fn default() -> Self {
        Self {
            logic: Logic::And,
            descendants: true,
        }
    }
}

/// Single-document id taken from the request path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathId {
    pub scope: String,
    pub id: String,
}

/// Variant-related request parameters, already typed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariantParameters {
    pub id: Option<String>,
    pub digest: Option<String>,
    pub reference_name: Option<String>,
    pub start: Vec<u64>,
    pub end: Vec<u64>,
    pub variant_type: Option<String>,
    pub alternate_bases: Option<String>,
    pub reference_bases: Option<String>,
    pub variant_min_length: Option<u64>,
    pub variant_max_length: Option<u64>,
    pub assembly_id: Option<String>,
    pub gene_id: Option<String>,
}

impl VariantParameters {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestContext {
    request_id: String,
    dataset_ids: Vec<String>,
    response_entity: Option<String>,
    path_id: Option<PathId>,
    id_lists: BTreeMap<String, Vec<String>>,
    filters: Vec<Filter>,
    filter_flags: FilterFlags,
    variant: VariantParameters,
    geo: BTreeMap<String, String>,
    access_id: Option<String>,
    pagination: Pagination,
}

impl RequestContext {
    pub fn builder(request_id: impl Into<String>) -> RequestContextBuilder {
        RequestContextBuilder::new(request_id)
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn dataset_ids(&self) -> &[String] {
        &self.dataset_ids
    }

    pub fn response_entity(&self) -> Option<&str> {
        self.response_entity.as_deref()
    }

    pub fn path_id(&self) -> Option<&PathId> {
        self.path_id.as_ref()
    }

    pub fn id_lists(&self) -> &BTreeMap<String, Vec<String>> {
        &self.id_lists
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn filter_flags(&self) -> FilterFlags {
        self.filter_flags
    }

    pub fn variant(&self) -> &VariantParameters {
        &self.variant
    }

    pub fn geo(&self) -> &BTreeMap<String, String> {
        &self.geo
    }

    pub fn access_id(&self) -> Option<&str> {
        self.access_id.as_deref()
    }

    pub fn pagination(&self) -> Pagination {
        self.pagination
    }
}

pub struct RequestContextBuilder {
    context: RequestContext,
}

impl RequestContextBuilder {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            context: RequestContext {
                request_id: request_id.into(),
                ..RequestContext::default()
            },
        }
    }

    pub fn dataset_ids(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.context.dataset_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn response_entity(mut self, entity: impl Into<String>) -> Self {
        self.context.response_entity = Some(entity.into());
        self
    }

    pub fn path_id(mut self, scope: impl Into<String>, id: impl Into<String>) -> Self {
        self.context.path_id = Some(PathId {
            scope: scope.into(),
            id: id.into(),
        });
        self
    }

    /// Adds an id-list parameter. Empty lists are ignored.
    pub fn id_list(
        mut self,
        parameter: impl Into<String>,
        ids: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        if !ids.is_empty() {
            self.context.id_lists.insert(parameter.into(), ids);
        }
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.context.filters.push(filter);
        self
    }

    pub fn filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.context.filters.extend(filters);
        self
    }

    pub fn filter_flags(mut self, flags: FilterFlags) -> Self {
        self.context.filter_flags = flags;
        self
    }

    pub fn variant(mut self, variant: VariantParameters) -> Self {
        self.context.variant = variant;
        self
    }

    pub fn geo_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.geo.insert(name.into(), value.into());
        self
    }

    pub fn access_id(mut self, access_id: impl Into<String>) -> Self {
        let access_id = access_id.into();
        if !access_id.is_empty() {
            self.context.access_id = Some(access_id);
        }
        self
    }

    pub fn pagination(mut self, pagination: Pagination) -> Self {
        self.context.pagination = pagination;
        self
    }

    pub fn build(self) -> RequestContext {
        self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_parameters() {
        let ctx = RequestContext::builder("req-1")
            .dataset_ids(["progenetix"])
            .response_entity("biosamples")
            .id_list("biosample_ids", ["a", "b"])
            .id_list("individual_ids", Vec::<String>::new())
            .filter(Filter::new("NCIT:C3262"))
            .geo_parameter("city", "Zurich")
            .access_id("")
            .pagination(Pagination::new(1, 10))
            .build();

        assert_eq!(ctx.request_id(), "req-1");
        assert_eq!(ctx.dataset_ids(), ["progenetix".to_string()]);
        assert_eq!(ctx.response_entity(), Some("biosamples"));
        assert_eq!(ctx.id_lists().len(), 1);
        assert_eq!(ctx.filters().len(), 1);
        assert_eq!(ctx.geo().get("city").map(String::as_str), Some("Zurich"));
        assert!(ctx.access_id().is_none());
        assert_eq!(ctx.pagination().limit, 10);
        assert_eq!(ctx.filter_flags(), FilterFlags::default());
    }

    #[test]
    fn filter_deserializes_beacon_shape() {
        let filter: Filter = serde_json::from_value(serde_json::json!({
            "id": "NCIT:C3262",
            "includeDescendantTerms": false
        }))
        .unwrap();
        assert_eq!(filter, Filter::new("NCIT:C3262").with_descendants(false));
    }

    #[test]
    fn variant_parameters_emptiness() {
        assert!(VariantParameters::default().is_empty());
        let params = VariantParameters {
            gene_id: Some("TP53".into()),
            ..Default::default()
        };
        assert!(!params.is_empty());
    }
}
