//! Per-scope query assembly
//!
//! Predicates are merged into one tree per scope in a fixed order: path id,
//! id lists, filters, variants, geolocation, handover. An earlier predicate
//! is always the left operand when combined with a later one.

use crate::context::RequestContext;
use crate::definitions::{CollationIndex, Definitions, GeoRequestKind};
use crate::error::{Error, Result};
use crate::filters::FilterResolver;
use crate::geo::GeoQueryBuilder;
use crate::handover::{HandoverLookupError, HandoverRecord, HandoverStore};
use crate::predicate::{Logic, Predicate};
use crate::variants::{
    GeneCoordinateResolver, VariantQueryBuilder, VariantRequestClassifier, VariantRequestType,
};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Scope name to predicate.
pub type QueryMap = BTreeMap<String, Predicate>;

#[derive(Debug, Clone, Default)]
pub struct AssembledQuery {
    pub queries: QueryMap,
    pub variant_request_type: Option<VariantRequestType>,
    pub geo_request: Option<GeoRequestKind>,
    /// Handover the request continued from, if it was found.
    pub handover: Option<HandoverRecord>,
}

impl AssembledQuery {
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.queries.keys().map(String::as_str)
    }

    /// Store-style rendering of every scope's predicate.
    pub fn to_documents(&self) -> JsonValue {
        JsonValue::Object(
            self.queries
                .iter()
                .map(|(scope, predicate)| (scope.clone(), predicate.to_document()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Serialize)]
struct ScopeSummary<'a> {
    scope: &'a str,
    predicate: &'a Predicate,
}

#[derive(Clone)]
pub struct QueryAssembler {
    definitions: Arc<Definitions>,
    collations: Arc<CollationIndex>,
}

impl QueryAssembler {
    pub fn new(definitions: Arc<Definitions>, collations: Arc<CollationIndex>) -> Self {
        Self {
            definitions,
            collations,
        }
    }

    pub fn definitions(&self) -> &Definitions {
        &self.definitions
    }

    pub fn collations(&self) -> &CollationIndex {
        &self.collations
    }

    /// Builds the query map for a request.
    ///
    /// Unresolvable inputs and unknown handovers narrow the query instead
    /// of failing it. Only store failures are returned as errors.
    #[tracing::instrument(skip_all, fields(request_id = %ctx.request_id()))]
    pub async fn assemble(
        &self,
        ctx: &RequestContext,
        handovers: &HandoverStore,
        genes: &dyn GeneCoordinateResolver,
    ) -> Result<AssembledQuery> {
        let mut assembled = AssembledQuery::default();
        let mut queries = QueryMap::new();

        if let Some(path_id) = ctx.path_id() {
            if self.definitions.is_collection(&path_id.scope) {
                let id = self.definitions.resolve_path_id(&path_id.id);
                merge(&mut queries, &path_id.scope, Predicate::equals("id", id), Logic::And);
            } else {
                tracing::debug!(scope = %path_id.scope, "Path id for unknown scope ignored");
            }
        }

        for (parameter, ids) in ctx.id_lists() {
            let Some(scope) = self.definitions.id_scope(parameter) else {
                tracing::debug!(parameter = %parameter, "No scope for id parameter");
                continue;
            };
            if ids.is_empty() {
                continue;
            }
            merge(
                &mut queries,
                scope,
                Predicate::one_or_many("id", ids.iter().cloned()),
                Logic::And,
            );
        }

        let flags = ctx.filter_flags();
        let filter_queries =
            FilterResolver::new(&self.definitions, &self.collations).resolve(ctx.filters(), flags);
        for (scope, predicate) in filter_queries {
            merge(&mut queries, &scope, predicate, flags.logic);
        }

        let variants = self.definitions.variants();
        if let Some(request) = VariantRequestClassifier::new(variants).classify(ctx.variant()) {
            let request_type = request.request_type();
            tracing::debug!(request_type = %request_type, "Classified variant request");
            if let Some(predicate) = VariantQueryBuilder::new(variants)
                .build(&request, genes)
                .await?
            {
                merge(&mut queries, &variants.scope, predicate, Logic::And);
                assembled.variant_request_type = Some(request_type);
            }
        }

        let geo = GeoQueryBuilder::new(&self.definitions);
        if let Some(geo_query) = geo.build(ctx.geo()) {
            merge(&mut queries, geo.scope(), geo_query.predicate, Logic::And);
            assembled.geo_request = Some(geo_query.kind);
        }

        if let Some(access_id) = ctx.access_id() {
            match handovers.retrieve(access_id).await {
                Ok(record) => {
                    let predicate = Predicate::is_in(
                        record.target_key.as_str(),
                        record.target_values.iter().cloned(),
                    );
                    merge(&mut queries, &record.target_collection, predicate, Logic::And);
                    assembled.handover = Some(record);
                }
                Err(HandoverLookupError::NotFound(_)) => {
                    tracing::warn!(access_id = %access_id, "Handover not found, continuing without it");
                }
                Err(HandoverLookupError::Store(message)) => {
                    tracing::error!(access_id = %access_id, error = %message, "Handover lookup failed");
                    return Err(Error::Store(message));
                }
            }
        }

        queries.retain(|scope, predicate| {
            let keep = !predicate.is_empty();
            if !keep {
                tracing::debug!(scope = %scope, "Purged empty scope");
            }
            keep
        });

        if tracing::enabled!(tracing::Level::TRACE) {
            for (scope, predicate) in &queries {
                tracing::trace!(
                    query = %serde_json::to_string(&ScopeSummary { scope, predicate }).unwrap_or_default(),
                    "Assembled scope"
                );
            }
        }

        assembled.queries = queries;
        Ok(assembled)
    }
}

/// Adds `predicate` to `scope`, keeping any existing predicate on the left.
fn merge(queries: &mut QueryMap, scope: &str, predicate: Predicate, logic: Logic) {
    let merged = match queries.remove(scope) {
        Some(existing) => existing.combine(predicate, logic),
        None => predicate,
    };
    queries.insert(scope.to_string(), merged);
}
