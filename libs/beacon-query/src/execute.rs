//! Query execution and handover registration

use crate::assembler::AssembledQuery;
use crate::context::RequestContext;
use crate::definitions::CollectionLink;
use crate::error::Result;
use crate::handover::{CreatedHandover, HandoverStore};
use crate::pagination::{slice, PageRange, Pagination};
use crate::predicate::{Logic, Predicate};
use crate::store::{DocumentStore, ID_FIELD};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Handovers created for one dataset, keyed `"{scope}._id"`.
#[derive(Debug, Clone)]
pub struct DatasetResult {
    pub dataset_id: String,
    pub handovers: BTreeMap<String, CreatedHandover>,
}

impl DatasetResult {
    pub fn handover_key(scope: &str) -> String {
        format!("{scope}.{ID_FIELD}")
    }

    pub fn handover_for(&self, scope: &str) -> Option<&CreatedHandover> {
        self.handovers.get(&Self::handover_key(scope))
    }

    pub fn count(&self, scope: &str) -> u64 {
        self.handover_for(scope)
            .map(|h| h.record.target_count)
            .unwrap_or(0)
    }

    /// Matched document count per scope.
    pub fn counts(&self) -> BTreeMap<String, u64> {
        self.handovers
            .values()
            .map(|h| (h.record.target_collection.clone(), h.record.target_count))
            .collect()
    }
}

/// One page of documents for a response entity.
#[derive(Debug, Clone)]
pub struct ResultPage {
    pub range: PageRange,
    pub total: u64,
    pub documents: Vec<JsonValue>,
}

/// How documents of one collection are constrained by matches in another:
/// `target_field` of the target must be among the values the matched
/// source documents hold at `source_field`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Join {
    source_field: String,
    target_field: String,
}

#[derive(Clone)]
pub struct QueryExecutor {
    store: Arc<dyn DocumentStore>,
    handovers: HandoverStore,
    links: Vec<CollectionLink>,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn DocumentStore>, handovers: HandoverStore) -> Self {
        Self {
            store,
            handovers,
            links: Vec::new(),
        }
    }

    /// Reference fields used to carry matches from one collection to another.
    pub fn with_links(mut self, links: impl IntoIterator<Item = CollectionLink>) -> Self {
        self.links = links.into_iter().collect();
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn handovers(&self) -> &HandoverStore {
        &self.handovers
    }

    fn join(&self, source: &str, target: &str) -> Option<Join> {
        let id = || "id".to_string();
        if let Some(link) = self
            .links
            .iter()
            .find(|l| l.collection == target && l.references == source)
        {
            return Some(Join {
                source_field: id(),
                target_field: link.field.clone(),
            });
        }
        self.links
            .iter()
            .find(|l| l.collection == source && l.references == target)
            .map(|link| Join {
                source_field: link.field.clone(),
                target_field: id(),
            })
    }

    /// Runs every scope of `query` against every dataset of the request and
    /// registers a handover for each matched id list.
    ///
    /// Each queried scope and the response entity is matched by its own
    /// predicate intersected with the matches of every other queried scope,
    /// carried over the configured links.
    #[tracing::instrument(skip_all, fields(request_id = %ctx.request_id()))]
    pub async fn execute(
        &self,
        ctx: &RequestContext,
        query: &AssembledQuery,
    ) -> Result<Vec<DatasetResult>> {
        let mut targets: Vec<&str> = query.queries.keys().map(String::as_str).collect();
        if let Some(entity) = ctx.response_entity() {
            if !query.queries.is_empty() && !query.queries.contains_key(entity) {
                targets.push(entity);
            }
        }

        let mut results = Vec::with_capacity(ctx.dataset_ids().len());

        for dataset_id in ctx.dataset_ids() {
            let mut handovers = BTreeMap::new();
            let mut linked_values: HashMap<(&str, String), Vec<JsonValue>> = HashMap::new();

            for &target in &targets {
                let mut members: Vec<Predicate> =
                    query.queries.get(target).into_iter().cloned().collect();
                let mut unmatched = false;

                for (source, predicate) in &query.queries {
                    if source.as_str() == target {
                        continue;
                    }
                    let Some(join) = self.join(source, target) else {
                        tracing::debug!(source = %source, target = %target, "No link between scopes");
                        continue;
                    };
                    let key = (source.as_str(), join.source_field.clone());
                    let values = match linked_values.get(&key) {
                        Some(values) => values.clone(),
                        None => {
                            let values = self
                                .store
                                .distinct(dataset_id, source, &join.source_field, Some(predicate))
                                .await?;
                            linked_values.insert(key, values.clone());
                            values
                        }
                    };
                    if values.is_empty() {
                        unmatched = true;
                        break;
                    }
                    members.push(Predicate::is_in(join.target_field, values));
                }

                if members.is_empty() && !unmatched {
                    tracing::debug!(dataset = %dataset_id, scope = %target, "Scope not reachable from query");
                    continue;
                }

                let ids = if unmatched {
                    Vec::new()
                } else {
                    let predicate = Predicate::group(Logic::And, members);
                    self.store
                        .find_ids(dataset_id, target, &predicate)
                        .await
                        .inspect_err(|e| {
                            tracing::error!(dataset = %dataset_id, scope = %target, error = %e, "Query failed");
                        })?
                };
                let total = ids.len() as u64;
                tracing::debug!(dataset = %dataset_id, scope = %target, count = total, "Scope executed");

                let created = self
                    .handovers
                    .create(ID_FIELD, target, dataset_id, ids, total)
                    .await?;
                handovers.insert(DatasetResult::handover_key(target), created);
            }

            results.push(DatasetResult {
                dataset_id: dataset_id.clone(),
                handovers,
            });
        }

        Ok(results)
    }

    /// Documents of `entity` for the requested page.
    ///
    /// The entity's id list is sliced by the paginator first so only the
    /// page itself is fetched.
    pub async fn fetch_page(
        &self,
        result: &DatasetResult,
        entity: &str,
        pagination: Pagination,
    ) -> Result<ResultPage> {
        let Some(handover) = result.handover_for(entity) else {
            return Ok(ResultPage {
                range: pagination.range(0),
                total: 0,
                documents: Vec::new(),
            });
        };

        let ids = &handover.record.target_values;
        let range = pagination.range(ids.len());
        let page_ids = slice(ids, range);
        let documents = self
            .store
            .find_by_ids(&result.dataset_id, entity, page_ids)
            .await?;

        Ok(ResultPage {
            range,
            total: handover.record.target_count,
            documents,
        })
    }
}
