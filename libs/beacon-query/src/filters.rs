//! Filter term resolution
//!
//! Terms are looked up as collations first, then matched against the
//! configured filter definition patterns. Anything that resolves to nothing
//! is dropped with a debug log.

use crate::context::{Filter, FilterFlags};
use crate::definitions::{CollationIndex, Definitions};
use crate::predicate::{Logic, Predicate};
use std::collections::BTreeMap;

/// A filter reduced to the values it selects on one stored field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFilter {
    pub scope: String,
    pub db_key: String,
    pub values: Vec<String>,
}

pub struct FilterResolver<'a> {
    definitions: &'a Definitions,
    collations: &'a CollationIndex,
}

impl<'a> FilterResolver<'a> {
    pub fn new(definitions: &'a Definitions, collations: &'a CollationIndex) -> Self {
        Self {
            definitions,
            collations,
        }
    }

    /// Resolves a single filter, or `None` when nothing matches it.
    pub fn resolve_filter(&self, filter: &Filter, flags: FilterFlags) -> Option<ResolvedFilter> {
        let descendants = filter.include_descendant_terms.unwrap_or(flags.descendants);

        let (default_scope, db_key, values) = if let Some(collation) = self.collations.get(&filter.id) {
            let values = if descendants && !collation.child_terms.is_empty() {
                collation.child_terms.clone()
            } else {
                vec![collation.id.clone()]
            };
            (collation.scope.clone(), collation.db_key.clone(), values)
        } else if let Some(compiled) = self.definitions.matching_filter_definition(&filter.id) {
            if compiled.definition.collationed {
                tracing::debug!(
                    filter = %filter.id,
                    definition = %compiled.name,
                    "Collationed filter term has no collation record"
                );
                return None;
            }
            (
                compiled.definition.scope.clone(),
                compiled.definition.db_key.clone(),
                vec![filter.id.clone()],
            )
        } else {
            tracing::debug!(filter = %filter.id, "No filter definition matches term");
            return None;
        };

        let scope = filter.scope.clone().unwrap_or(default_scope);
        if !self.definitions.is_collection(&scope) {
            tracing::debug!(filter = %filter.id, scope = %scope, "Filter targets unknown scope");
            return None;
        }

        Some(ResolvedFilter {
            scope,
            db_key,
            values,
        })
    }

    /// Builds one predicate per scope.
    ///
    /// Values for the same stored field are always unioned; distinct fields
    /// within a scope are combined with `flags.logic`.
    pub fn resolve(&self, filters: &[Filter], flags: FilterFlags) -> BTreeMap<String, Predicate> {
        let mut by_scope: BTreeMap<String, Vec<(String, Vec<String>)>> = BTreeMap::new();

        for resolved in filters.iter().filter_map(|f| self.resolve_filter(f, flags)) {
            let fields = by_scope.entry(resolved.scope).or_default();
            let slot = match fields.iter().position(|(key, _)| *key == resolved.db_key) {
                Some(i) => &mut fields[i].1,
                None => {
                    fields.push((resolved.db_key, Vec::new()));
                    let last = fields.len() - 1;
                    &mut fields[last].1
                }
            };
            for value in resolved.values {
                if !slot.contains(&value) {
                    slot.push(value);
                }
            }
        }

        by_scope
            .into_iter()
            .filter_map(|(scope, fields)| {
                let members: Vec<Predicate> = fields
                    .into_iter()
                    .filter(|(_, values)| !values.is_empty())
                    .map(|(db_key, values)| Predicate::one_or_many(db_key, values))
                    .collect();
                if members.is_empty() {
                    None
                } else {
                    Some((scope, Predicate::group(flags.logic, members)))
                }
            })
            .collect()
    }
}

/// Query against the collations collection for the filtering-terms service.
///
/// Filter ids naming a filter definition select whole collation types; any
/// other id selects that term. An optional `scope` narrows the result.
pub fn filtering_terms_query(
    definitions: &Definitions,
    filters: &[Filter],
    scope: Option<&str>,
) -> Option<Predicate> {
    let mut collation_types = Vec::new();
    let mut ids = Vec::new();

    for filter in filters {
        if definitions.filter_definition(&filter.id).is_some() {
            collation_types.push(filter.id.clone());
        } else {
            ids.push(filter.id.clone());
        }
    }

    let mut term_selectors = Vec::new();
    if !collation_types.is_empty() {
        term_selectors.push(Predicate::is_in("collation_type", collation_types));
    }
    if !ids.is_empty() {
        term_selectors.push(Predicate::one_or_many("id", ids));
    }

    let mut members = Vec::new();
    if !term_selectors.is_empty() {
        members.push(Predicate::group(Logic::Or, term_selectors));
    }
    if let Some(scope) = scope {
        members.push(Predicate::equals("scope", scope));
    }

    if members.is_empty() {
        None
    } else {
        Some(Predicate::group(Logic::And, members))
    }
}
