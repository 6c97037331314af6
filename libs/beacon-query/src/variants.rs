//! Variant request classification and query construction
//!
//! Classification happens once per request and yields a [`VariantRequest`]
//! tag carrying everything the query builder needs. Nothing downstream
//! looks at the raw parameters again.

use crate::context::VariantParameters;
use crate::definitions::{VariantDefinitions, VariantTypeDefinition};
use crate::error::Result;
use crate::predicate::{Comparison, Logic, Predicate};
use crate::store::DocumentStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Reference bases value meaning "any base".
const WILDCARD_BASES: &str = "N";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VariantRequestType {
    Id,
    CopyNumber,
    Allele,
    Range,
    Gene,
}

impl VariantRequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Id => "variantIdRequest",
            Self::CopyNumber => "variantCNVrequest",
            Self::Allele => "variantAlleleRequest",
            Self::Range => "variantRangeRequest",
            Self::Gene => "geneVariantRequest",
        }
    }
}

impl std::fmt::Display for VariantRequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional narrowing shared by the interval-based request types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantConstraints {
    pub state_ids: Vec<String>,
    pub min_length: Option<u64>,
    pub max_length: Option<u64>,
    pub assembly_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariantRequest {
    Id {
        id: Option<String>,
        digest: Option<String>,
    },
    CopyNumber {
        reference_name: String,
        start: Vec<u64>,
        end: Vec<u64>,
        constraints: VariantConstraints,
    },
    Allele {
        reference_name: String,
        start: u64,
        alternate_bases: String,
        reference_bases: Option<String>,
        assembly_id: Option<String>,
    },
    Range {
        reference_name: String,
        start: Vec<u64>,
        end: Vec<u64>,
        reference_bases: Option<String>,
        constraints: VariantConstraints,
    },
    Gene {
        gene_id: String,
        constraints: VariantConstraints,
    },
}

impl VariantRequest {
    pub fn request_type(&self) -> VariantRequestType {
        match self {
            Self::Id { .. } => VariantRequestType::Id,
            Self::CopyNumber { .. } => VariantRequestType::CopyNumber,
            Self::Allele { .. } => VariantRequestType::Allele,
            Self::Range { .. } => VariantRequestType::Range,
            Self::Gene { .. } => VariantRequestType::Gene,
        }
    }
}

pub struct VariantRequestClassifier<'a> {
    definitions: &'a VariantDefinitions,
}

impl<'a> VariantRequestClassifier<'a> {
    pub fn new(definitions: &'a VariantDefinitions) -> Self {
        Self { definitions }
    }

    /// Picks the single request type the parameters satisfy.
    ///
    /// Precedence: id, copy number, allele, range, gene. `None` means the
    /// parameters do not form a variant request.
    pub fn classify(&self, params: &VariantParameters) -> Option<VariantRequest> {
        if params.is_empty() {
            return None;
        }

        // An id wins regardless of companion parameters.
        let id = non_empty(&params.id);
        let digest = non_empty(&params.digest);
        if id.is_some() || digest.is_some() {
            return Some(VariantRequest::Id { id, digest });
        }
        if params.start.len() > 2 || params.end.len() > 2 {
            tracing::debug!(
                start = params.start.len(),
                end = params.end.len(),
                "Variant coordinates accept at most two values"
            );
            return None;
        }

        let variant_type: Option<&VariantTypeDefinition> = match params.variant_type.as_deref() {
            Some(name) => match self.definitions.variant_type(name) {
                Some(definition) => Some(definition),
                None => {
                    tracing::debug!(variant_type = %name, "Unknown variant type");
                    return None;
                }
            },
            None => None,
        };

        let alternate_bases = non_empty(&params.alternate_bases);
        let reference_bases = non_empty(&params.reference_bases).filter(|b| b != WILDCARD_BASES);
        let has_alleles = alternate_bases.is_some() || reference_bases.is_some();
        let bracketed = params.start.len() == 2 || params.end.len() == 2;
        let has_interval = !params.start.is_empty() && !params.end.is_empty();

        let constraints = VariantConstraints {
            state_ids: variant_type
                .map(|t| t.state_ids.clone())
                .unwrap_or_default(),
            min_length: params.variant_min_length,
            max_length: params.variant_max_length,
            assembly_id: non_empty(&params.assembly_id),
        };

        if let Some(reference_name) = non_empty(&params.reference_name) {
            let reference_name = self.definitions.normalize_reference_name(&reference_name);
            let copy_number = variant_type.is_some_and(|t| t.copy_number);

            if has_interval && !has_alleles && (copy_number || bracketed) {
                return Some(VariantRequest::CopyNumber {
                    reference_name,
                    start: params.start.clone(),
                    end: params.end.clone(),
                    constraints,
                });
            }

            if has_alleles && bracketed {
                tracing::debug!("Allele parameters need a single start position");
                return None;
            }

            if let (Some(alternate_bases), [start]) = (alternate_bases, params.start.as_slice()) {
                return Some(VariantRequest::Allele {
                    reference_name,
                    start: *start,
                    alternate_bases,
                    reference_bases,
                    assembly_id: constraints.assembly_id,
                });
            }

            if has_interval {
                return Some(VariantRequest::Range {
                    reference_name,
                    start: params.start.clone(),
                    end: params.end.clone(),
                    reference_bases,
                    constraints,
                });
            }
        }

        if let Some(gene_id) = non_empty(&params.gene_id) {
            return Some(VariantRequest::Gene {
                gene_id,
                constraints,
            });
        }

        tracing::debug!("Variant parameters match no request type");
        None
    }
}

/// Builds the variant-scope predicate for a classified request.
pub struct VariantQueryBuilder<'a> {
    definitions: &'a VariantDefinitions,
}

impl<'a> VariantQueryBuilder<'a> {
    pub fn new(definitions: &'a VariantDefinitions) -> Self {
        Self { definitions }
    }

    /// `Ok(None)` when a gene request names a gene the resolver does not know.
    pub async fn build(
        &self,
        request: &VariantRequest,
        genes: &dyn GeneCoordinateResolver,
    ) -> Result<Option<Predicate>> {
        let fields = &self.definitions.fields;

        let predicate = match request {
            VariantRequest::Id { id, digest } => {
                let mut members = Vec::new();
                if let Some(id) = id {
                    members.push(Predicate::equals(fields.id.as_str(), id.as_str()));
                }
                if let Some(digest) = digest {
                    members.push(Predicate::equals(fields.digest.as_str(), digest.as_str()));
                }
                Predicate::group(Logic::Or, members)
            }
            VariantRequest::CopyNumber {
                reference_name,
                start,
                end,
                constraints,
            } => self.interval(reference_name, start, end, None, constraints),
            VariantRequest::Range {
                reference_name,
                start,
                end,
                reference_bases,
                constraints,
            } => self.interval(
                reference_name,
                start,
                end,
                reference_bases.as_deref(),
                constraints,
            ),
            VariantRequest::Allele {
                reference_name,
                start,
                alternate_bases,
                reference_bases,
                assembly_id,
            } => {
                let mut members = vec![Predicate::equals(
                    fields.reference_name.as_str(),
                    reference_name.as_str(),
                )];
                members.extend(self.assembly(assembly_id.as_deref()));
                members.push(Predicate::equals(fields.start.as_str(), *start));
                members.push(Predicate::equals(
                    fields.alternate_bases.as_str(),
                    alternate_bases.as_str(),
                ));
                if let Some(bases) = reference_bases {
                    members.push(Predicate::equals(fields.reference_bases.as_str(), bases.as_str()));
                }
                Predicate::and(members)
            }
            VariantRequest::Gene {
                gene_id,
                constraints,
            } => {
                let Some(interval) = genes.resolve(gene_id).await? else {
                    tracing::debug!(gene = %gene_id, "Gene has no known coordinates");
                    return Ok(None);
                };
                let reference_name = self
                    .definitions
                    .normalize_reference_name(&interval.reference_name);
                self.interval(
                    &reference_name,
                    &[interval.start],
                    &[interval.end],
                    None,
                    constraints,
                )
            }
        };

        Ok(Some(predicate))
    }

    /// Interval predicate.
    ///
    /// With a two-valued `start` or `end` the stored start must lie in
    /// `[start0, start1]` and the stored end in `[end0, end1]`; a single
    /// value bounds exactly. Otherwise stored intervals overlapping
    /// `[start0, end_last]` match.
    fn interval(
        &self,
        reference_name: &str,
        start: &[u64],
        end: &[u64],
        reference_bases: Option<&str>,
        constraints: &VariantConstraints,
    ) -> Predicate {
        let fields = &self.definitions.fields;
        let mut members = vec![Predicate::equals(fields.reference_name.as_str(), reference_name)];
        members.extend(self.assembly(constraints.assembly_id.as_deref()));

        if start.len() == 2 || end.len() == 2 {
            let (start_lo, start_hi) = bounds(start);
            let (end_lo, end_hi) = bounds(end);
            members.push(Predicate::compare(fields.start.as_str(), Comparison::Gte, start_lo));
            members.push(Predicate::compare(fields.start.as_str(), Comparison::Lte, start_hi));
            members.push(Predicate::compare(fields.end.as_str(), Comparison::Gte, end_lo));
            members.push(Predicate::compare(fields.end.as_str(), Comparison::Lte, end_hi));
        } else {
            let query_start = start.first().copied().unwrap_or_default();
            let query_end = end.last().copied().unwrap_or_default();
            members.push(Predicate::compare(fields.start.as_str(), Comparison::Lt, query_end));
            members.push(Predicate::compare(fields.end.as_str(), Comparison::Gt, query_start));
        }

        if let Some(bases) = reference_bases {
            members.push(Predicate::equals(fields.reference_bases.as_str(), bases));
        }
        if !constraints.state_ids.is_empty() {
            members.push(Predicate::one_or_many(
                fields.variant_type.as_str(),
                constraints.state_ids.iter().cloned(),
            ));
        }
        if let Some(min) = constraints.min_length {
            members.push(Predicate::compare(fields.length.as_str(), Comparison::Gte, min));
        }
        if let Some(max) = constraints.max_length {
            members.push(Predicate::compare(fields.length.as_str(), Comparison::Lte, max));
        }

        Predicate::and(members)
    }

    fn assembly(&self, assembly_id: Option<&str>) -> Option<Predicate> {
        let field = self.definitions.fields.assembly_id.as_deref()?;
        Some(Predicate::equals(field, assembly_id?))
    }
}

/// `(lo, hi)` of a one- or two-valued coordinate list.
fn bounds(values: &[u64]) -> (u64, u64) {
    match values {
        [] => (0, u64::MAX),
        [v] => (*v, *v),
        [a, b, ..] => ((*a).min(*b), (*a).max(*b)),
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Reference coordinates of a gene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneInterval {
    pub symbol: String,
    pub reference_name: String,
    pub start: u64,
    pub end: u64,
}

/// Maps a gene identifier to its genomic interval.
#[async_trait]
pub trait GeneCoordinateResolver: Send + Sync {
    async fn resolve(&self, gene_id: &str) -> Result<Option<GeneInterval>>;
}

/// Looks genes up in a `genes` collection by symbol or accession.
pub struct StoreGeneResolver {
    store: Arc<dyn DocumentStore>,
    database: String,
    collection: String,
}

impl StoreGeneResolver {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        database: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            database: database.into(),
            collection: collection.into(),
        }
    }
}

#[async_trait]
impl GeneCoordinateResolver for StoreGeneResolver {
    async fn resolve(&self, gene_id: &str) -> Result<Option<GeneInterval>> {
        let predicate = Predicate::or(vec![
            Predicate::regex("symbol", format!("^{}$", regex::escape(gene_id)), true),
            Predicate::equals("accession_version", gene_id),
            Predicate::equals("ensembl_gene_ids", gene_id),
        ]);
        let documents = self
            .store
            .find(&self.database, &self.collection, Some(&predicate), Some(1))
            .await?;

        let Some(document) = documents.first() else {
            return Ok(None);
        };

        let interval = (|| {
            Some(GeneInterval {
                symbol: document.get("symbol")?.as_str()?.to_string(),
                reference_name: match document.get("reference_name")? {
                    JsonValue::String(s) => s.clone(),
                    JsonValue::Number(n) => n.to_string(),
                    _ => return None,
                },
                start: document.get("start")?.as_u64()?,
                end: document.get("end")?.as_u64()?,
            })
        })();

        if interval.is_none() {
            tracing::warn!(gene = %gene_id, "Gene record lacks usable coordinates");
        }
        Ok(interval)
    }
}
