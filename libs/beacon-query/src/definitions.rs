//! Engine definitions
//!
//! [`EngineConfig`] is the deserializable form handed over by the config
//! loader. [`Definitions`] is the validated, compiled form the engine works
//! with: every regex is compiled exactly once here.

use crate::error::{Error, Result};
use crate::predicate::Logic;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Default ceiling for persisted handover id lists (bytes of serialized JSON).
pub const DEFAULT_HANDOVER_MAX_BYTES: usize = 15_000_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Collections a predicate may target.
    pub collections: Vec<String>,
    /// Request parameter name (e.g. `biosample_ids`) to scope.
    pub id_scopes: BTreeMap<String, String>,
    /// Filter definitions keyed by name (usually the namespace prefix).
    /// Terms are matched against patterns in this order.
    pub filter_definitions: IndexMap<String, FilterDefinition>,
    pub filter_defaults: FilterDefaults,
    /// Reference fields joining one collection's documents to another's.
    pub links: Vec<CollectionLink>,
    pub variants: VariantDefinitions,
    pub geolocation: GeoDefinitions,
    pub handover: HandoverSettings,
    /// Replacement for placeholder path ids such as `_id_` or `{id}`.
    pub test_document_id: Option<String>,
    pub dummy_ids: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            collections: ["biosamples", "individuals", "analyses", "variants"]
                .into_iter()
                .map(String::from)
                .collect(),
            id_scopes: [
                ("biosample_ids", "biosamples"),
                ("individual_ids", "individuals"),
                ("analysis_ids", "analyses"),
                ("variant_ids", "variants"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
            filter_definitions: IndexMap::new(),
            filter_defaults: FilterDefaults::default(),
            links: [
                ("biosamples", "individual_id", "individuals"),
                ("analyses", "biosample_id", "biosamples"),
                ("analyses", "individual_id", "individuals"),
                ("variants", "analysis_id", "analyses"),
                ("variants", "biosample_id", "biosamples"),
                ("variants", "individual_id", "individuals"),
            ]
            .into_iter()
            .map(|(collection, field, references)| CollectionLink {
                collection: collection.to_string(),
                field: field.to_string(),
                references: references.to_string(),
            })
            .collect(),
            variants: VariantDefinitions::default(),
            geolocation: GeoDefinitions::default(),
            handover: HandoverSettings::default(),
            test_document_id: None,
            dummy_ids: [
                "_id_", "__id__", "___id___", "_test_", "__test__", "___test___", "{id}",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Documents of `collection` carry the `id` of a `references` document
/// in `field`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionLink {
    pub collection: String,
    pub field: String,
    pub references: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterDefinition {
    /// Regex a filter id must match for this definition to apply.
    pub pattern: String,
    pub scope: String,
    pub db_key: String,
    /// Collationed terms are only resolvable through a [`Collation`] record.
    #[serde(default)]
    pub collationed: bool,
    #[serde(default)]
    pub namespace_prefix: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterDefaults {
    pub logic: Logic,
    pub include_descendant_terms: bool,
}

impl Default for FilterDefaults {
    fn default() -> Self {
        Self {
            logic: Logic::And,
            include_descendant_terms: true,
        }
    }
}

/// Precomputed term record with its descendant closure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collation {
    pub id: String,
    pub scope: String,
    pub db_key: String,
    #[serde(default)]
    pub child_terms: Vec<String>,
    #[serde(default)]
    pub collation_type: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

/// In-memory collation lookup keyed by term id.
#[derive(Debug, Clone, Default)]
pub struct CollationIndex {
    by_id: HashMap<String, Collation>,
}

impl CollationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, collation: Collation) {
        self.by_id.insert(collation.id.clone(), collation);
    }

    pub fn get(&self, id: &str) -> Option<&Collation> {
        self.by_id.get(id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl FromIterator<Collation> for CollationIndex {
    fn from_iter<I: IntoIterator<Item = Collation>>(iter: I) -> Self {
        let mut index = Self::new();
        for collation in iter {
            index.insert(collation);
        }
        index
    }
}

/// Stored field paths for variant documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VariantFieldMap {
    pub id: String,
    pub digest: String,
    pub reference_name: String,
    pub start: String,
    pub end: String,
    pub variant_type: String,
    pub alternate_bases: String,
    pub reference_bases: String,
    pub length: String,
    pub assembly_id: Option<String>,
}

impl Default for VariantFieldMap {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            digest: "variant_internal_id".to_string(),
            reference_name: "location.sequence_id".to_string(),
            start: "location.start".to_string(),
            end: "location.end".to_string(),
            variant_type: "variant_state.id".to_string(),
            alternate_bases: "sequence".to_string(),
            reference_bases: "reference_sequence".to_string(),
            length: "info.var_length".to_string(),
            assembly_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantTypeDefinition {
    /// Stored variant state ids this type expands to.
    pub state_ids: Vec<String>,
    /// Copy-number classes use overlap/bracket semantics.
    #[serde(default)]
    pub copy_number: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VariantDefinitions {
    pub scope: String,
    pub fields: VariantFieldMap,
    pub types: BTreeMap<String, VariantTypeDefinition>,
    /// Alternative chromosome spellings (`17`, `chr17`) to stored reference names.
    pub reference_aliases: BTreeMap<String, String>,
}

impl Default for VariantDefinitions {
    fn default() -> Self {
        let cnv = |ids: &[&str]| VariantTypeDefinition {
            state_ids: ids.iter().map(|s| s.to_string()).collect(),
            copy_number: true,
        };
        let mut types = BTreeMap::new();
        types.insert("DEL".to_string(), cnv(&["EFO:0030067"]));
        types.insert("DUP".to_string(), cnv(&["EFO:0030070"]));
        types.insert("HLDEL".to_string(), cnv(&["EFO:0020073"]));
        types.insert("HLDUP".to_string(), cnv(&["EFO:0030072"]));
        types.insert(
            "CNV".to_string(),
            cnv(&["EFO:0030067", "EFO:0030070", "EFO:0020073", "EFO:0030072"]),
        );
        types.insert(
            "SNV".to_string(),
            VariantTypeDefinition {
                state_ids: vec!["SO:0001483".to_string()],
                copy_number: false,
            },
        );

        Self {
            scope: "variants".to_string(),
            fields: VariantFieldMap::default(),
            types,
            reference_aliases: BTreeMap::new(),
        }
    }
}

impl VariantDefinitions {
    /// Looks up a variant type by exact name, then case-insensitively.
    pub fn variant_type(&self, name: &str) -> Option<&VariantTypeDefinition> {
        self.types.get(name).or_else(|| {
            self.types
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
    }

    pub fn normalize_reference_name(&self, name: &str) -> String {
        self.reference_aliases
            .get(name)
            .or_else(|| {
                self.reference_aliases
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            })
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoValueKind {
    Float,
    String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoParameterDefinition {
    pub pattern: String,
    #[serde(rename = "type")]
    pub kind: GeoValueKind,
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoRequestKind {
    City,
    Id,
    Coordinates,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoRequestTypeDefinition {
    pub name: String,
    pub kind: GeoRequestKind,
    pub all_of: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoDefinitions {
    pub scope: String,
    pub geo_root: String,
    pub parameters: BTreeMap<String, GeoParameterDefinition>,
    /// Evaluated in order; the first complete and valid set wins.
    pub request_types: Vec<GeoRequestTypeDefinition>,
}

impl Default for GeoDefinitions {
    fn default() -> Self {
        let param = |pattern: &str, kind: GeoValueKind, default: Option<&str>| {
            GeoParameterDefinition {
                pattern: pattern.to_string(),
                kind,
                default: default.map(String::from),
            }
        };
        let mut parameters = BTreeMap::new();
        parameters.insert(
            "city".to_string(),
            param(r"^\w[\w\s\-\.']*$", GeoValueKind::String, None),
        );
        parameters.insert(
            "geo_id".to_string(),
            param(r"^[\w\-\.:]+$", GeoValueKind::String, None),
        );
        parameters.insert(
            "geolatitude".to_string(),
            param(r"^-?\d+(\.\d+)?$", GeoValueKind::Float, None),
        );
        parameters.insert(
            "geolongitude".to_string(),
            param(r"^-?\d+(\.\d+)?$", GeoValueKind::Float, None),
        );
        parameters.insert(
            "geodistance".to_string(),
            param(r"^\d+(\.\d+)?$", GeoValueKind::Float, Some("10000")),
        );

        let request = |name: &str, kind: GeoRequestKind, all_of: &[&str]| GeoRequestTypeDefinition {
            name: name.to_string(),
            kind,
            all_of: all_of.iter().map(|s| s.to_string()).collect(),
        };

        Self {
            scope: "biosamples".to_string(),
            geo_root: "geo_location".to_string(),
            parameters,
            request_types: vec![
                request("city", GeoRequestKind::City, &["city"]),
                request("geo_id", GeoRequestKind::Id, &["geo_id"]),
                request(
                    "geoquery",
                    GeoRequestKind::Coordinates,
                    &["geolongitude", "geolatitude", "geodistance"],
                ),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoverSettings {
    /// Id lists serializing to more bytes than this are not persisted.
    pub max_payload_bytes: usize,
}

impl Default for HandoverSettings {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_HANDOVER_MAX_BYTES,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledFilterDefinition {
    pub name: String,
    pub definition: FilterDefinition,
    pub regex: Regex,
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledGeoParameter {
    pub definition: GeoParameterDefinition,
    pub regex: Regex,
}

/// Validated engine definitions.
#[derive(Debug, Clone)]
pub struct Definitions {
    config: EngineConfig,
    filters: Vec<CompiledFilterDefinition>,
    geo_parameters: BTreeMap<String, CompiledGeoParameter>,
}

impl Definitions {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let filters = config
            .filter_definitions
            .iter()
            .map(|(name, definition)| {
                let regex = Regex::new(&definition.pattern).map_err(|e| {
                    Error::config(format!("filter definition '{name}': invalid pattern: {e}"))
                })?;
                Ok(CompiledFilterDefinition {
                    name: name.clone(),
                    definition: definition.clone(),
                    regex,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let geo_parameters = config
            .geolocation
            .parameters
            .iter()
            .map(|(name, definition)| {
                let regex = Regex::new(&definition.pattern).map_err(|e| {
                    Error::config(format!("geo parameter '{name}': invalid pattern: {e}"))
                })?;
                Ok((
                    name.clone(),
                    CompiledGeoParameter {
                        definition: definition.clone(),
                        regex,
                    },
                ))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        for request_type in &config.geolocation.request_types {
            if let Some(missing) = request_type
                .all_of
                .iter()
                .find(|p| !geo_parameters.contains_key(p.as_str()))
            {
                return Err(Error::config(format!(
                    "geo request type '{}' requires undefined parameter '{missing}'",
                    request_type.name
                )));
            }
        }

        for (param, scope) in &config.id_scopes {
            if !config.collections.contains(scope) {
                return Err(Error::config(format!(
                    "id parameter '{param}' maps to unknown collection '{scope}'"
                )));
            }
        }

        for link in &config.links {
            if let Some(unknown) = [&link.collection, &link.references]
                .into_iter()
                .find(|c| !config.collections.contains(c))
            {
                return Err(Error::config(format!(
                    "link field '{}' names unknown collection '{unknown}'",
                    link.field
                )));
            }
        }

        if !config.collections.contains(&config.variants.scope) {
            tracing::warn!(
                scope = %config.variants.scope,
                "Variant scope is not a configured collection"
            );
        }

        Ok(Self {
            config,
            filters,
            geo_parameters,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_collection(&self, scope: &str) -> bool {
        self.config.collections.iter().any(|c| c == scope)
    }

    pub fn variants(&self) -> &VariantDefinitions {
        &self.config.variants
    }

    pub fn geolocation(&self) -> &GeoDefinitions {
        &self.config.geolocation
    }

    pub fn filter_defaults(&self) -> FilterDefaults {
        self.config.filter_defaults
    }

    pub fn handover(&self) -> HandoverSettings {
        self.config.handover
    }

    pub fn links(&self) -> &[CollectionLink] {
        &self.config.links
    }

    pub fn id_scope(&self, parameter: &str) -> Option<&str> {
        self.config.id_scopes.get(parameter).map(String::as_str)
    }

    /// Filter definition by name, falling back to a case-insensitive match.
    pub fn filter_definition(&self, name: &str) -> Option<&FilterDefinition> {
        self.config.filter_definitions.get(name).or_else(|| {
            self.config
                .filter_definitions
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
    }

    /// First filter definition whose pattern matches `term`.
    pub(crate) fn matching_filter_definition(&self, term: &str) -> Option<&CompiledFilterDefinition> {
        self.filters.iter().find(|f| f.regex.is_match(term))
    }

    pub(crate) fn geo_parameter(&self, name: &str) -> Option<&CompiledGeoParameter> {
        self.geo_parameters.get(name)
    }

    /// Replaces placeholder ids with the configured test document id.
    pub fn resolve_path_id<'a>(&'a self, id: &'a str) -> &'a str {
        if self.config.dummy_ids.iter().any(|d| d == id) {
            if let Some(test_id) = &self.config.test_document_id {
                return test_id;
            }
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let definitions = Definitions::new(EngineConfig::default()).unwrap();
        assert!(definitions.is_collection("biosamples"));
        assert_eq!(definitions.id_scope("biosample_ids"), Some("biosamples"));
        assert_eq!(
            definitions.handover().max_payload_bytes,
            DEFAULT_HANDOVER_MAX_BYTES
        );
    }

    #[test]
    fn invalid_filter_pattern_is_a_config_error() {
        let mut config = EngineConfig::default();
        config.filter_definitions.insert(
            "broken".to_string(),
            FilterDefinition {
                pattern: "^NCIT:(".to_string(),
                scope: "biosamples".to_string(),
                db_key: "histological_diagnosis.id".to_string(),
                collationed: true,
                namespace_prefix: None,
                name: None,
            },
        );
        let err = Definitions::new(config).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn geo_request_type_must_reference_known_parameters() {
        let mut config = EngineConfig::default();
        config.geolocation.request_types.push(GeoRequestTypeDefinition {
            name: "bogus".to_string(),
            kind: GeoRequestKind::City,
            all_of: vec!["nope".to_string()],
        });
        assert!(Definitions::new(config).is_err());
    }

    #[test]
    fn links_must_join_configured_collections() {
        let mut config = EngineConfig::default();
        config.links.push(CollectionLink {
            collection: "runs".to_string(),
            field: "analysis_id".to_string(),
            references: "analyses".to_string(),
        });
        let err = Definitions::new(config).unwrap_err();
        assert!(err.to_string().contains("runs"), "{err}");
    }

    #[test]
    fn dummy_path_ids_resolve_to_test_document() {
        let config = EngineConfig {
            test_document_id: Some("pgxbs-kftva5zv".to_string()),
            ..EngineConfig::default()
        };
        let definitions = Definitions::new(config).unwrap();
        assert_eq!(definitions.resolve_path_id("{id}"), "pgxbs-kftva5zv");
        assert_eq!(definitions.resolve_path_id("pgxbs-1"), "pgxbs-1");
    }

    #[test]
    fn variant_type_lookup_is_case_insensitive_fallback() {
        let variants = VariantDefinitions::default();
        assert!(variants.variant_type("DEL").unwrap().copy_number);
        assert!(variants.variant_type("del").is_some());
        assert!(variants.variant_type("INV").is_none());
    }

    #[test]
    fn first_matching_definition_follows_config_order() {
        let config: EngineConfig = serde_json::from_value(serde_json::json!({
            "filter_definitions": {
                "pubmed": {"pattern": "^PMID:\\d+$", "scope": "biosamples", "db_key": "references.pubmed.id"},
                "any_pmid": {"pattern": "^PMID:", "scope": "biosamples", "db_key": "references.id"}
            }
        }))
        .unwrap();
        let definitions = Definitions::new(config).unwrap();

        let matched = definitions.matching_filter_definition("PMID:22824167").unwrap();
        assert_eq!(matched.name, "pubmed");
        assert_eq!(
            definitions.matching_filter_definition("PMID:abc").unwrap().name,
            "any_pmid"
        );
    }

    #[test]
    fn deserializes_partial_config() {
        let config: EngineConfig = serde_json::from_value(serde_json::json!({
            "filter_defaults": {"logic": "OR"},
            "handover": {"max_payload_bytes": 1024}
        }))
        .unwrap();
        assert_eq!(config.filter_defaults.logic, Logic::Or);
        assert!(config.filter_defaults.include_descendant_terms);
        assert_eq!(config.handover.max_payload_bytes, 1024);
        assert!(config.collections.contains(&"variants".to_string()));
    }
}
