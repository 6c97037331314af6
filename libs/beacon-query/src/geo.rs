//! Geolocation predicates

use crate::definitions::{Definitions, GeoRequestKind, GeoValueKind};
use crate::predicate::{GeoPoint, Predicate};
use std::collections::BTreeMap;

/// A geolocation request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoQuery {
    pub request_type: String,
    pub kind: GeoRequestKind,
    pub predicate: Predicate,
}

pub struct GeoQueryBuilder<'a> {
    definitions: &'a Definitions,
}

impl<'a> GeoQueryBuilder<'a> {
    pub fn new(definitions: &'a Definitions) -> Self {
        Self { definitions }
    }

    /// Target scope of geolocation predicates.
    pub fn scope(&self) -> &str {
        &self.definitions.geolocation().scope
    }

    /// Tries the configured request types in order and builds the first one
    /// whose parameters are all present (or defaulted) and valid.
    pub fn build(&self, parameters: &BTreeMap<String, String>) -> Option<GeoQuery> {
        let has_input = parameters.values().any(|v| !v.trim().is_empty());
        if !has_input {
            return None;
        }

        let geo = self.definitions.geolocation();
        for request_type in &geo.request_types {
            let Some(values) = self.collect(&request_type.all_of, parameters) else {
                continue;
            };
            if let Some(predicate) = self.predicate(request_type.kind, &values) {
                tracing::debug!(request_type = %request_type.name, "Geolocation request matched");
                return Some(GeoQuery {
                    request_type: request_type.name.clone(),
                    kind: request_type.kind,
                    predicate,
                });
            }
        }

        tracing::debug!("Geolocation parameters match no request type");
        None
    }

    /// Values for `required`, in order, or `None` if any is missing or invalid.
    fn collect(
        &self,
        required: &[String],
        parameters: &BTreeMap<String, String>,
    ) -> Option<Vec<GeoValue>> {
        required
            .iter()
            .map(|name| {
                let compiled = self.definitions.geo_parameter(name)?;
                let raw = parameters
                    .get(name)
                    .map(|v| v.trim())
                    .filter(|v| !v.is_empty())
                    .or(compiled.definition.default.as_deref())?;
                if !compiled.regex.is_match(raw) {
                    tracing::debug!(parameter = %name, value = %raw, "Invalid geolocation parameter");
                    return None;
                }
                match compiled.definition.kind {
                    GeoValueKind::Float => raw.parse::<f64>().ok().map(GeoValue::Float),
                    GeoValueKind::String => Some(GeoValue::Text(raw.to_string())),
                }
            })
            .collect()
    }

    fn predicate(&self, kind: GeoRequestKind, values: &[GeoValue]) -> Option<Predicate> {
        let root = &self.definitions.geolocation().geo_root;
        let field = |suffix: &str| {
            if root.is_empty() {
                suffix.to_string()
            } else {
                format!("{root}.{suffix}")
            }
        };

        match (kind, values) {
            (GeoRequestKind::City, [GeoValue::Text(city), ..]) => Some(Predicate::regex(
                field("properties.city"),
                format!("^{}", regex::escape(city)),
                true,
            )),
            (GeoRequestKind::Id, [GeoValue::Text(id), ..]) => {
                Some(Predicate::regex("id", id.as_str(), true))
            }
            (
                GeoRequestKind::Coordinates,
                [GeoValue::Float(longitude), GeoValue::Float(latitude), GeoValue::Float(distance), ..],
            ) => Some(Predicate::near(
                field("geometry"),
                GeoPoint::new(*longitude, *latitude),
                *distance,
            )),
            _ => {
                tracing::debug!(?kind, "Geolocation parameters have the wrong types");
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum GeoValue {
    Float(f64),
    Text(String),
}
