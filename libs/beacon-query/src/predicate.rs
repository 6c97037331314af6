//! Store-neutral predicate trees
//!
//! A [`Predicate`] describes the selection for one collection scope. Stores
//! translate it into their own dialect; [`Predicate::to_document`] renders
//! the MongoDB-style query document used in response meta and logs, and
//! [`Predicate::matches`] evaluates it directly against a JSON document.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::cmp::Ordering;

/// Mean earth radius in meters, used for `NEAR` distances.
const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Boolean combination mode for predicates within one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    #[default]
    And,
    Or,
}

impl Logic {
    /// Lenient parse: anything mentioning `OR` selects OR, everything else AND.
    pub fn parse(value: &str) -> Self {
        if value.to_ascii_uppercase().contains("OR") {
            Self::Or
        } else {
            Self::And
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Comparison {
    fn operator(self) -> &'static str {
        match self {
            Self::Lt => "$lt",
            Self::Lte => "$lte",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Lt => ordering == Ordering::Less,
            Self::Lte => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Gte => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    /// Great-circle distance in meters (haversine).
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();
        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_METERS * a.sqrt().asin()
    }

    /// Reads a GeoJSON `Point` (`{"type": "Point", "coordinates": [lon, lat]}`).
    pub fn from_geojson(value: &JsonValue) -> Option<Self> {
        let coordinates = value.get("coordinates")?.as_array()?;
        let longitude = coordinates.first()?.as_f64()?;
        let latitude = coordinates.get(1)?.as_f64()?;
        Some(Self::new(longitude, latitude))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Predicate {
    Equals {
        field: String,
        value: JsonValue,
    },
    In {
        field: String,
        values: Vec<JsonValue>,
    },
    Compare {
        field: String,
        cmp: Comparison,
        value: JsonValue,
    },
    Regex {
        field: String,
        pattern: String,
        case_insensitive: bool,
    },
    Near {
        field: String,
        point: GeoPoint,
        max_distance: f64,
    },
    And {
        all: Vec<Predicate>,
    },
    Or {
        any: Vec<Predicate>,
    },
}

impl Predicate {
    pub fn equals(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn is_in<V: Into<JsonValue>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// EQUALS for a single value, IN for several.
    pub fn one_or_many<V: Into<JsonValue>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let field = field.into();
        let mut values: Vec<JsonValue> = values.into_iter().map(Into::into).collect();
        if values.len() == 1 {
            Self::Equals {
                field,
                value: values.remove(0),
            }
        } else {
            Self::In { field, values }
        }
    }

    pub fn compare(field: impl Into<String>, cmp: Comparison, value: impl Into<JsonValue>) -> Self {
        Self::Compare {
            field: field.into(),
            cmp,
            value: value.into(),
        }
    }

    pub fn regex(field: impl Into<String>, pattern: impl Into<String>, case_insensitive: bool) -> Self {
        Self::Regex {
            field: field.into(),
            pattern: pattern.into(),
            case_insensitive,
        }
    }

    pub fn near(field: impl Into<String>, point: GeoPoint, max_distance: f64) -> Self {
        Self::Near {
            field: field.into(),
            point,
            max_distance,
        }
    }

    pub fn and(all: Vec<Predicate>) -> Self {
        Self::And { all }
    }

    pub fn or(any: Vec<Predicate>) -> Self {
        Self::Or { any }
    }

    /// Wraps several predicates with `logic`; a single predicate is returned as is.
    pub fn group(logic: Logic, mut members: Vec<Predicate>) -> Self {
        if members.len() == 1 {
            return members.remove(0);
        }
        match logic {
            Logic::And => Self::and(members),
            Logic::Or => Self::or(members),
        }
    }

    /// Binary combination; `self` always stays the left operand.
    pub fn combine(self, other: Predicate, logic: Logic) -> Self {
        match logic {
            Logic::And => Self::and(vec![self, other]),
            Logic::Or => Self::or(vec![self, other]),
        }
    }

    /// True when the predicate cannot select anything meaningful and should
    /// be dropped instead of sent to the store.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::In { values, .. } => values.is_empty(),
            Self::And { all } => all.iter().all(Predicate::is_empty),
            Self::Or { any } => any.iter().all(Predicate::is_empty),
            _ => false,
        }
    }

    /// MongoDB-style query document.
    pub fn to_document(&self) -> JsonValue {
        match self {
            Self::Equals { field, value } => single(field, value.clone()),
            Self::In { field, values } => single(field, json!({ "$in": values })),
            Self::Compare { field, cmp, value } => {
                let mut inner = Map::new();
                inner.insert(cmp.operator().to_string(), value.clone());
                single(field, JsonValue::Object(inner))
            }
            Self::Regex {
                field,
                pattern,
                case_insensitive,
            } => {
                let options = if *case_insensitive { "i" } else { "" };
                single(field, json!({ "$regex": pattern, "$options": options }))
            }
            Self::Near {
                field,
                point,
                max_distance,
            } => single(
                field,
                json!({
                    "$near": {
                        "$geometry": {
                            "type": "Point",
                            "coordinates": [point.longitude, point.latitude]
                        },
                        "$maxDistance": max_distance
                    }
                }),
            ),
            Self::And { all } => {
                json!({ "$and": all.iter().map(Predicate::to_document).collect::<Vec<_>>() })
            }
            Self::Or { any } => {
                json!({ "$or": any.iter().map(Predicate::to_document).collect::<Vec<_>>() })
            }
        }
    }

    /// Evaluates the predicate against a document.
    ///
    /// Dotted field paths fan out over arrays, so a condition holds when any
    /// reachable value satisfies it.
    pub fn matches(&self, document: &JsonValue) -> bool {
        match self {
            Self::Equals { field, value } => {
                field_values(document, field).any(|v| json_eq(v, value))
            }
            Self::In { field, values } => {
                field_values(document, field).any(|v| values.iter().any(|c| json_eq(v, c)))
            }
            Self::Compare { field, cmp, value } => field_values(document, field)
                .any(|v| json_cmp(v, value).is_some_and(|ord| cmp.accepts(ord))),
            Self::Regex {
                field,
                pattern,
                case_insensitive,
            } => {
                let Ok(re) = RegexBuilder::new(pattern)
                    .case_insensitive(*case_insensitive)
                    .build()
                else {
                    return false;
                };
                field_values(document, field)
                    .filter_map(JsonValue::as_str)
                    .any(|s| re.is_match(s))
            }
            Self::Near {
                field,
                point,
                max_distance,
            } => lookup(document, field).into_iter().any(|v| {
                GeoPoint::from_geojson(v).is_some_and(|p| p.distance_to(point) <= *max_distance)
            }),
            Self::And { all } => all.iter().all(|p| p.matches(document)),
            Self::Or { any } => any.iter().any(|p| p.matches(document)),
        }
    }
}

fn single(field: &str, value: JsonValue) -> JsonValue {
    let mut map = Map::new();
    map.insert(field.to_string(), value);
    JsonValue::Object(map)
}

/// Values reachable at a dotted path, fanning out over intermediate arrays.
fn lookup<'a>(document: &'a JsonValue, path: &str) -> Vec<&'a JsonValue> {
    let mut current = vec![document];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value {
                JsonValue::Object(map) => {
                    if let Some(v) = map.get(segment) {
                        next.push(v);
                    }
                }
                JsonValue::Array(items) => {
                    for item in items {
                        if let Some(v) = item.get(segment) {
                            next.push(v);
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }
    current
}

/// Like [`lookup`], but a terminal array also yields its elements.
fn field_values<'a>(document: &'a JsonValue, path: &str) -> impl Iterator<Item = &'a JsonValue> {
    lookup(document, path).into_iter().flat_map(|v| {
        let elements: Vec<&JsonValue> = match v {
            JsonValue::Array(items) => items.iter().collect(),
            _ => Vec::new(),
        };
        std::iter::once(v).chain(elements)
    })
}

/// All values at a dotted path, with terminal arrays flattened.
pub(crate) fn values_at<'a>(document: &'a JsonValue, path: &str) -> Vec<&'a JsonValue> {
    field_values(document, path)
        .filter(|v| !v.is_array())
        .collect()
}

fn json_eq(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn json_cmp(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (JsonValue::String(x), JsonValue::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_or_many_picks_equals_for_single_value() {
        assert_eq!(
            Predicate::one_or_many("id", ["a"]),
            Predicate::equals("id", "a")
        );
        assert_eq!(
            Predicate::one_or_many("id", ["a", "b"]),
            Predicate::is_in("id", ["a", "b"])
        );
    }

    #[test]
    fn combine_keeps_left_operand_first() {
        let left = Predicate::equals("id", "x");
        let right = Predicate::is_in("_id", ["1", "2"]);
        let combined = left.clone().combine(right.clone(), Logic::And);
        assert_eq!(combined, Predicate::and(vec![left, right]));
    }

    #[test]
    fn empty_detection() {
        assert!(Predicate::is_in("id", Vec::<&str>::new()).is_empty());
        assert!(Predicate::and(vec![]).is_empty());
        assert!(!Predicate::equals("id", "x").is_empty());
        assert!(!Predicate::and(vec![
            Predicate::is_in("id", Vec::<&str>::new()),
            Predicate::equals("id", "x")
        ])
        .is_empty());
    }

    #[test]
    fn renders_mongo_style_document() {
        let p = Predicate::and(vec![
            Predicate::equals("location.sequence_id", "refseq:NC_000017.11"),
            Predicate::compare("location.start", Comparison::Lt, 7_687_490),
            Predicate::is_in("variant_state.id", ["EFO:0030067"]),
        ]);
        assert_eq!(
            p.to_document(),
            json!({"$and": [
                {"location.sequence_id": "refseq:NC_000017.11"},
                {"location.start": {"$lt": 7_687_490}},
                {"variant_state.id": {"$in": ["EFO:0030067"]}}
            ]})
        );
    }

    #[test]
    fn matches_fans_out_over_arrays() {
        let doc = json!({
            "histological_diagnosis": {"id": "NCIT:C3058"},
            "pathological_stage": [{"id": "NCIT:C27966"}, {"id": "NCIT:C27970"}],
            "external_references": ["PMID:123", "PMID:456"]
        });
        assert!(Predicate::equals("histological_diagnosis.id", "NCIT:C3058").matches(&doc));
        assert!(Predicate::equals("pathological_stage.id", "NCIT:C27970").matches(&doc));
        assert!(Predicate::is_in("external_references", ["PMID:456", "PMID:789"]).matches(&doc));
        assert!(!Predicate::equals("histological_diagnosis.id", "NCIT:C3222").matches(&doc));
    }

    #[test]
    fn compare_matches_numbers_across_representations() {
        let doc = json!({"location": {"start": 150, "end": 350.0}});
        assert!(Predicate::compare("location.start", Comparison::Gte, 100).matches(&doc));
        assert!(Predicate::compare("location.end", Comparison::Lte, 400).matches(&doc));
        assert!(!Predicate::compare("location.end", Comparison::Lt, 350).matches(&doc));
        assert!(!Predicate::compare("location.missing", Comparison::Gt, 0).matches(&doc));
    }

    #[test]
    fn regex_honors_case_flag() {
        let doc = json!({"geo_location": {"properties": {"city": "Zurich"}}});
        assert!(Predicate::regex("geo_location.properties.city", "^zur", true).matches(&doc));
        assert!(!Predicate::regex("geo_location.properties.city", "^zur", false).matches(&doc));
    }

    #[test]
    fn near_uses_great_circle_distance() {
        let doc = json!({"geo_location": {"geometry": {"type": "Point", "coordinates": [8.55, 47.37]}}});
        let bern = GeoPoint::new(7.44, 46.95);
        let p = Predicate::near("geo_location.geometry", bern, 150_000.0);
        assert!(p.matches(&doc));
        let p = Predicate::near("geo_location.geometry", bern, 50_000.0);
        assert!(!p.matches(&doc));
    }

    #[test]
    fn logic_parse_is_lenient() {
        assert_eq!(Logic::parse("OR"), Logic::Or);
        assert_eq!(Logic::parse("$or"), Logic::Or);
        assert_eq!(Logic::parse("and"), Logic::And);
        assert_eq!(Logic::parse(""), Logic::And);
    }
}
