//! Predicate rendering for the Postgres document table.
//!
//! Conditions on document fields become `jsonb_path_exists` calls. The
//! JSONPath text and its variables are bound parameters, and lax mode gives
//! the same array fan-out as [`Predicate::matches`]. The `_id` field maps
//! to the `id` column.

use beacon_query::{Comparison, Predicate};
use serde_json::{Map, Value as JsonValue};

use beacon_query::store::ID_FIELD;

/// Mean earth radius in meters, matching the engine's in-memory `NEAR`.
const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Bind values for `sqlx` queries.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Text(String),
    TextArray(Vec<String>),
}

pub(crate) fn push_text(bind_params: &mut Vec<BindValue>, value: String) -> usize {
    bind_params.push(BindValue::Text(value));
    bind_params.len()
}

pub(crate) fn push_text_array(bind_params: &mut Vec<BindValue>, value: Vec<String>) -> usize {
    bind_params.push(BindValue::TextArray(value));
    bind_params.len()
}

/// Renders `predicate` as a boolean SQL expression over `d.id` / `d.body`,
/// appending its parameters to `bind_params`.
pub fn render_predicate(predicate: &Predicate, bind_params: &mut Vec<BindValue>) -> String {
    match predicate {
        Predicate::Equals { field, value } if field == ID_FIELD => {
            let idx = push_text(bind_params, json_text(value));
            format!("d.id = ${idx}")
        }
        Predicate::In { field, values } if field == ID_FIELD => {
            let idx = push_text_array(bind_params, values.iter().map(json_text).collect());
            format!("d.id = ANY(${idx})")
        }
        Predicate::Regex {
            field,
            pattern,
            case_insensitive,
        } if field == ID_FIELD => {
            let idx = push_text(bind_params, pattern.clone());
            let op = if *case_insensitive { "~*" } else { "~" };
            format!("d.id {op} ${idx}")
        }
        Predicate::Equals { field, value } => {
            path_exists(bind_params, field, "@ == $v0", vars([value.clone()]))
        }
        Predicate::In { field, values } => {
            if values.is_empty() {
                return "FALSE".to_string();
            }
            let condition = (0..values.len())
                .map(|i| format!("@ == $v{i}"))
                .collect::<Vec<_>>()
                .join(" || ");
            path_exists(bind_params, field, &condition, vars(values.iter().cloned()))
        }
        Predicate::Compare { field, cmp, value } => {
            let condition = format!("@ {} $v0", comparison_operator(*cmp));
            path_exists(bind_params, field, &condition, vars([value.clone()]))
        }
        Predicate::Regex {
            field,
            pattern,
            case_insensitive,
        } => {
            // like_regex only accepts a literal pattern
            let flag = if *case_insensitive { " flag \"i\"" } else { "" };
            let condition = format!("@ like_regex {}{flag}", jsonpath_string(pattern));
            path_exists(bind_params, field, &condition, JsonValue::Object(Map::new()))
        }
        Predicate::Near {
            field,
            point,
            max_distance,
        } => {
            let mut coordinates: Vec<String> = field.split('.').map(str::to_string).collect();
            coordinates.push("coordinates".to_string());

            let mut lon_path = coordinates.clone();
            lon_path.push("0".to_string());
            let mut lat_path = coordinates;
            lat_path.push("1".to_string());

            let lon = push_text_array(bind_params, lon_path);
            let lat = push_text_array(bind_params, lat_path);
            let q_lon = push_text(bind_params, point.longitude.to_string());
            let q_lat = push_text(bind_params, point.latitude.to_string());
            let max = push_text(bind_params, max_distance.to_string());

            format!(
                "(2 * {EARTH_RADIUS_METERS} * asin(sqrt(\
                 power(sin(radians((d.body #>> ${lat})::float8 - ${q_lat}::float8) / 2), 2) + \
                 cos(radians(${q_lat}::float8)) * cos(radians((d.body #>> ${lat})::float8)) * \
                 power(sin(radians((d.body #>> ${lon})::float8 - ${q_lon}::float8) / 2), 2))) \
                 <= ${max}::float8)"
            )
        }
        Predicate::And { all } => join(all, " AND ", "TRUE", bind_params),
        Predicate::Or { any } => join(any, " OR ", "FALSE", bind_params),
    }
}

/// Lax JSONPath selecting every value reachable at a dotted field path,
/// with a trailing array flattened.
pub fn values_path(field: &str) -> String {
    format!("lax {}[*]", field_path(field))
}

fn join(
    members: &[Predicate],
    separator: &str,
    empty: &str,
    bind_params: &mut Vec<BindValue>,
) -> String {
    if members.is_empty() {
        return empty.to_string();
    }
    let parts: Vec<String> = members
        .iter()
        .map(|p| render_predicate(p, bind_params))
        .collect();
    format!("({})", parts.join(separator))
}

fn path_exists(
    bind_params: &mut Vec<BindValue>,
    field: &str,
    condition: &str,
    variables: JsonValue,
) -> String {
    let path = format!("lax {} ? ({condition})", field_path(field));
    let path_idx = push_text(bind_params, path);
    let vars_idx = push_text(bind_params, variables.to_string());
    format!("jsonb_path_exists(d.body, ${path_idx}::jsonpath, ${vars_idx}::jsonb)")
}

fn field_path(field: &str) -> String {
    let mut path = String::from("$");
    for segment in field.split('.') {
        path.push('.');
        path.push_str(&jsonpath_string(segment));
    }
    path
}

fn jsonpath_string(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

fn vars(values: impl IntoIterator<Item = JsonValue>) -> JsonValue {
    JsonValue::Object(
        values
            .into_iter()
            .enumerate()
            .map(|(i, v)| (format!("v{i}"), v))
            .collect(),
    )
}

fn comparison_operator(cmp: Comparison) -> &'static str {
    match cmp {
        Comparison::Lt => "<",
        Comparison::Lte => "<=",
        Comparison::Gt => ">",
        Comparison::Gte => ">=",
    }
}

fn json_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
