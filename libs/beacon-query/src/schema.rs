//! Response skeletons from declarative schemas
//!
//! Schema descriptions are parsed once into [`SchemaNode`] trees with
//! persisted (snake_case) keys. Instantiating a node yields an empty record
//! of the right shape for the response layer to fill in.

use crate::error::{Error, Result};
use heck::ToUpperCamelCase;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::path::Path;

/// Keys dropped while parsing.
const IGNORED_KEYS: &[&str] = &["format", "examples"];

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    Array,
    /// Typed object; properties are instantiated, absent properties give `{}`.
    Object(Vec<(String, SchemaNode)>),
    Integer,
    Number,
    Boolean,
    String,
    /// Node without `type`: a plain grouping of named children.
    Container(Vec<(String, SchemaNode)>),
    /// Non-object value inside a container, kept as is.
    Literal(JsonValue),
}

impl SchemaNode {
    pub fn parse(value: &JsonValue) -> Result<Self> {
        Self::parse_at(value, "")
    }

    fn parse_at(value: &JsonValue, path: &str) -> Result<Self> {
        let JsonValue::Object(map) = value else {
            return Err(Error::schema(path, "expected an object"));
        };

        let Some(kind) = map.get("type") else {
            return Ok(Self::Container(Self::children(map, path)?));
        };

        let kind = match kind {
            JsonValue::String(s) => s.as_str(),
            // `["string", "null"]` style unions: the first type decides.
            JsonValue::Array(types) => types
                .iter()
                .find_map(JsonValue::as_str)
                .ok_or_else(|| Error::schema(path, "type list contains no type name"))?,
            other => {
                return Err(Error::schema(
                    path,
                    format!("type must be a string, found {other}"),
                ))
            }
        };

        Ok(match kind {
            "array" | "list" => Self::Array,
            "object" => {
                let properties = match map.get("properties") {
                    None => Vec::new(),
                    Some(JsonValue::Object(props)) => {
                        let props_path = format!("{path}/properties");
                        props
                            .iter()
                            .filter(|(key, _)| !IGNORED_KEYS.contains(&key.as_str()))
                            .map(|(key, child)| {
                                let child = Self::parse_at(child, &format!("{props_path}/{key}"))?;
                                Ok((to_persisted_key(key), child))
                            })
                            .collect::<Result<Vec<_>>>()?
                    }
                    Some(_) => return Err(Error::schema(path, "properties must be an object")),
                };
                Self::Object(properties)
            }
            "integer" => Self::Integer,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            _ => Self::String,
        })
    }

    fn children(map: &Map<String, JsonValue>, path: &str) -> Result<Vec<(String, SchemaNode)>> {
        map.iter()
            .filter(|(key, _)| !IGNORED_KEYS.contains(&key.as_str()))
            .map(|(key, child)| {
                let node = if child.is_object() {
                    Self::parse_at(child, &format!("{path}/{key}"))?
                } else {
                    Self::Literal(child.clone())
                };
                Ok((to_persisted_key(key), node))
            })
            .collect()
    }

    /// Empty record with a zero value for every typed leaf.
    pub fn instantiate(&self) -> JsonValue {
        match self {
            Self::Array => JsonValue::Array(Vec::new()),
            Self::Object(children) | Self::Container(children) => JsonValue::Object(
                children
                    .iter()
                    .map(|(key, node)| (key.clone(), node.instantiate()))
                    .collect(),
            ),
            Self::Integer => JsonValue::from(0),
            Self::Number => JsonValue::from(0.0),
            Self::Boolean => JsonValue::Bool(false),
            Self::String => JsonValue::String(String::new()),
            Self::Literal(value) => value.clone(),
        }
    }
}

/// Named schemas, parsed at startup.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, SchemaNode>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `*.json` file in `dir`; the file stem is the schema name.
    /// Files starting with `_` are skipped.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut registry = Self::new();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| Error::config(format!("cannot read schema directory {}: {e}", dir.display())))?;

        for entry in entries {
            let path = entry
                .map_err(|e| Error::config(format!("cannot read schema directory entry: {e}")))?
                .path();
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if name.starts_with('_') || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let raw = std::fs::read_to_string(&path)
                .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
            let value: JsonValue = serde_json::from_str(&raw)?;
            registry.insert(name, &value).map_err(|e| match e {
                Error::Schema { path: at, message } => Error::Schema {
                    path: format!("{name}.json{at}"),
                    message,
                },
                other => other,
            })?;
            tracing::debug!(schema = %name, "Loaded schema");
        }

        Ok(registry)
    }

    pub fn insert(&mut self, name: &str, description: &JsonValue) -> Result<()> {
        let node = SchemaNode::parse(description)?;
        self.schemas.insert(name.to_string(), node);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&SchemaNode> {
        self.schemas.get(name)
    }

    pub fn instantiate(&self, name: &str) -> Result<JsonValue> {
        self.get(name)
            .map(SchemaNode::instantiate)
            .ok_or_else(|| Error::UnknownSchema(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

/// Persisted snake_case key to external camelCase.
///
/// `_x` folds to `X` unless it opens the key or follows another underscore.
/// Upper-case letters already present are escaped as `_X` so that
/// [`to_persisted_key`] can restore them.
pub fn to_external_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let mut out = String::with_capacity(key.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let folds = c == '_'
            && next.is_some_and(|n| n.is_ascii_lowercase())
            && out.chars().last().is_some_and(|prev| prev != '_');

        if folds {
            if let Some(n) = next {
                out.push(n.to_ascii_uppercase());
            }
            i += 2;
            continue;
        }
        if c.is_ascii_uppercase() {
            out.push('_');
        }
        out.push(c);
        i += 1;
    }

    out
}

/// External camelCase key to persisted snake_case; inverse of [`to_external_key`].
pub fn to_persisted_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let mut out = String::with_capacity(key.len() + 4);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match chars.get(i + 1) {
            Some(n) if c == '_' && n.is_ascii_uppercase() => {
                out.push(*n);
                i += 2;
            }
            _ if c.is_ascii_uppercase() => {
                out.push('_');
                out.push(c.to_ascii_lowercase());
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

/// snake_case to camelCase for output only; existing capitals are kept as they are.
///
/// Unlike [`to_external_key`] this is not reversible, which is what stored
/// record documents need: `NCIT` stays `NCIT`.
pub fn to_camel_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut chars = key.chars().peekable();
    while let Some(c) = chars.next() {
        let folds = c == '_'
            && chars.peek().is_some_and(|n| n.is_ascii_lowercase())
            && out.chars().last().is_some_and(|prev| prev != '_');
        if folds {
            if let Some(n) = chars.next() {
                out.push(n.to_ascii_uppercase());
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCase {
    /// Reversible camelCase, see [`to_external_key`].
    External,
    Persisted,
    /// Output-only camelCase, see [`to_camel_key`].
    Camel,
}

/// Recursively renames object keys.
pub fn convert_keys(value: JsonValue, case: KeyCase) -> JsonValue {
    match value {
        JsonValue::Object(map) => JsonValue::Object(
            map.into_iter()
                .map(|(key, v)| {
                    let key = match case {
                        KeyCase::External => to_external_key(&key),
                        KeyCase::Persisted => to_persisted_key(&key),
                        KeyCase::Camel => to_camel_key(&key),
                    };
                    (key, convert_keys(v, case))
                })
                .collect(),
        ),
        JsonValue::Array(items) => {
            JsonValue::Array(items.into_iter().map(|v| convert_keys(v, case)).collect())
        }
        other => other,
    }
}

/// `genomic_variations` -> `GenomicVariations`.
pub fn pascal_case(name: &str) -> String {
    name.to_upper_camel_case()
}
