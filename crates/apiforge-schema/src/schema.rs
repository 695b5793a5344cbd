//! JSON Schema model aligned with OpenAPI 3.1 / Draft 2020-12.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::messages;

/// Primitive JSON Schema type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl InstanceType {
    /// The instance type a JSON value has. Integral numbers report `Integer`.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() || n.as_f64().map_or(false, |f| f.fract() == 0.0) {
                    Self::Integer
                } else {
                    Self::Number
                }
            }
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    /// Whether a value of type `actual` satisfies this type.
    pub fn accepts(self, actual: InstanceType) -> bool {
        self == actual || (self == Self::Number && actual == Self::Integer)
    }
}

/// A single type or a type array such as `["string", "null"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaType {
    Single(InstanceType),
    Multiple(Vec<InstanceType>),
}

impl SchemaType {
    /// First non-null type.
    pub fn primary(&self) -> Option<InstanceType> {
        match self {
            Self::Single(t) => Some(*t),
            Self::Multiple(ts) => ts.iter().copied().find(|t| *t != InstanceType::Null),
        }
    }

    pub fn is_nullable(&self) -> bool {
        match self {
            Self::Single(t) => *t == InstanceType::Null,
            Self::Multiple(ts) => ts.contains(&InstanceType::Null),
        }
    }

    /// The type with `null` added or removed.
    pub fn with_nullable(&self, nullable: bool) -> Self {
        let mut types: Vec<InstanceType> = match self {
            Self::Single(t) => vec![*t],
            Self::Multiple(ts) => ts.clone(),
        };
        types.retain(|t| *t != InstanceType::Null);
        if nullable {
            types.push(InstanceType::Null);
        }
        if types.len() == 1 {
            Self::Single(types[0])
        } else {
            Self::Multiple(types)
        }
    }

    /// Non-null member types.
    pub fn types(&self) -> Vec<InstanceType> {
        match self {
            Self::Single(t) => vec![*t],
            Self::Multiple(ts) => ts
                .iter()
                .copied()
                .filter(|t| *t != InstanceType::Null)
                .collect(),
        }
    }
}

impl From<InstanceType> for SchemaType {
    fn from(t: InstanceType) -> Self {
        Self::Single(t)
    }
}

/// `additionalProperties`: either a boolean or a schema for unknown keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AdditionalProperties {
    Bool(bool),
    Schema(Box<Schema>),
}

/// Discriminator for `oneOf` unions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discriminator {
    pub property_name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mapping: BTreeMap<String, String>,
}

/// Values derived from a schema once and reused by every validation run.
#[derive(Debug, Default)]
pub(crate) struct Precomputed {
    pub msg_enum: String,
    pub msg_minimum: String,
    pub msg_exclusive_minimum: String,
    pub msg_maximum: String,
    pub msg_exclusive_maximum: String,
    pub msg_multiple_of: String,
    pub msg_min_length: String,
    pub msg_max_length: String,
    pub msg_pattern: String,
    pub msg_min_items: String,
    pub msg_max_items: String,
    pub msg_min_properties: String,
    pub msg_max_properties: String,
    pub msg_required: BTreeMap<String, String>,
    pub msg_dependent: BTreeMap<String, BTreeMap<String, String>>,
    pub pattern: Option<Regex>,
    pub required: BTreeSet<String>,
}

impl Precomputed {
    fn compute(s: &Schema) -> Self {
        let mut p = Precomputed {
            msg_enum: messages::expected_one_of(&s.enum_values),
            ..Default::default()
        };
        if let Some(n) = s.minimum {
            p.msg_minimum = messages::expected_minimum_number(n);
        }
        if let Some(n) = s.exclusive_minimum {
            p.msg_exclusive_minimum = messages::expected_exclusive_minimum_number(n);
        }
        if let Some(n) = s.maximum {
            p.msg_maximum = messages::expected_maximum_number(n);
        }
        if let Some(n) = s.exclusive_maximum {
            p.msg_exclusive_maximum = messages::expected_exclusive_maximum_number(n);
        }
        if let Some(n) = s.multiple_of {
            p.msg_multiple_of = messages::expected_multiple_of(n);
        }
        if let Some(n) = s.min_length {
            p.msg_min_length = messages::expected_min_length(n);
        }
        if let Some(n) = s.max_length {
            p.msg_max_length = messages::expected_max_length(n);
        }
        if let Some(pattern) = &s.pattern {
            match Regex::new(pattern) {
                Ok(re) => p.pattern = Some(re),
                Err(err) => {
                    tracing::warn!(pattern = %pattern, error = %err, "ignoring invalid schema pattern");
                }
            }
            p.msg_pattern = match &s.pattern_description {
                Some(desc) => messages::expected_be_pattern(desc),
                None => messages::expected_match_pattern(pattern),
            };
        }
        if let Some(n) = s.min_items {
            p.msg_min_items = messages::expected_min_items(n);
        }
        if let Some(n) = s.max_items {
            p.msg_max_items = messages::expected_max_items(n);
        }
        if let Some(n) = s.min_properties {
            p.msg_min_properties = messages::expected_min_properties(n);
        }
        if let Some(n) = s.max_properties {
            p.msg_max_properties = messages::expected_max_properties(n);
        }
        for name in &s.required {
            p.msg_required
                .insert(name.clone(), messages::expected_required_property(name));
            p.required.insert(name.clone());
        }
        for (name, dependents) in &s.dependent_required {
            let entry = p.msg_dependent.entry(name.clone()).or_default();
            for dependent in dependents {
                entry.insert(
                    dependent.clone(),
                    messages::expected_dependent_required(dependent, name),
                );
            }
        }
        p
    }
}

/// Lazily computed validation data. Clones start empty so an edited copy
/// never reuses stale messages.
#[derive(Default)]
struct Cache(OnceLock<Precomputed>);

impl Clone for Cache {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0.get().is_some() { "Cache(ready)" } else { "Cache(empty)" })
    }
}

/// A JSON Schema node.
///
/// Nullability is a type array: `{"type": ["string", "null"]}`. Schemas are
/// plain data; validation messages and the compiled `pattern` are derived on
/// first use and cached for the lifetime of the node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(rename = "$ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<SchemaType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<AdditionalProperties>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pattern_properties: BTreeMap<String, Schema>,
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        serialize_with = "serialize_visible_properties"
    )]
    pub properties: BTreeMap<String, Schema>,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive_minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive_maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiple_of: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique_items: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependent_required: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_properties: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_properties: Option<usize>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub write_only: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deprecated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub one_of: Vec<Schema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any_of: Vec<Schema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all_of: Vec<Schema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<Schema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<Discriminator>,
    /// `x-` extensions, serialized inline.
    #[serde(flatten, default)]
    pub extensions: BTreeMap<String, Value>,

    #[serde(skip)]
    pub(crate) hidden: bool,
    #[serde(skip)]
    cache: Cache,
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn serialize_visible_properties<S: Serializer>(
    props: &BTreeMap<String, Schema>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(None)?;
    for (name, schema) in props.iter().filter(|(_, s)| !s.hidden) {
        map.serialize_entry(name, schema)?;
    }
    map.end()
}

impl Schema {
    /// A schema with just a type.
    pub fn new(t: InstanceType) -> Self {
        Self {
            schema_type: Some(SchemaType::Single(t)),
            ..Default::default()
        }
    }

    /// A `{"$ref": ...}` schema.
    pub fn reference(r: impl Into<String>) -> Self {
        Self {
            reference: Some(r.into()),
            ..Default::default()
        }
    }

    /// A string schema with a format.
    pub fn string_format(format: &str) -> Self {
        let mut s = Self::new(InstanceType::String);
        s.format = Some(format.to_string());
        s
    }

    /// The first non-null type, if any.
    pub fn primary_type(&self) -> Option<InstanceType> {
        self.schema_type.as_ref().and_then(SchemaType::primary)
    }

    pub fn is_type(&self, t: InstanceType) -> bool {
        self.primary_type() == Some(t)
    }

    pub fn is_nullable(&self) -> bool {
        self.schema_type.as_ref().map_or(false, SchemaType::is_nullable)
    }

    /// Add or remove `null` from the type array. Untyped schemas are left alone.
    pub fn set_nullable(&mut self, nullable: bool) {
        if let Some(t) = &self.schema_type {
            self.schema_type = Some(t.with_nullable(nullable));
            self.invalidate();
        }
    }

    /// Hidden properties are validated but left out of the document.
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    /// Whether `name` is listed in `required`.
    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }

    pub(crate) fn precomputed(&self) -> &Precomputed {
        self.cache.0.get_or_init(|| Precomputed::compute(self))
    }

    /// Compiled `pattern`, if it is valid.
    pub fn pattern_regex(&self) -> Option<&Regex> {
        self.precomputed().pattern.as_ref()
    }

    /// Force message and pattern computation for this node and every child.
    pub fn precompute_messages(&self) {
        self.precomputed();
        if let Some(items) = &self.items {
            items.precompute_messages();
        }
        if let Some(AdditionalProperties::Schema(addl)) = &self.additional_properties {
            addl.precompute_messages();
        }
        for prop in self.properties.values() {
            prop.precompute_messages();
        }
        for sub in self.one_of.iter().chain(&self.any_of).chain(&self.all_of) {
            sub.precompute_messages();
        }
        if let Some(not) = &self.not {
            not.precompute_messages();
        }
    }

    /// Drop cached messages after an in-place edit.
    pub fn invalidate(&mut self) {
        self.cache = Cache::default();
    }

    /// Remove duplicate `required` entries, keeping first occurrences.
    pub fn dedupe_required(&mut self) {
        let mut seen = BTreeSet::new();
        let before = self.required.len();
        self.required.retain(|r| seen.insert(r.clone()));
        if self.required.len() != before {
            self.invalidate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nullable_is_a_type_array() {
        let mut s = Schema::new(InstanceType::String);
        s.set_nullable(true);
        assert!(s.is_nullable());
        assert_eq!(s.primary_type(), Some(InstanceType::String));
        assert_eq!(
            serde_json::to_value(&s).unwrap(),
            json!({"type": ["string", "null"]})
        );

        s.set_nullable(false);
        assert_eq!(serde_json::to_value(&s).unwrap(), json!({"type": "string"}));
    }

    #[test]
    fn hidden_properties_are_not_serialized() {
        let mut s = Schema::new(InstanceType::Object);
        s.properties.insert("a".into(), Schema::new(InstanceType::String));
        let mut hidden = Schema::new(InstanceType::String);
        hidden.set_hidden(true);
        s.properties.insert("b".into(), hidden);

        let out = serde_json::to_value(&s).unwrap();
        assert_eq!(out, json!({"type": "object", "properties": {"a": {"type": "string"}}}));
    }

    #[test]
    fn extensions_are_inline() {
        let mut s = Schema::new(InstanceType::Integer);
        s.extensions.insert("x-internal".into(), json!(true));
        assert_eq!(
            serde_json::to_value(&s).unwrap(),
            json!({"type": "integer", "x-internal": true})
        );
    }

    #[test]
    fn deserializes_type_arrays_and_refs() {
        let s: Schema = serde_json::from_value(json!({
            "type": ["integer", "null"],
            "minimum": 1,
            "items": {"$ref": "#/components/schemas/Foo"}
        }))
        .unwrap();
        assert!(s.is_nullable());
        assert_eq!(s.minimum, Some(1.0));
        assert_eq!(
            s.items.as_ref().and_then(|i| i.reference.as_deref()),
            Some("#/components/schemas/Foo")
        );
    }

    #[test]
    fn precomputed_messages_follow_edits() {
        let mut s = Schema::new(InstanceType::String);
        s.max_length = Some(5);
        assert_eq!(s.precomputed().msg_max_length, "expected length <= 5");

        s.max_length = Some(3);
        s.invalidate();
        assert_eq!(s.precomputed().msg_max_length, "expected length <= 3");

        let copy = s.clone();
        assert_eq!(copy.precomputed().msg_max_length, "expected length <= 3");
    }

    #[test]
    fn pattern_description_wins() {
        let mut s = Schema::new(InstanceType::String);
        s.pattern = Some("^[a-z]+$".into());
        assert_eq!(
            s.precomputed().msg_pattern,
            "expected string to match pattern ^[a-z]+$"
        );

        s.pattern_description = Some("alphabetical".into());
        s.invalidate();
        assert_eq!(s.precomputed().msg_pattern, "expected string to be alphabetical");
        assert!(s.pattern_regex().is_some());
    }

    #[test]
    fn dedupe_required_keeps_order() {
        let mut s = Schema::new(InstanceType::Object);
        s.required = vec!["b".into(), "a".into(), "b".into()];
        s.dedupe_required();
        assert_eq!(s.required, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn integral_floats_are_integers() {
        assert_eq!(InstanceType::of(&json!(1.0)), InstanceType::Integer);
        assert_eq!(InstanceType::of(&json!(1.5)), InstanceType::Number);
        assert!(InstanceType::Number.accepts(InstanceType::Integer));
        assert!(!InstanceType::Integer.accepts(InstanceType::Number));
    }
}
