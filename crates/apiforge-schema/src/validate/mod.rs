//! Value validation against generated schemas.
//!
//! [`validate`] walks a decoded `serde_json::Value` and records every
//! violation it finds. Nothing short-circuits: a value with five independent
//! problems yields five [`ErrorDetail`]s, each carrying the full location.

mod formats;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::messages;
use crate::path_buffer::PathBuffer;
use crate::registry::Registry;
use crate::schema::{AdditionalProperties, InstanceType, Schema};

pub use formats::validate_format;

/// Direction of validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidateMode {
    /// Response output. Non-zero write-only properties are rejected.
    ReadFromServer,
    /// Request input. Missing read-only properties are not required.
    WriteToServer,
}

static STRICT_CASING: AtomicBool = AtomicBool::new(false);

/// Require exact property-name matches. Off by default, so `{"Foo": 1}`
/// satisfies a `foo` property.
pub fn set_strict_casing(strict: bool) {
    STRICT_CASING.store(strict, Ordering::Relaxed);
}

pub fn strict_casing() -> bool {
    STRICT_CASING.load(Ordering::Relaxed)
}

/// A single located error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Error message text.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Where the error occurred, e.g. `body.items[3].tags` or `path.thing-id`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location: String,
    /// The offending value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Status override requested by a resolver.
    #[serde(skip)]
    pub status: Option<u16>,
}

impl ErrorDetail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match &self.value {
            Some(Value::String(s)) => s.clone(),
            Some(v) => v.to_string(),
            None => String::new(),
        };
        write!(f, "{} ({}: {})", self.message, self.location, value)
    }
}

impl std::error::Error for ErrorDetail {}

/// Accumulated validation errors. Reusable after [`ValidateResult::reset`].
#[derive(Debug, Clone, Default)]
pub struct ValidateResult {
    pub errors: Vec<ErrorDetail>,
}

impl ValidateResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `message` at the current path.
    pub fn add(&mut self, path: &PathBuffer, value: &Value, message: impl Into<String>) {
        self.errors.push(ErrorDetail {
            message: message.into(),
            location: path.to_string(),
            value: Some(value.clone()),
            status: None,
        });
    }

    pub fn push(&mut self, detail: ErrorDetail) {
        self.errors.push(detail);
    }

    pub fn reset(&mut self) {
        self.errors.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }
}

/// Validate `value` against `schema`, appending violations to `res`.
///
/// ```rust
/// use apiforge_schema::{validate, PathBuffer, Registry, Schema, ValidateMode, ValidateResult};
/// use serde_json::json;
///
/// let schema: Schema = serde_json::from_value(json!({
///     "type": "object",
///     "properties": {"name": {"type": "string", "maxLength": 3}},
///     "required": ["name"]
/// })).unwrap();
///
/// let registry = Registry::new();
/// let mut path = PathBuffer::new();
/// let mut res = ValidateResult::new();
/// validate(&registry, &schema, &mut path, ValidateMode::WriteToServer, &json!({"name": "abcd"}), &mut res);
/// assert_eq!(res.errors[0].message, "expected length <= 3");
/// assert_eq!(res.errors[0].location, "name");
/// ```
pub fn validate(
    registry: &Registry,
    schema: &Schema,
    path: &mut PathBuffer,
    mode: ValidateMode,
    value: &Value,
    res: &mut ValidateResult,
) {
    let Some(s) = registry.resolve(schema) else {
        // Unknown refs (e.g. remote schemas) are not validated.
        return;
    };

    if !s.one_of.is_empty() {
        if s.discriminator.is_some() {
            validate_discriminator(registry, s, path, mode, value, res);
        } else {
            validate_one_of(registry, s, path, mode, value, res);
        }
    }

    if !s.any_of.is_empty() {
        let mut sub = ValidateResult::new();
        let mut matches = 0;
        for candidate in &s.any_of {
            validate(registry, candidate, path, mode, value, &mut sub);
            if sub.is_empty() {
                matches += 1;
            }
            sub.reset();
        }
        if matches == 0 {
            res.add(path, value, messages::EXPECTED_MATCH_AT_LEAST_ONE_SCHEMA);
        }
    }

    for sub in &s.all_of {
        validate(registry, sub, path, mode, value, res);
    }

    if let Some(not) = &s.not {
        let mut sub = ValidateResult::new();
        validate(registry, not, path, mode, value, &mut sub);
        if sub.is_empty() {
            res.add(path, value, messages::EXPECTED_NOT_MATCH_SCHEMA);
        }
    }

    if s.is_nullable() && value.is_null() {
        return;
    }

    let Some(ty) = effective_type(s, value) else {
        check_enum(s, path, value, res);
        return;
    };

    match ty {
        InstanceType::Null => {}
        InstanceType::Boolean => {
            if !value.is_boolean() {
                res.add(path, value, messages::EXPECTED_BOOLEAN);
                return;
            }
        }
        InstanceType::Integer | InstanceType::Number => {
            let Some(num) = value.as_f64() else {
                let msg = if ty == InstanceType::Integer {
                    messages::EXPECTED_INTEGER
                } else {
                    messages::EXPECTED_NUMBER
                };
                res.add(path, value, msg);
                return;
            };
            validate_number(s, ty, num, path, value, res);
        }
        InstanceType::String => {
            let Some(text) = value.as_str() else {
                res.add(path, value, messages::EXPECTED_STRING);
                return;
            };
            validate_string(s, text, path, value, res);
        }
        InstanceType::Array => {
            let Some(items) = value.as_array() else {
                res.add(path, value, messages::EXPECTED_ARRAY);
                return;
            };
            validate_array(registry, s, path, mode, value, items, res);
        }
        InstanceType::Object => {
            let Some(map) = value.as_object() else {
                res.add(path, value, messages::EXPECTED_OBJECT);
                return;
            };
            validate_object(registry, s, path, mode, value, map, res);
        }
    }

    check_enum(s, path, value, res);
}

/// The declared type to validate against. For type arrays the member that
/// matches the value wins, falling back to the first non-null type.
fn effective_type(s: &Schema, value: &Value) -> Option<InstanceType> {
    let t = s.schema_type.as_ref()?;
    let types = t.types();
    if types.len() <= 1 {
        return types.first().copied();
    }
    let actual = InstanceType::of(value);
    types
        .iter()
        .copied()
        .find(|t| t.accepts(actual))
        .or_else(|| types.first().copied())
}

fn check_enum(s: &Schema, path: &PathBuffer, value: &Value, res: &mut ValidateResult) {
    if !s.enum_values.is_empty() && !s.enum_values.iter().any(|e| json_equal(e, value)) {
        res.add(path, value, s.precomputed().msg_enum.clone());
    }
}

fn validate_one_of(
    registry: &Registry,
    s: &Schema,
    path: &mut PathBuffer,
    mode: ValidateMode,
    value: &Value,
    res: &mut ValidateResult,
) {
    let mut found = false;
    let mut sub = ValidateResult::new();
    for candidate in &s.one_of {
        validate(registry, candidate, path, mode, value, &mut sub);
        if sub.is_empty() {
            if found {
                res.add(path, value, messages::EXPECTED_MATCH_EXACTLY_ONE_SCHEMA_MULTIPLE);
            }
            found = true;
        }
        sub.reset();
    }
    if !found {
        res.add(path, value, messages::EXPECTED_MATCH_EXACTLY_ONE_SCHEMA);
    }
}

fn validate_discriminator(
    registry: &Registry,
    s: &Schema,
    path: &mut PathBuffer,
    mode: ValidateMode,
    value: &Value,
    res: &mut ValidateResult,
) {
    let Some(discriminator) = &s.discriminator else {
        return;
    };
    // Non-objects are reported by the type check.
    let Some(map) = value.as_object() else {
        return;
    };

    match map.get(&discriminator.property_name) {
        None => {
            path.push(&discriminator.property_name);
            res.add(path, value, messages::EXPECTED_PROPERTY_NAME_IN_OBJECT);
            path.pop();
        }
        Some(Value::String(key)) => {
            match discriminator
                .mapping
                .get(key)
                .and_then(|r| registry.schema_from_ref(r))
            {
                Some(target) => validate(registry, target, path, mode, value, res),
                None => validate_one_of(registry, s, path, mode, value, res),
            }
        }
        // Null or non-string tags are left to the property's own schema.
        Some(_) => {}
    }
}

fn validate_number(
    s: &Schema,
    ty: InstanceType,
    num: f64,
    path: &PathBuffer,
    value: &Value,
    res: &mut ValidateResult,
) {
    if ty == InstanceType::Integer && num.fract() != 0.0 {
        res.add(path, value, messages::EXPECTED_INTEGER);
    }

    let pre = s.precomputed();
    if matches!(s.minimum, Some(min) if num < min) {
        res.add(path, value, pre.msg_minimum.clone());
    }
    if matches!(s.exclusive_minimum, Some(min) if num <= min) {
        res.add(path, value, pre.msg_exclusive_minimum.clone());
    }
    if matches!(s.maximum, Some(max) if num > max) {
        res.add(path, value, pre.msg_maximum.clone());
    }
    if matches!(s.exclusive_maximum, Some(max) if num >= max) {
        res.add(path, value, pre.msg_exclusive_maximum.clone());
    }
    if let Some(m) = s.multiple_of {
        if m != 0.0 && (num % m) != 0.0 {
            res.add(path, value, pre.msg_multiple_of.clone());
        }
    }
}

fn validate_string(
    s: &Schema,
    text: &str,
    path: &PathBuffer,
    value: &Value,
    res: &mut ValidateResult,
) {
    let pre = s.precomputed();

    if s.min_length.is_some() || s.max_length.is_some() {
        let len = text.chars().count();
        if matches!(s.min_length, Some(min) if len < min) {
            res.add(path, value, pre.msg_min_length.clone());
        }
        if matches!(s.max_length, Some(max) if len > max) {
            res.add(path, value, pre.msg_max_length.clone());
        }
    }

    if let Some(re) = &pre.pattern {
        if !re.is_match(text) {
            res.add(path, value, pre.msg_pattern.clone());
        }
    }

    if let Some(format) = &s.format {
        validate_format(path, format, text, res);
    }

    if s.content_encoding.as_deref() == Some("base64") && !formats::is_base64(text) {
        res.add(path, value, messages::EXPECTED_BASE64_STRING);
    }
}

fn validate_array(
    registry: &Registry,
    s: &Schema,
    path: &mut PathBuffer,
    mode: ValidateMode,
    value: &Value,
    items: &[Value],
    res: &mut ValidateResult,
) {
    let pre = s.precomputed();
    if matches!(s.min_items, Some(min) if items.len() < min) {
        res.add(path, value, pre.msg_min_items.clone());
    }
    if matches!(s.max_items, Some(max) if items.len() > max) {
        res.add(path, value, pre.msg_max_items.clone());
    }

    if s.unique_items {
        for (i, item) in items.iter().enumerate() {
            if items[..i].iter().any(|prev| json_equal(prev, item)) {
                res.add(path, value, messages::EXPECTED_ARRAY_ITEMS_UNIQUE);
            }
        }
    }

    if let Some(item_schema) = &s.items {
        for (i, item) in items.iter().enumerate() {
            path.push_index(i);
            validate(registry, item_schema, path, mode, item, res);
            path.pop();
        }
    }
}

fn validate_object(
    registry: &Registry,
    s: &Schema,
    path: &mut PathBuffer,
    mode: ValidateMode,
    value: &Value,
    map: &Map<String, Value>,
    res: &mut ValidateResult,
) {
    let pre = s.precomputed();
    if matches!(s.min_properties, Some(min) if map.len() < min) {
        res.add(path, value, pre.msg_min_properties.clone());
    }
    if matches!(s.max_properties, Some(max) if map.len() > max) {
        res.add(path, value, pre.msg_max_properties.clone());
    }

    let strict = strict_casing();

    for (name, prop) in &s.properties {
        // Read/write-only flags sit next to the `$ref` for object properties.
        let read_only = prop.read_only;
        let write_only = prop.write_only;

        if mode == ValidateMode::ReadFromServer && write_only {
            if let Some(v) = map.get(name) {
                if !is_zero(v) {
                    res.add(path, v, messages::WRITE_ONLY_NON_ZERO);
                    continue;
                }
            }
        }

        let found = map.get_key_value(name.as_str()).or_else(|| {
            if strict {
                None
            } else {
                map.iter().find(|(k, _)| fold_eq(k, name))
            }
        });

        let Some((_, v)) = found else {
            if !pre.required.contains(name) {
                continue;
            }
            if (mode == ValidateMode::WriteToServer && read_only)
                || (mode == ValidateMode::ReadFromServer && write_only)
            {
                continue;
            }
            let msg = pre
                .msg_required
                .get(name)
                .cloned()
                .unwrap_or_else(|| messages::expected_required_property(name));
            res.add(path, value, msg);
            continue;
        };

        if v.is_null() && !pre.required.contains(name) {
            continue;
        }

        if !v.is_null() {
            if let Some(dependents) = s.dependent_required.get(name) {
                for dependent in dependents {
                    if map.get(dependent).map_or(true, Value::is_null) {
                        let msg = pre
                            .msg_dependent
                            .get(name)
                            .and_then(|m| m.get(dependent))
                            .cloned()
                            .unwrap_or_else(|| messages::expected_dependent_required(dependent, name));
                        res.add(path, value, msg);
                    }
                }
            }
        }

        path.push(name);
        validate(registry, prop, path, mode, v, res);
        path.pop();
    }

    match &s.additional_properties {
        Some(AdditionalProperties::Bool(false)) => {
            for key in map.keys() {
                if s.properties.contains_key(key) {
                    continue;
                }
                if !strict && s.properties.keys().any(|p| fold_eq(p, key)) {
                    continue;
                }
                path.push(key);
                res.add(path, value, messages::UNEXPECTED_PROPERTY);
                path.pop();
            }
        }
        Some(AdditionalProperties::Schema(addl)) => {
            for (key, v) in map {
                if s.properties.contains_key(key) {
                    continue;
                }
                path.push(key);
                validate(registry, addl, path, mode, v, res);
                path.pop();
            }
        }
        _ => {}
    }
}

/// Unicode case-insensitive comparison without allocating.
fn fold_eq(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// Rename object keys that match a declared property only up to case so they
/// carry the property's declared name, recursively. Run this before binding
/// a value that was validated without strict casing.
pub fn canonicalize_keys(registry: &Registry, schema: &Schema, value: &mut Value) {
    let Some(s) = registry.resolve(schema) else {
        return;
    };
    for sub in s.all_of.iter().chain(&s.one_of).chain(&s.any_of) {
        canonicalize_keys(registry, sub, value);
    }
    match value {
        Value::Object(map) => {
            for (name, prop) in &s.properties {
                if !map.contains_key(name) {
                    let folded = map.keys().find(|k| fold_eq(k, name)).cloned();
                    if let Some(v) = folded.and_then(|k| map.remove(&k)) {
                        map.insert(name.clone(), v);
                    }
                }
                if let Some(child) = map.get_mut(name) {
                    canonicalize_keys(registry, prop, child);
                }
            }
            if let Some(AdditionalProperties::Schema(extra)) = &s.additional_properties {
                for (key, child) in map.iter_mut() {
                    if !s.properties.contains_key(key) {
                        canonicalize_keys(registry, extra, child);
                    }
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = s.items.as_deref() {
                for item in items {
                    canonicalize_keys(registry, item_schema, item);
                }
            }
        }
        _ => {}
    }
}

/// JSON equality where numbers compare by value (`1 == 1.0`).
pub(crate) fn json_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| json_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map_or(false, |w| json_equal(v, w)))
        }
        _ => a == b,
    }
}

fn is_zero(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}
