//! Schema derivation from type descriptors and field tags.

use std::collections::{BTreeMap, BTreeSet};

use heck::ToUpperCamelCase;
use serde_json::Value;

use crate::descriptor::{
    Composition, CompositionKind, FieldDescriptor, TypeDescriptor, TypeKind,
};
use crate::error::SchemaBuildError;
use crate::registry::Registry;
use crate::schema::{AdditionalProperties, Discriminator, InstanceType, Schema};

/// Which view of a type to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    /// Every field.
    #[default]
    All,
    /// Response view: write-only fields are omitted.
    Read,
    /// Request view: read-only fields are omitted.
    Write,
}

impl Mode {
    pub(crate) fn suffix(self) -> &'static str {
        match self {
            Mode::All => "",
            Mode::Read => "Read",
            Mode::Write => "Write",
        }
    }
}

type Result<T> = std::result::Result<T, SchemaBuildError>;

/// Build the schema for `desc` without consulting the registry for `desc`
/// itself. Nested named types are still registered and referenced.
pub fn schema_from_type(
    registry: &mut Registry,
    desc: &TypeDescriptor,
    mode: Mode,
    hint: &str,
) -> Result<Schema> {
    let mut s = match &desc.kind {
        TypeKind::Boolean => Schema::new(InstanceType::Boolean),
        TypeKind::Integer { format, unsigned, .. } => {
            let mut s = Schema::new(InstanceType::Integer);
            s.format = Some(format.to_string());
            if *unsigned {
                s.minimum = Some(0.0);
            }
            s
        }
        TypeKind::Number { format } => {
            let mut s = Schema::new(InstanceType::Number);
            s.format = Some(format.to_string());
            s
        }
        TypeKind::String => Schema::new(InstanceType::String),
        TypeKind::Bytes => {
            let mut s = Schema::new(InstanceType::String);
            s.content_encoding = Some("base64".to_string());
            s
        }
        TypeKind::DateTime => Schema::string_format("date-time"),
        TypeKind::Date => Schema::string_format("date"),
        TypeKind::Uri => Schema::string_format("uri"),
        TypeKind::Ipv4 => Schema::string_format("ipv4"),
        TypeKind::Ipv6 => Schema::string_format("ipv6"),
        TypeKind::Uuid => Schema::string_format("uuid"),
        TypeKind::Any => Schema::default(),
        TypeKind::Optional(inner) => registry.schema_with_mode(&inner(), mode, true, hint)?,
        TypeKind::Array { items, unique, len } => {
            let mut s = Schema::new(InstanceType::Array);
            let item_hint = format!("{}Item", hint);
            s.items = Some(Box::new(registry.schema_with_mode(
                &items(),
                mode,
                true,
                &item_hint,
            )?));
            s.unique_items = *unique;
            s.min_items = *len;
            s.max_items = *len;
            s
        }
        TypeKind::Map { key, value } => {
            let key_desc = key().inner();
            if !matches!(
                key_desc.kind,
                TypeKind::String | TypeKind::StringEnum(_) | TypeKind::Uuid | TypeKind::Integer { .. }
            ) {
                return Err(SchemaBuildError::Unsupported {
                    type_name: desc.name.to_string(),
                    path: hint.to_string(),
                });
            }
            let mut s = Schema::new(InstanceType::Object);
            let value_hint = format!("{}Value", hint);
            let vs = registry.schema_with_mode(&value(), mode, true, &value_hint)?;
            s.additional_properties = Some(AdditionalProperties::Schema(Box::new(vs)));
            s
        }
        TypeKind::Object(fields) => object_schema(registry, desc, fields, mode, hint)?,
        TypeKind::StringEnum(values) => {
            let mut s = Schema::new(InstanceType::String);
            s.enum_values = values.iter().map(|v| Value::String(v.to_string())).collect();
            s
        }
        TypeKind::TaggedUnion { tag, variants } => {
            tagged_union_schema(registry, tag, variants, mode, hint)?
        }
        TypeKind::Custom(f) => f(registry),
    };

    if let Some(transform) = desc.transform {
        s = transform(registry, s);
    }
    if let Some(pattern) = &s.pattern {
        if let Err(err) = regex::Regex::new(pattern) {
            return Err(SchemaBuildError::invalid_tag(&desc.name, "pattern", pattern, err));
        }
    }
    s.dedupe_required();
    s.invalidate();
    Ok(s)
}

fn object_schema(
    registry: &mut Registry,
    desc: &TypeDescriptor,
    fields: &[FieldDescriptor],
    mode: Mode,
    parent: &str,
) -> Result<Schema> {
    let mut s = Schema::new(InstanceType::Object);
    let wire_names: BTreeSet<&str> = fields.iter().map(FieldDescriptor::wire_name).collect();
    let mut dependent: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for field in fields {
        let name = field.wire_name();
        let read_only = bool_tag(field, "readOnly")?.unwrap_or(false);
        let write_only = bool_tag(field, "writeOnly")?.unwrap_or(false);
        match mode {
            Mode::Read if write_only => continue,
            Mode::Write if read_only => continue,
            _ => {}
        }

        let fd = (field.ty)();
        let hint = format!("{}{}", parent, field.ident.to_upper_camel_case());
        let fs = schema_from_field(registry, field, &fd, mode, &hint)?;

        let required = match bool_tag(field, "required")? {
            Some(explicit) => explicit,
            None => !fd.is_optional() && !field.is_omitempty() && !fs.is_hidden(),
        };

        if let Some(dr) = field.tags.get("dependentRequired") {
            let deps: Vec<String> = dr
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .collect();
            if !deps.is_empty() {
                dependent.insert(name.to_string(), deps);
            }
        }

        if required {
            s.required.push(name.to_string());
        }
        s.properties.insert(name.to_string(), fs);
    }

    for (field, deps) in &dependent {
        for dep in deps {
            if !wire_names.contains(dep.as_str()) {
                return Err(SchemaBuildError::UnknownDependency {
                    field: field.clone(),
                    dependent: dep.clone(),
                });
            }
        }
    }
    // Dependents filtered out of this view are dropped.
    for deps in dependent.values_mut() {
        deps.retain(|d| s.properties.contains_key(d));
    }
    dependent.retain(|k, v| s.properties.contains_key(k) && !v.is_empty());
    s.dependent_required = dependent;

    let additional = match desc.tags.get("additionalProperties") {
        Some(v) => parse_bool(desc.name.as_ref(), "additionalProperties", v)?,
        None => false,
    };
    s.additional_properties = Some(AdditionalProperties::Bool(additional));

    if let Some(v) = desc.tags.get("nullable") {
        if parse_bool(desc.name.as_ref(), "nullable", v)? {
            s.set_nullable(true);
        }
    }
    if let Some(doc) = desc.tags.get("doc").or_else(|| desc.tags.get("description")) {
        s.description = Some(doc.to_string());
    }

    Ok(s)
}

fn tagged_union_schema(
    registry: &mut Registry,
    tag: &str,
    variants: &[(&'static str, fn() -> TypeDescriptor)],
    mode: Mode,
    hint: &str,
) -> Result<Schema> {
    let mut s = Schema::default();
    let mut mapping = BTreeMap::new();

    for (value, describe) in variants {
        let variant_hint = format!("{}{}", hint, value.to_upper_camel_case());
        let mut vs = registry.schema_with_mode(&describe(), mode, true, &variant_hint)?;
        match vs.reference.clone() {
            Some(r) => {
                if let Some(target) = registry.schema_from_ref_mut(&r) {
                    add_tag_property(target, tag, value);
                }
                mapping.insert(value.to_string(), r);
            }
            None => add_tag_property(&mut vs, tag, value),
        }
        s.one_of.push(vs);
    }

    s.discriminator = Some(Discriminator {
        property_name: tag.to_string(),
        mapping,
    });
    Ok(s)
}

/// Document the discriminator property on a variant as a required
/// single-value enum.
fn add_tag_property(target: &mut Schema, tag: &str, value: &str) {
    if !target.is_type(InstanceType::Object) {
        return;
    }
    let prop = target.properties.entry(tag.to_string()).or_insert_with(|| {
        let mut p = Schema::new(InstanceType::String);
        p.description = Some("Discriminator value".to_string());
        p
    });
    let v = Value::String(value.to_string());
    if !prop.enum_values.contains(&v) {
        prop.enum_values.push(v);
    }
    prop.invalidate();
    if !target.is_required(tag) {
        target.required.push(tag.to_string());
    }
    target.invalidate();
}

fn composition_schema(
    registry: &mut Registry,
    composition: &Composition,
    mode: Mode,
    hint: &str,
) -> Result<Schema> {
    let mut members = Vec::with_capacity(composition.members.len());
    let mut mapping = BTreeMap::new();
    for (i, describe) in composition.members.iter().enumerate() {
        let md = describe();
        let member_hint = format!("{}{}", hint, i);
        let ms = registry.schema_with_mode(&md, mode, true, &member_hint)?;
        if let Some(r) = &ms.reference {
            mapping.insert(registry.name_for(&md, &member_hint), r.clone());
        }
        members.push(ms);
    }

    let mut s = Schema::default();
    match composition.kind {
        CompositionKind::OneOf => s.one_of = members,
        CompositionKind::AnyOf => s.any_of = members,
        CompositionKind::AllOf => s.all_of = members,
        CompositionKind::Not => s.not = members.into_iter().next().map(Box::new),
    }
    if let (CompositionKind::OneOf, Some(prop)) = (composition.kind, composition.discriminator) {
        s.discriminator = Some(Discriminator {
            property_name: prop.to_string(),
            mapping,
        });
    }
    Ok(s)
}

/// Schema for a struct field: the field type's schema with its tags applied.
///
/// Also used for operation parameters.
pub fn schema_from_field(
    registry: &mut Registry,
    field: &FieldDescriptor,
    fd: &TypeDescriptor,
    mode: Mode,
    hint: &str,
) -> Result<Schema> {
    let mut fs = match &field.composition {
        Some(c) => composition_schema(registry, c, mode, hint)?,
        None => registry.schema_with_mode(fd, mode, true, hint)?,
    };
    let tags = field.tags;
    let name = field.ident;

    if let Some(doc) = tags.get("doc").or_else(|| tags.get("description")) {
        fs.description = Some(doc.to_string());
    }
    if fs.format.as_deref() == Some("date-time") && tags.has("header") {
        // Headers carry HTTP dates unless told otherwise below.
        fs.format = Some("date-time-http".to_string());
    }
    if let Some(f) = tags.get("format") {
        fs.format = Some(f.to_string());
    }
    if let Some(tf) = tags.get("timeFormat") {
        fs.format = Some(
            match tf {
                "2006-01-02" | "%Y-%m-%d" => "date",
                "15:04:05" | "%H:%M:%S" => "time",
                other => other,
            }
            .to_string(),
        );
    }
    if let Some(enc) = tags.get("encoding").or_else(|| tags.get("contentEncoding")) {
        fs.content_encoding = Some(enc.to_string());
    }
    if let Some(raw) = tags.get("default") {
        if let Some(v) = json_tag_value(registry, name, "default", &fs, raw)? {
            fs.default = Some(v);
        }
    }
    if let Some(raw) = tags.get("example") {
        if let Some(v) = json_tag_value(registry, name, "example", &fs, raw)? {
            fs.examples = vec![v];
        }
    }
    if let Some(raw) = tags.get("enum") {
        let is_array = registry
            .resolve(&fs)
            .map_or(false, |t| t.is_type(InstanceType::Array));
        let target = if is_array {
            fs.items.as_deref().cloned().unwrap_or_default()
        } else {
            fs.clone()
        };
        let mut values = Vec::new();
        for part in raw.split(',') {
            if let Some(v) = json_tag_value(registry, name, "enum", &target, part.trim())? {
                values.push(v);
            }
        }
        match fs.items.as_mut() {
            Some(items) if is_array => {
                items.enum_values = values;
                items.invalidate();
            }
            _ => fs.enum_values = values,
        }
    }

    if let Some(nullable) = bool_tag(field, "nullable")? {
        if nullable {
            if let Some(r) = &fs.reference {
                if registry
                    .schema_from_ref(r)
                    .map_or(false, |t| t.is_type(InstanceType::Object))
                {
                    return Err(SchemaBuildError::invalid_tag(
                        name,
                        "nullable",
                        "true",
                        format!("nullable is not supported for object reference '{}'", r),
                    ));
                }
            }
        }
        fs.set_nullable(nullable);
    }

    if let Some(v) = f64_tag(field, "minimum")? {
        fs.minimum = Some(v);
    }
    if let Some(v) = f64_tag(field, "exclusiveMinimum")? {
        fs.exclusive_minimum = Some(v);
    }
    if let Some(v) = f64_tag(field, "maximum")? {
        fs.maximum = Some(v);
    }
    if let Some(v) = f64_tag(field, "exclusiveMaximum")? {
        fs.exclusive_maximum = Some(v);
    }
    if let Some(v) = f64_tag(field, "multipleOf")? {
        fs.multiple_of = Some(v);
    }
    if let Some(v) = usize_tag(field, "minLength")? {
        fs.min_length = Some(v);
    }
    if let Some(v) = usize_tag(field, "maxLength")? {
        fs.max_length = Some(v);
    }
    if let Some(p) = tags.get("pattern") {
        if let Err(err) = regex::Regex::new(p) {
            return Err(SchemaBuildError::invalid_tag(name, "pattern", p, err));
        }
        fs.pattern = Some(p.to_string());
    }
    if let Some(p) = tags.get("patternDescription") {
        fs.pattern_description = Some(p.to_string());
    }
    if let Some(v) = usize_tag(field, "minItems")? {
        fs.min_items = Some(v);
    }
    if let Some(v) = usize_tag(field, "maxItems")? {
        fs.max_items = Some(v);
    }
    if let Some(v) = bool_tag(field, "uniqueItems")? {
        fs.unique_items = v;
    }
    if let Some(v) = usize_tag(field, "minProperties")? {
        fs.min_properties = Some(v);
    }
    if let Some(v) = usize_tag(field, "maxProperties")? {
        fs.max_properties = Some(v);
    }
    if let Some(v) = bool_tag(field, "readOnly")? {
        fs.read_only = v;
    }
    if let Some(v) = bool_tag(field, "writeOnly")? {
        fs.write_only = v;
    }
    if let Some(v) = bool_tag(field, "deprecated")? {
        fs.deprecated = v;
    }
    if let Some(raw) = tags.get("extensions") {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => fs.extensions.extend(map),
            Ok(_) => {
                return Err(SchemaBuildError::invalid_tag(
                    name,
                    "extensions",
                    raw,
                    "expected a JSON object",
                ))
            }
            Err(err) => return Err(SchemaBuildError::invalid_tag(name, "extensions", raw, err)),
        }
    }
    if let Some(v) = bool_tag(field, "hidden")? {
        fs.set_hidden(v);
    }

    fs.invalidate();
    Ok(fs)
}

/// Parse a `default` / `example` / `enum` tag value against the field schema.
///
/// Strings are taken verbatim; string arrays accept a bare comma-separated
/// list. Everything else is JSON.
fn json_tag_value(
    registry: &Registry,
    field: &str,
    tag: &str,
    schema: &Schema,
    raw: &str,
) -> Result<Option<Value>> {
    let Some(target) = registry.resolve(schema) else {
        return Ok(None);
    };

    if target.is_type(InstanceType::String) {
        return Ok(Some(Value::String(raw.to_string())));
    }

    if target.is_type(InstanceType::Array) && !raw.starts_with('[') {
        let items_are_strings = target
            .items
            .as_deref()
            .and_then(|i| registry.resolve(i))
            .map_or(false, |i| i.is_type(InstanceType::String));
        if items_are_strings {
            return Ok(Some(Value::Array(
                raw.split(',')
                    .map(|s| Value::String(s.trim().to_string()))
                    .collect(),
            )));
        }
    }

    let v: Value = serde_json::from_str(raw)
        .map_err(|err| SchemaBuildError::invalid_tag(field, tag, raw, err))?;
    ensure_type(registry, field, tag, raw, target, &v)?;
    Ok(Some(v))
}

fn ensure_type(
    registry: &Registry,
    field: &str,
    tag: &str,
    raw: &str,
    schema: &Schema,
    v: &Value,
) -> Result<()> {
    let Some(s) = registry.resolve(schema) else {
        return Ok(());
    };
    if v.is_null() && s.is_nullable() {
        return Ok(());
    }
    let mismatch = |expected: &str| SchemaBuildError::invalid_tag(field, tag, raw, format!("expected {}", expected));

    match s.primary_type() {
        Some(InstanceType::Boolean) if !v.is_boolean() => Err(mismatch("boolean")),
        Some(InstanceType::Number) if !v.is_number() => Err(mismatch("number")),
        Some(InstanceType::Integer) => match v.as_f64() {
            Some(n) if n.fract() == 0.0 => Ok(()),
            _ => Err(mismatch("integer")),
        },
        Some(InstanceType::String) if !v.is_string() => Err(mismatch("string")),
        Some(InstanceType::Array) => {
            let Some(arr) = v.as_array() else {
                return Err(mismatch("array"));
            };
            if let Some(items) = &s.items {
                for (i, item) in arr.iter().enumerate() {
                    let path = format!("{}[{}]", field, i);
                    ensure_type(registry, &path, tag, &item.to_string(), items, item)?;
                }
            }
            Ok(())
        }
        Some(InstanceType::Object) => {
            let Some(map) = v.as_object() else {
                return Err(mismatch("object"));
            };
            for (name, prop) in &s.properties {
                if let Some(val) = map.get(name) {
                    let path = format!("{}.{}", field, name);
                    ensure_type(registry, &path, tag, &val.to_string(), prop, val)?;
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn parse_bool(field: &str, tag: &str, raw: &str) -> Result<bool> {
    match raw {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(SchemaBuildError::invalid_tag(field, tag, raw, "expected true or false")),
    }
}

fn bool_tag(field: &FieldDescriptor, tag: &str) -> Result<Option<bool>> {
    field
        .tags
        .get(tag)
        .map(|raw| parse_bool(field.ident, tag, raw))
        .transpose()
}

fn f64_tag(field: &FieldDescriptor, tag: &str) -> Result<Option<f64>> {
    field
        .tags
        .get(tag)
        .map(|raw| {
            raw.trim()
                .parse::<f64>()
                .map_err(|err| SchemaBuildError::invalid_tag(field.ident, tag, raw, err))
        })
        .transpose()
}

fn usize_tag(field: &FieldDescriptor, tag: &str) -> Result<Option<usize>> {
    field
        .tags
        .get(tag)
        .map(|raw| {
            raw.trim()
                .parse::<usize>()
                .map_err(|err| SchemaBuildError::invalid_tag(field.ident, tag, raw, err))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Base64Bytes, Describe, Tags};
    use proptest::prelude::*;
    use serde_json::json;

    fn object(fields: Vec<FieldDescriptor>) -> TypeDescriptor {
        TypeDescriptor::new::<()>(TypeKind::Object(fields)).named("Sample")
    }

    fn build(desc: &TypeDescriptor, mode: Mode) -> Result<Schema> {
        let mut r = Registry::new();
        schema_from_type(&mut r, desc, mode, "Sample")
    }

    #[test]
    fn scalar_shapes() {
        let mut r = Registry::new();
        let v = serde_json::to_value(r.schema_for::<u8>().unwrap()).unwrap();
        assert_eq!(v, json!({"type": "integer", "format": "int32", "minimum": 0.0}));

        let v = serde_json::to_value(r.schema_for::<f32>().unwrap()).unwrap();
        assert_eq!(v, json!({"type": "number", "format": "float"}));

        let v = serde_json::to_value(r.schema_for::<Base64Bytes>().unwrap()).unwrap();
        assert_eq!(v, json!({"type": "string", "contentEncoding": "base64"}));

        let v = serde_json::to_value(r.schema_for::<[i64; 2]>().unwrap()).unwrap();
        assert_eq!(
            v,
            json!({"type": "array", "items": {"type": "integer", "format": "int64"}, "minItems": 2, "maxItems": 2})
        );

        let v = serde_json::to_value(r.schema_for::<std::collections::HashMap<String, bool>>().unwrap())
            .unwrap();
        assert_eq!(v, json!({"type": "object", "additionalProperties": {"type": "boolean"}}));

        let v = serde_json::to_value(r.schema_for::<serde_json::Value>().unwrap()).unwrap();
        assert_eq!(v, json!({}));
    }

    #[test]
    fn required_rules() {
        let desc = object(vec![
            FieldDescriptor::new("a", "a", String::describe),
            FieldDescriptor::new("b", "b", <Option<String>>::describe),
            FieldDescriptor::new("c", "c", String::describe).with_tags(Tags(&[("json", "c,omitempty")])),
            FieldDescriptor::new("d", "d", String::describe).with_tags(Tags(&[("hidden", "true")])),
            FieldDescriptor::new("e", "e", String::describe).with_tags(Tags(&[("required", "false")])),
            FieldDescriptor::new("f", "f", <Option<String>>::describe)
                .with_tags(Tags(&[("required", "true")])),
        ]);
        let s = build(&desc, Mode::All).unwrap();
        assert_eq!(s.required, vec!["a".to_string(), "f".to_string()]);
        assert!(matches!(s.additional_properties, Some(AdditionalProperties::Bool(false))));

        let v = serde_json::to_value(&s).unwrap();
        assert!(v["properties"].get("d").is_none());
        assert!(s.properties.contains_key("d"));
    }

    #[test]
    fn tags_are_applied() {
        let desc = object(vec![
            FieldDescriptor::new("name", "name", String::describe).with_tags(Tags(&[
                ("doc", "Your name"),
                ("maxLength", "5"),
                ("pattern", "^[a-z]+$"),
                ("default", "bob"),
            ])),
            FieldDescriptor::new("count", "count", i64::describe).with_tags(Tags(&[
                ("minimum", "1"),
                ("exclusiveMaximum", "10"),
                ("default", "3"),
                ("example", "4"),
            ])),
            FieldDescriptor::new("color", "color", String::describe)
                .with_tags(Tags(&[("enum", "red, green")])),
            FieldDescriptor::new("tags", "tags", <Vec<String>>::describe)
                .with_tags(Tags(&[("enum", "a,b"), ("default", "a,b"), ("uniqueItems", "true")])),
            FieldDescriptor::new("note", "note", String::describe)
                .with_tags(Tags(&[("nullable", "true"), ("deprecated", "true")])),
        ]);
        let v = serde_json::to_value(build(&desc, Mode::All).unwrap()).unwrap();
        let props = &v["properties"];
        assert_eq!(
            props["name"],
            json!({"type": "string", "description": "Your name", "maxLength": 5, "pattern": "^[a-z]+$", "default": "bob"})
        );
        assert_eq!(props["count"]["minimum"], json!(1.0));
        assert_eq!(props["count"]["exclusiveMaximum"], json!(10.0));
        assert_eq!(props["count"]["default"], json!(3));
        assert_eq!(props["count"]["examples"], json!([4]));
        assert_eq!(props["color"]["enum"], json!(["red", "green"]));
        assert_eq!(props["tags"]["items"]["enum"], json!(["a", "b"]));
        assert_eq!(props["tags"]["default"], json!(["a", "b"]));
        assert_eq!(props["tags"]["uniqueItems"], json!(true));
        assert_eq!(props["note"]["type"], json!(["string", "null"]));
        assert_eq!(props["note"]["deprecated"], json!(true));
    }

    #[test]
    fn header_date_times_use_http_format() {
        let desc = object(vec![FieldDescriptor::new(
            "last_modified",
            "Last-Modified",
            chrono::DateTime::<chrono::Utc>::describe,
        )
        .with_tags(Tags(&[("header", "Last-Modified")]))]);
        let s = build(&desc, Mode::All).unwrap();
        assert_eq!(
            s.properties["Last-Modified"].format.as_deref(),
            Some("date-time-http")
        );
    }

    #[test]
    fn bad_tag_values_fail() {
        let desc = object(vec![FieldDescriptor::new("n", "n", i32::describe)
            .with_tags(Tags(&[("default", "1.5")]))]);
        assert!(matches!(
            build(&desc, Mode::All),
            Err(SchemaBuildError::InvalidTag { ref tag, .. }) if tag == "default"
        ));

        let desc = object(vec![FieldDescriptor::new("n", "n", i32::describe)
            .with_tags(Tags(&[("minimum", "abc")]))]);
        assert!(matches!(build(&desc, Mode::All), Err(SchemaBuildError::InvalidTag { .. })));

        let desc = object(vec![FieldDescriptor::new("n", "n", String::describe)
            .with_tags(Tags(&[("readOnly", "yes")]))]);
        assert!(matches!(build(&desc, Mode::All), Err(SchemaBuildError::InvalidTag { .. })));

        let desc = object(vec![FieldDescriptor::new("n", "n", String::describe)
            .with_tags(Tags(&[("pattern", "^[a-z")]))]);
        assert!(matches!(
            build(&desc, Mode::All),
            Err(SchemaBuildError::InvalidTag { ref tag, ref value, .. }) if tag == "pattern" && value == "^[a-z"
        ));

        let desc = object(vec![FieldDescriptor::new("a", "a", String::describe)])
            .with_transform(broken_pattern_transform);
        assert!(matches!(
            build(&desc, Mode::All),
            Err(SchemaBuildError::InvalidTag { ref tag, .. }) if tag == "pattern"
        ));
    }

    fn broken_pattern_transform(_: &Registry, mut s: Schema) -> Schema {
        s.pattern = Some("(unclosed".to_string());
        s
    }

    #[test]
    fn dependent_required_targets_must_exist() {
        let desc = object(vec![
            FieldDescriptor::new("a", "a", String::describe)
                .with_tags(Tags(&[("dependentRequired", "b, c")])),
            FieldDescriptor::new("b", "b", String::describe),
        ]);
        assert_eq!(
            build(&desc, Mode::All).unwrap_err(),
            SchemaBuildError::UnknownDependency {
                field: "a".into(),
                dependent: "c".into()
            }
        );

        let desc = object(vec![
            FieldDescriptor::new("a", "a", String::describe)
                .with_tags(Tags(&[("dependentRequired", "b")])),
            FieldDescriptor::new("b", "b", <Option<String>>::describe),
        ]);
        let s = build(&desc, Mode::All).unwrap();
        assert_eq!(s.dependent_required["a"], vec!["b".to_string()]);
    }

    #[test]
    fn model_tags_control_object_shape() {
        let desc = object(vec![FieldDescriptor::new("a", "a", String::describe)])
            .with_tags(Tags(&[("additionalProperties", "true"), ("doc", "A sample")]));
        let s = build(&desc, Mode::All).unwrap();
        assert!(matches!(s.additional_properties, Some(AdditionalProperties::Bool(true))));
        assert_eq!(s.description.as_deref(), Some("A sample"));
    }

    #[test]
    fn map_keys_must_be_stringish() {
        let mut r = Registry::new();
        let err = r
            .schema_for::<std::collections::BTreeMap<bool, String>>()
            .unwrap_err();
        assert!(matches!(err, SchemaBuildError::Unsupported { .. }));
    }

    struct Circle;
    impl Describe for Circle {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::new::<Circle>(TypeKind::Object(vec![FieldDescriptor::new(
                "radius",
                "radius",
                f64::describe,
            )]))
        }
    }

    struct Square;
    impl Describe for Square {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::new::<Square>(TypeKind::Object(vec![FieldDescriptor::new(
                "side",
                "side",
                f64::describe,
            )]))
        }
    }

    struct Shape;
    impl Describe for Shape {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::new::<Shape>(TypeKind::TaggedUnion {
                tag: "kind",
                variants: vec![("circle", Circle::describe), ("square", Square::describe)],
            })
        }
    }

    #[test]
    fn tagged_unions_use_discriminators() {
        let mut r = Registry::new();
        let s = r.schema_for::<Shape>().unwrap();
        assert_eq!(s.reference.as_deref(), Some("#/components/schemas/Shape"));

        let shape = serde_json::to_value(r.get("Shape").unwrap()).unwrap();
        assert_eq!(
            shape,
            json!({
                "oneOf": [
                    {"$ref": "#/components/schemas/Circle"},
                    {"$ref": "#/components/schemas/Square"}
                ],
                "discriminator": {
                    "propertyName": "kind",
                    "mapping": {
                        "circle": "#/components/schemas/Circle",
                        "square": "#/components/schemas/Square"
                    }
                }
            })
        );

        let circle = r.get("Circle").unwrap();
        assert_eq!(circle.properties["kind"].enum_values, vec![json!("circle")]);
        assert!(circle.is_required("kind"));
    }

    #[test]
    fn field_composition() {
        let desc = object(vec![FieldDescriptor::new("shape", "shape", serde_json::Value::describe)
            .with_composition(Composition {
                kind: CompositionKind::OneOf,
                members: vec![Circle::describe, Square::describe],
                discriminator: Some("kind"),
            })]);
        let s = build(&desc, Mode::All).unwrap();
        let shape = &s.properties["shape"];
        assert_eq!(shape.one_of.len(), 2);
        let d = shape.discriminator.as_ref().unwrap();
        assert_eq!(d.mapping["Circle"], "#/components/schemas/Circle");
    }

    #[test]
    fn nullable_object_refs_are_rejected() {
        let desc = object(vec![FieldDescriptor::new("c", "c", Circle::describe)
            .with_tags(Tags(&[("nullable", "true")]))]);
        assert!(matches!(build(&desc, Mode::All), Err(SchemaBuildError::InvalidTag { .. })));
    }

    fn dedupe_transform(_: &Registry, mut s: Schema) -> Schema {
        s.required.push("a".to_string());
        s
    }

    #[test]
    fn transforms_run_and_required_is_deduped() {
        let desc = object(vec![FieldDescriptor::new("a", "a", String::describe)])
            .with_transform(dedupe_transform);
        let s = build(&desc, Mode::All).unwrap();
        assert_eq!(s.required, vec!["a".to_string()]);
    }

    #[test]
    fn anonymous_nested_types_use_parent_field_hint() {
        let inner = || {
            TypeDescriptor::new::<Circle>(TypeKind::Object(vec![FieldDescriptor::new(
                "x",
                "x",
                i32::describe,
            )]))
            .named("")
        };
        let desc = object(vec![FieldDescriptor::new("inner_thing", "inner", inner)]);
        let mut r = Registry::new();
        schema_from_type(&mut r, &desc, Mode::All, "Sample").unwrap();
        assert!(r.get("SampleInnerThing").is_some());
    }

    const FLAG_SETS: [Tags; 3] = [
        Tags(&[]),
        Tags(&[("readOnly", "true")]),
        Tags(&[("writeOnly", "true")]),
    ];
    const NAMES: [&str; 4] = ["f0", "f1", "f2", "f3"];

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn mode_views_omit_the_other_direction(flags in proptest::collection::vec(0usize..3, 4)) {
            let fields: Vec<FieldDescriptor> = flags
                .iter()
                .zip(NAMES)
                .map(|(f, n)| FieldDescriptor::new(n, n, String::describe).with_tags(FLAG_SETS[*f]))
                .collect();
            let desc = object(fields);

            let write = build(&desc, Mode::Write).unwrap();
            prop_assert!(write.properties.values().all(|p| !p.read_only));

            let read = build(&desc, Mode::Read).unwrap();
            prop_assert!(read.properties.values().all(|p| !p.write_only));

            let all = build(&desc, Mode::All).unwrap();
            prop_assert_eq!(all.properties.len(), 4);
        }
    }
}
