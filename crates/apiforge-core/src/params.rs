//! Parameter decoding
//!
//! Input fields tagged `path`, `query`, `header` or `cookie` become
//! [`ParamSpec`]s at registration. Per request each spec reads its raw
//! string(s), coerces them by the schema's type, validates the result and
//! stores it under the field's serde key for typed binding.

use std::fmt;

use apiforge_openapi::Param;
use apiforge_schema::{
    schema_from_field, validate, FieldDescriptor, InstanceType, Mode, PathBuffer, Registry, Schema,
    ValidateMode, ValidateResult,
};
use chrono::DateTime;
use cookie::Cookie;
use percent_encoding::percent_decode_str;
use serde_json::{Map, Number, Value};

use crate::context::Context;
use crate::error::RegistrationError;

/// Where a parameter is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
}

impl ParamLocation {
    pub const ALL: [ParamLocation; 4] = [Self::Path, Self::Query, Self::Header, Self::Cookie];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Query => "query",
            Self::Header => "header",
            Self::Cookie => "cookie",
        }
    }
}

impl fmt::Display for ParamLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared input parameter.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    /// Serde key of the input field.
    pub field: &'static str,
    /// Wire name.
    pub name: String,
    pub loc: ParamLocation,
    pub required: bool,
    pub schema: Schema,
    pub style: Option<String>,
    pub explode: bool,
    pub default: Option<Value>,
    /// Inclusive range of the Rust integer type (or of its array items).
    pub int_bounds: Option<(i128, i128)>,
    /// The field is an `Option`, so absence binds to `None`.
    pub optional: bool,
    pub hidden: bool,
    pub deprecated: bool,
}

fn bool_tag(field: &FieldDescriptor, key: &str) -> Result<Option<bool>, RegistrationError> {
    match field.tags.get(key) {
        None => Ok(None),
        Some("true") => Ok(Some(true)),
        Some("false") => Ok(Some(false)),
        Some(other) => Err(RegistrationError::InvalidType {
            kind: "input",
            type_name: field.ident.to_string(),
            reason: format!("tag '{}' expects true or false, got '{}'", key, other),
        }),
    }
}

impl ParamSpec {
    /// Build the parameter description for an input field, or `None` when the field is not a
    /// parameter.
    pub fn from_field(
        registry: &mut Registry,
        field: &FieldDescriptor,
        hint: &str,
    ) -> Result<Option<Self>, RegistrationError> {
        let Some((loc, tag)) = ParamLocation::ALL
            .iter()
            .find_map(|loc| field.tags.get(loc.as_str()).map(|t| (*loc, t)))
        else {
            return Ok(None);
        };
        let name = match tag {
            "true" | "" => field.wire_name().to_string(),
            other => other.to_string(),
        };

        let fd = (field.ty)();
        let schema = schema_from_field(registry, field, &fd, Mode::All, hint)?;
        let explode = bool_tag(field, "explode")?.unwrap_or(loc == ParamLocation::Query);
        let required = loc == ParamLocation::Path || bool_tag(field, "required")?.unwrap_or(false);

        Ok(Some(Self {
            field: field.name,
            name,
            loc,
            required,
            default: schema.default.clone(),
            hidden: schema.is_hidden(),
            deprecated: schema.deprecated,
            schema,
            style: field.tags.get("style").map(str::to_string),
            explode,
            int_bounds: fd.integer_bounds(),
            optional: fd.is_optional(),
        }))
    }

    /// OpenAPI parameter object.
    pub fn to_openapi(&self) -> Param {
        let mut schema = self.schema.clone();
        let description = schema.description.take();
        Param {
            name: self.name.clone(),
            location: self.loc.as_str().to_string(),
            description,
            required: self.required,
            deprecated: self.deprecated,
            style: self.style.clone(),
            explode: (self.loc == ParamLocation::Query && !self.explode).then_some(false),
            example: schema.examples.first().cloned(),
            schema: Some(schema),
            ..Default::default()
        }
    }

    fn location(&self, path: &mut PathBuffer) {
        path.reset();
        path.push(self.loc.as_str());
        path.push(&self.name);
    }
}

enum Raw {
    Missing,
    One(String),
    Many(Vec<String>),
    Pairs(Vec<(String, String)>),
}

fn cookie_value(ctx: &dyn Context, name: &str) -> Option<String> {
    ctx.header_values("cookie").into_iter().find_map(|header| {
        Cookie::split_parse(header)
            .filter_map(Result::ok)
            .find(|c| c.name() == name)
            .map(|c| c.value().to_string())
    })
}

fn gather(ctx: &dyn Context, spec: &ParamSpec, ty: Option<InstanceType>) -> Raw {
    let raw = match spec.loc {
        ParamLocation::Path => ctx
            .param(&spec.name)
            .map(|v| percent_decode_str(v).decode_utf8_lossy().into_owned()),
        ParamLocation::Query => match ty {
            Some(InstanceType::Array) if spec.explode => {
                let values: Vec<String> = ctx
                    .query_values(&spec.name)
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                return if values.is_empty() { Raw::Missing } else { Raw::Many(values) };
            }
            Some(InstanceType::Object) if spec.style.as_deref() == Some("deepObject") => {
                let prefix = format!("{}[", spec.name);
                let pairs: Vec<(String, String)> = ctx
                    .query_pairs()
                    .iter()
                    .filter_map(|(k, v)| {
                        let key = k.strip_prefix(prefix.as_str())?.strip_suffix(']')?;
                        Some((key.to_string(), v.clone()))
                    })
                    .collect();
                return if pairs.is_empty() { Raw::Missing } else { Raw::Pairs(pairs) };
            }
            _ => ctx.query(&spec.name).map(str::to_string),
        },
        ParamLocation::Header => {
            let values = ctx.header_values(&spec.name);
            (!values.is_empty()).then(|| values.join(","))
        }
        ParamLocation::Cookie => cookie_value(ctx, &spec.name),
    };
    match raw {
        Some(v) if !v.is_empty() => Raw::One(v),
        _ => Raw::Missing,
    }
}

/// Integer range implied by the schema alone.
fn schema_bounds(schema: &Schema) -> (i128, i128) {
    let unsigned = schema.minimum.map_or(false, |m| m >= 0.0);
    match (schema.format.as_deref(), unsigned) {
        (Some("int32"), true) => (0, i128::from(u32::MAX)),
        (Some("int32"), false) => (i128::from(i32::MIN), i128::from(i32::MAX)),
        (_, true) => (0, i128::from(u64::MAX)),
        (_, false) => (i128::from(i64::MIN), i128::from(u64::MAX)),
    }
}

/// Parse one raw value as a scalar of the schema's type. Integers must fit
/// `bounds`, or the range implied by the schema's format when not given.
pub(crate) fn coerce_scalar(
    schema: &Schema,
    bounds: Option<(i128, i128)>,
    raw: &str,
) -> Result<Value, &'static str> {
    match schema.primary_type() {
        Some(InstanceType::Boolean) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err("cannot parse boolean"),
        },
        Some(InstanceType::Integer) => {
            let (lo, hi) = bounds.unwrap_or_else(|| schema_bounds(schema));
            match raw.parse::<i128>() {
                Ok(i) if (lo..=hi).contains(&i) => i64::try_from(i)
                    .map(Value::from)
                    .or_else(|_| u64::try_from(i).map(Value::from))
                    .map_err(|_| "cannot parse integer"),
                _ => Err("cannot parse integer"),
            }
        }
        Some(InstanceType::Number) => raw
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or("cannot parse float"),
        _ => Ok(Value::String(raw.to_string())),
    }
}

fn delimiter(style: Option<&str>) -> char {
    match style {
        Some("tsv") => '\t',
        Some("pipes" | "pipeDelimited") => '|',
        Some("ssv" | "spaceDelimited") => ' ',
        _ => ',',
    }
}

fn coerce_items(
    items: &Schema,
    bounds: Option<(i128, i128)>,
    values: Vec<String>,
    path: &mut PathBuffer,
    res: &mut ValidateResult,
) -> Value {
    let mut out = Vec::with_capacity(values.len());
    for (i, raw) in values.into_iter().enumerate() {
        match coerce_scalar(items, bounds, &raw) {
            Ok(v) => out.push(v),
            Err(msg) => {
                path.push_index(i);
                res.add(path, &Value::String(raw.clone()), msg);
                path.pop();
                out.push(Value::String(raw));
            }
        }
    }
    Value::Array(out)
}

fn coerce(
    registry: &Registry,
    spec: &ParamSpec,
    schema: &Schema,
    raw: Raw,
    path: &mut PathBuffer,
    res: &mut ValidateResult,
) -> Option<Value> {
    let fallback = Schema::default();
    match raw {
        Raw::Missing => None,
        Raw::Many(values) => {
            let items = schema
                .items
                .as_deref()
                .and_then(|i| registry.resolve(i))
                .unwrap_or(&fallback);
            Some(coerce_items(items, spec.int_bounds, values, path, res))
        }
        Raw::Pairs(pairs) => {
            let mut obj = Map::new();
            for (key, raw) in pairs {
                let prop = schema
                    .properties
                    .get(&key)
                    .and_then(|p| registry.resolve(p))
                    .unwrap_or(&fallback);
                let value = match coerce_scalar(prop, None, &raw) {
                    Ok(v) => v,
                    Err(msg) => {
                        path.push(&key);
                        res.add(path, &Value::String(raw.clone()), msg);
                        path.pop();
                        Value::String(raw)
                    }
                };
                obj.insert(key, value);
            }
            Some(Value::Object(obj))
        }
        Raw::One(raw) => match schema.primary_type() {
            Some(InstanceType::Array) => {
                if raw.starts_with('[') {
                    match serde_json::from_str::<Value>(&raw) {
                        Ok(v) => return Some(v),
                        Err(_) => {
                            res.add(path, &Value::String(raw.clone()), "cannot parse array");
                            return Some(Value::String(raw));
                        }
                    }
                }
                let items = schema
                    .items
                    .as_deref()
                    .and_then(|i| registry.resolve(i))
                    .unwrap_or(&fallback);
                let sep = delimiter(spec.style.as_deref());
                let values = raw
                    .split(sep)
                    .map(|v| v.trim().to_string())
                    .collect();
                Some(coerce_items(items, spec.int_bounds, values, path, res))
            }
            _ => match coerce_scalar(schema, spec.int_bounds, &raw) {
                Ok(v) => Some(v),
                Err(msg) => {
                    res.add(path, &Value::String(raw.clone()), msg);
                    Some(Value::String(raw))
                }
            },
        },
    }
}

/// Value bound for an absent, non-`Option` parameter without a default.
fn zero_value(schema: &Schema) -> Value {
    match schema.primary_type() {
        Some(InstanceType::Boolean) => Value::Bool(false),
        Some(InstanceType::Integer) => Value::from(0),
        Some(InstanceType::Number) => Value::from(0.0),
        Some(InstanceType::String) => Value::String(String::new()),
        Some(InstanceType::Array) => Value::Array(Vec::new()),
        Some(InstanceType::Object) => Value::Object(Map::new()),
        _ => Value::Null,
    }
}

/// RFC 1123 dates become RFC 3339 strings so chrono can bind them.
fn normalize_http_date(schema: &Schema, value: Value) -> Value {
    if schema.format.as_deref() != Some("date-time-http") {
        return value;
    }
    match &value {
        Value::String(s) => DateTime::parse_from_rfc2822(s)
            .map(|d| Value::String(d.to_rfc3339()))
            .unwrap_or(value),
        _ => value,
    }
}

/// Decode every parameter into `out`, collecting errors into `res`.
pub(crate) fn decode_params(
    ctx: &dyn Context,
    registry: &Registry,
    specs: &[ParamSpec],
    skip_validate: bool,
    out: &mut Map<String, Value>,
    res: &mut ValidateResult,
) {
    let mut path = PathBuffer::new();
    for spec in specs {
        let schema = registry.resolve(&spec.schema).unwrap_or(&spec.schema);
        spec.location(&mut path);

        let raw = gather(ctx, spec, schema.primary_type());
        let before = res.len();
        let value = match coerce(registry, spec, schema, raw, &mut path, res) {
            Some(v) => v,
            None => {
                if spec.required {
                    res.add(
                        &path,
                        &Value::Null,
                        format!("required {} parameter is missing", spec.loc),
                    );
                    if !spec.optional {
                        out.insert(spec.field.to_string(), zero_value(schema));
                    }
                    continue;
                }
                match &spec.default {
                    Some(d) => d.clone(),
                    None if spec.optional => continue,
                    None => {
                        out.insert(spec.field.to_string(), zero_value(schema));
                        continue;
                    }
                }
            }
        };

        if res.len() > before {
            // Keep binding possible so resolvers still run.
            if !spec.optional {
                out.insert(spec.field.to_string(), zero_value(schema));
            }
            continue;
        }
        if !skip_validate {
            validate(registry, &spec.schema, &mut path, ValidateMode::WriteToServer, &value, res);
        }
        out.insert(spec.field.to_string(), normalize_http_date(schema, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::HttpContext;
    use crate::body::full_request_body;
    use crate::operation::Operation;
    use apiforge_schema::{Describe, Tags};
    use serde_json::json;
    use smallvec::SmallVec;
    use std::sync::Arc;

    fn ctx(uri: &str, headers: &[(&str, &str)], params: &[(&str, &str)]) -> HttpContext {
        let mut req = http::Request::builder().uri(uri);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        let req = req.body(full_request_body("")).unwrap();
        let params = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<SmallVec<_>>();
        HttpContext::new(Arc::new(Operation::get("/")), req, params)
    }

    fn spec(registry: &mut Registry, field: FieldDescriptor) -> ParamSpec {
        ParamSpec::from_field(registry, &field, "Test").unwrap().unwrap()
    }

    fn decode(ctx: &HttpContext, registry: &Registry, specs: &[ParamSpec]) -> (Map<String, Value>, ValidateResult) {
        let mut out = Map::new();
        let mut res = ValidateResult::new();
        decode_params(ctx, registry, specs, false, &mut out, &mut res);
        (out, res)
    }

    #[test]
    fn non_params_are_ignored() {
        let mut registry = Registry::new();
        let field = FieldDescriptor::new("body", "body", String::describe);
        assert!(ParamSpec::from_field(&mut registry, &field, "X").unwrap().is_none());
    }

    #[test]
    fn scalars_by_location() {
        let mut registry = Registry::new();
        let specs = vec![
            spec(&mut registry, FieldDescriptor::new("id", "id", String::describe).with_tags(Tags(&[("path", "id")]))),
            spec(&mut registry, FieldDescriptor::new("num", "num", i64::describe).with_tags(Tags(&[("query", "num")]))),
            spec(&mut registry, FieldDescriptor::new("verbose", "verbose", bool::describe).with_tags(Tags(&[("query", "true")]))),
            spec(&mut registry, FieldDescriptor::new("ratio", "ratio", f64::describe).with_tags(Tags(&[("header", "X-Ratio")]))),
            spec(&mut registry, FieldDescriptor::new("session", "session", String::describe).with_tags(Tags(&[("cookie", "sid")]))),
        ];
        let ctx = ctx(
            "/?num=5&verbose=TRUE",
            &[("x-ratio", "0.5"), ("cookie", "theme=dark; sid=abc123")],
            &[("id", "a%20b")],
        );
        let (out, res) = decode(&ctx, &registry, &specs);
        assert!(res.is_empty(), "{:?}", res.errors);
        assert_eq!(
            Value::Object(out),
            json!({"id": "a b", "num": 5, "verbose": true, "ratio": 0.5, "session": "abc123"})
        );
    }

    #[test]
    fn parse_failures_are_located() {
        let mut registry = Registry::new();
        let specs = vec![
            spec(&mut registry, FieldDescriptor::new("num", "num", i64::describe).with_tags(Tags(&[("query", "num")]))),
            spec(&mut registry, FieldDescriptor::new("flag", "flag", bool::describe).with_tags(Tags(&[("query", "flag")]))),
            spec(&mut registry, FieldDescriptor::new("small", "small", i32::describe).with_tags(Tags(&[("query", "small")]))),
        ];
        let ctx = ctx("/?num=bad&flag=maybe&small=99999999999", &[], &[]);
        let (_, res) = decode(&ctx, &registry, &specs);
        let found: Vec<_> = res
            .errors
            .iter()
            .map(|e| (e.message.as_str(), e.location.as_str()))
            .collect();
        assert_eq!(
            found,
            [
                ("cannot parse integer", "query.num"),
                ("cannot parse boolean", "query.flag"),
                ("cannot parse integer", "query.small"),
            ]
        );
        assert_eq!(res.errors[0].value, Some(json!("bad")));
    }

    #[test]
    fn integers_respect_type_width() {
        let mut registry = Registry::new();
        let specs = vec![
            spec(&mut registry, FieldDescriptor::new("small", "small", u8::describe).with_tags(Tags(&[("query", "small")]))),
            spec(&mut registry, FieldDescriptor::new("signed", "signed", i32::describe).with_tags(Tags(&[("query", "signed")]))),
            spec(&mut registry, FieldDescriptor::new("ids", "ids", <Vec<i8>>::describe).with_tags(Tags(&[("query", "ids")]))),
        ];
        let ctx = ctx("/?small=300&signed=3000000000&ids=1&ids=-129", &[], &[]);
        let (_, res) = decode(&ctx, &registry, &specs);
        let found: Vec<_> = res
            .errors
            .iter()
            .map(|e| (e.message.as_str(), e.location.as_str()))
            .collect();
        assert_eq!(
            found,
            [
                ("cannot parse integer", "query.small"),
                ("cannot parse integer", "query.signed"),
                ("cannot parse integer", "query.ids[1]"),
            ]
        );
        assert_eq!(res.errors[0].value, Some(json!("300")));

        let ctx = self::ctx("/?small=255&signed=-2147483648&ids=-128", &[], &[]);
        let (out, res) = decode(&ctx, &registry, &specs);
        assert!(res.is_empty(), "{:?}", res.errors);
        assert_eq!(Value::Object(out), json!({"small": 255, "signed": -2147483648i64, "ids": [-128]}));
    }

    #[test]
    fn arrays_split_explode_and_index_errors() {
        let mut registry = Registry::new();
        let specs = vec![
            spec(&mut registry, FieldDescriptor::new("ids", "ids", <Vec<i64>>::describe).with_tags(Tags(&[("query", "ids")]))),
            spec(&mut registry, FieldDescriptor::new("tags", "tags", <Vec<String>>::describe).with_tags(Tags(&[("query", "tags"), ("explode", "false"), ("style", "pipeDelimited")]))),
            spec(&mut registry, FieldDescriptor::new("json", "json", <Vec<i64>>::describe).with_tags(Tags(&[("header", "X-Json")]))),
            spec(&mut registry, FieldDescriptor::new("accept", "accept", <Vec<String>>::describe).with_tags(Tags(&[("header", "Accept")]))),
        ];
        let ctx = ctx(
            "/?ids=1&ids=2&tags=a|b|c",
            &[("x-json", "[3, 4]"), ("accept", "a, b"), ("accept", "c")],
            &[],
        );
        let (out, res) = decode(&ctx, &registry, &specs);
        assert!(res.is_empty(), "{:?}", res.errors);
        assert_eq!(out["ids"], json!([1, 2]));
        assert_eq!(out["tags"], json!(["a", "b", "c"]));
        assert_eq!(out["json"], json!([3, 4]));
        assert_eq!(out["accept"], json!(["a", "b", "c"]));

        let ctx2 = self::ctx("/?ids=1&ids=x", &[], &[]);
        let (_, res) = decode(&ctx2, &registry, &specs[..1]);
        assert_eq!(res.errors[0].location, "query.ids[1]");
        assert_eq!(res.errors[0].message, "cannot parse integer");
    }

    #[test]
    fn deep_object_query() {
        let mut registry = Registry::new();
        let specs = vec![spec(
            &mut registry,
            FieldDescriptor::new("filter", "filter", <std::collections::BTreeMap<String, String>>::describe)
                .with_tags(Tags(&[("query", "filter"), ("style", "deepObject")])),
        )];
        let ctx = ctx("/?filter%5Bcolor%5D=red&filter%5Bsize%5D=L&other=1", &[], &[]);
        let (out, res) = decode(&ctx, &registry, &specs);
        assert!(res.is_empty());
        assert_eq!(out["filter"], json!({"color": "red", "size": "L"}));
    }

    #[test]
    fn missing_params() {
        let mut registry = Registry::new();
        let specs = vec![
            spec(&mut registry, FieldDescriptor::new("id", "id", String::describe).with_tags(Tags(&[("path", "id")]))),
            spec(&mut registry, FieldDescriptor::new("q", "q", String::describe).with_tags(Tags(&[("query", "q"), ("required", "true")]))),
            spec(&mut registry, FieldDescriptor::new("page", "page", i64::describe).with_tags(Tags(&[("query", "page"), ("default", "1")]))),
            spec(&mut registry, FieldDescriptor::new("limit", "limit", i64::describe).with_tags(Tags(&[("query", "limit")]))),
            spec(&mut registry, FieldDescriptor::new("cursor", "cursor", <Option<String>>::describe).with_tags(Tags(&[("query", "cursor")]))),
        ];
        let ctx = ctx("/", &[], &[]);
        let (out, res) = decode(&ctx, &registry, &specs);
        let messages: Vec<_> = res.errors.iter().map(|e| (e.message.as_str(), e.location.as_str())).collect();
        assert_eq!(
            messages,
            [
                ("required path parameter is missing", "path.id"),
                ("required query parameter is missing", "query.q"),
            ]
        );
        assert_eq!(out["page"], json!(1));
        assert_eq!(out["limit"], json!(0));
        assert!(!out.contains_key("cursor"));
    }

    #[test]
    fn values_are_validated() {
        let mut registry = Registry::new();
        let specs = vec![spec(
            &mut registry,
            FieldDescriptor::new("name", "name", String::describe)
                .with_tags(Tags(&[("query", "name"), ("maxLength", "3")])),
        )];
        let ctx = ctx("/?name=toolong", &[], &[]);
        let (_, res) = decode(&ctx, &registry, &specs);
        assert_eq!(res.errors[0].location, "query.name");
        assert_eq!(res.errors[0].message, "expected length <= 3");

        let mut out = Map::new();
        let mut res = ValidateResult::new();
        decode_params(&ctx, &registry, &specs, true, &mut out, &mut res);
        assert!(res.is_empty());
        assert_eq!(out["name"], json!("toolong"));
    }

    #[test]
    fn http_dates_are_normalized() {
        let mut registry = Registry::new();
        let specs = vec![spec(
            &mut registry,
            FieldDescriptor::new("since", "since", <Option<chrono::DateTime<chrono::Utc>>>::describe)
                .with_tags(Tags(&[("header", "If-Modified-Since")])),
        )];
        let ctx = ctx("/", &[("if-modified-since", "Mon, 02 Jan 2006 15:04:05 GMT")], &[]);
        let (out, res) = decode(&ctx, &registry, &specs);
        assert!(res.is_empty(), "{:?}", res.errors);
        assert_eq!(out["since"], json!("2006-01-02T15:04:05+00:00"));
    }

    #[test]
    fn openapi_param_shape() {
        let mut registry = Registry::new();
        let s = spec(
            &mut registry,
            FieldDescriptor::new("num", "num", i64::describe)
                .with_tags(Tags(&[("query", "num"), ("doc", "How many"), ("example", "3")])),
        );
        let p = s.to_openapi();
        assert_eq!(p.name, "num");
        assert_eq!(p.location, "query");
        assert_eq!(p.description.as_deref(), Some("How many"));
        assert_eq!(p.example, Some(json!(3)));
        assert!(!p.required);
        assert!(p.schema.unwrap().description.is_none());
    }
}
