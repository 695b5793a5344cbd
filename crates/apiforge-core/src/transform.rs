//! Response transformers
//!
//! Transformers rewrite successful response bodies after the handler runs
//! and before marshaling. They see the decoded `serde_json::Value`, so they
//! work the same for every format. Error responses are not transformed.

use apiforge_schema::{InstanceType, Registry, Schema};
use http::header::{HeaderValue, LINK};
use serde_json::{Map, Value};

use crate::context::Context;
use crate::error::ApiError;

/// Rewrites a response body.
pub trait Transformer: Send + Sync + 'static {
    fn transform(&self, ctx: &mut dyn Context, status: &str, value: Value) -> Result<Value, ApiError>;
}

/// Adapts a closure into a [`Transformer`].
pub struct FnTransformer<F>(pub F);

impl<F> Transformer for FnTransformer<F>
where
    F: Fn(&mut dyn Context, &str, Value) -> Result<Value, ApiError> + Send + Sync + 'static,
{
    fn transform(&self, ctx: &mut dyn Context, status: &str, value: Value) -> Result<Value, ApiError> {
        (self.0)(ctx, status, value)
    }
}

const SCHEMA_PROPERTY: &str = "$schema";

/// Links object bodies to their JSON Schema.
///
/// Adds `Link: </schemas/Name.json>; rel="describedBy"` and a leading
/// `$schema` property holding the absolute schema URL. The property is also
/// documented on the schema as a read-only URI.
#[derive(Debug, Clone)]
pub struct SchemaLinkTransformer {
    schemas_path: String,
}

impl SchemaLinkTransformer {
    pub fn new(schemas_path: impl Into<String>) -> Self {
        Self {
            schemas_path: schemas_path.into().trim_end_matches('/').to_string(),
        }
    }

    /// Document `$schema` on a response body schema and return the schema
    /// name, when the body is a `$ref` to an object.
    pub(crate) fn link_schema(&self, registry: &mut Registry, body: &Schema) -> Option<String> {
        let reference = body.reference.as_deref()?;
        let name = reference.strip_prefix(registry.prefix())?.to_string();
        let target = registry.schema_from_ref_mut(reference)?;
        if !target.is_type(InstanceType::Object) {
            return None;
        }
        if !target.properties.contains_key(SCHEMA_PROPERTY) {
            let mut prop = Schema::string_format("uri");
            prop.description = Some("A URL to the JSON Schema for this object.".to_string());
            prop.read_only = true;
            prop.examples = vec![Value::String(format!(
                "https://example.com{}/{}.json",
                self.schemas_path, name
            ))];
            target.properties.insert(SCHEMA_PROPERTY.to_string(), prop);
            target.invalidate();
        }
        Some(name)
    }
}

/// Absolute URL of a served schema. Local hosts get `http`.
pub(crate) fn schema_url(host: &str, schemas_path: &str, name: &str) -> String {
    let local = host.starts_with("localhost") || host.starts_with("127.0.0.1");
    let scheme = if local { "http" } else { "https" };
    format!("{}://{}{}/{}.json", scheme, host, schemas_path, name)
}

impl Transformer for SchemaLinkTransformer {
    fn transform(&self, ctx: &mut dyn Context, status: &str, value: Value) -> Result<Value, ApiError> {
        if !status.starts_with('2') {
            return Ok(value);
        }
        let Some(name) = ctx.operation().body_schema().map(str::to_string) else {
            return Ok(value);
        };
        let Value::Object(obj) = value else {
            return Ok(value);
        };

        let link = format!("<{}/{}.json>; rel=\"describedBy\"", self.schemas_path, name);
        match HeaderValue::from_str(&link) {
            Ok(v) => ctx.append_header(LINK, v),
            Err(err) => tracing::warn!(schema = %name, error = %err, "cannot write schema link header"),
        }

        if obj.contains_key(SCHEMA_PROPERTY) {
            return Ok(Value::Object(obj));
        }
        let mut out = Map::with_capacity(obj.len() + 1);
        out.insert(
            SCHEMA_PROPERTY.to_string(),
            Value::String(schema_url(ctx.host(), &self.schemas_path, &name)),
        );
        out.extend(obj);
        Ok(Value::Object(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::HttpContext;
    use crate::body::full_request_body;
    use crate::operation::Operation;
    use apiforge_schema::{Describe, FieldDescriptor, TypeDescriptor, TypeKind};
    use serde_json::json;
    use smallvec::SmallVec;
    use std::sync::Arc;

    struct Thing;

    impl Describe for Thing {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::new::<Self>(TypeKind::Object(vec![FieldDescriptor::new(
                "name",
                "name",
                String::describe,
            )]))
            .named("Thing")
        }
    }

    fn ctx(host: &str, body_schema: Option<&str>) -> HttpContext {
        let mut op = Operation::get("/thing");
        op.body_schema = body_schema.map(str::to_string);
        let req = http::Request::builder()
            .uri("/thing")
            .header("host", host)
            .body(full_request_body(""))
            .unwrap();
        HttpContext::new(Arc::new(op), req, SmallVec::new())
    }

    #[test]
    fn documents_schema_property() {
        let mut registry = Registry::new();
        let body = registry.schema_for::<Thing>().unwrap();
        let t = SchemaLinkTransformer::new("/schemas");
        assert_eq!(t.link_schema(&mut registry, &body).as_deref(), Some("Thing"));

        let prop = &registry.get("Thing").unwrap().properties["$schema"];
        assert!(prop.read_only);
        assert_eq!(prop.format.as_deref(), Some("uri"));
        assert!(!registry.get("Thing").unwrap().is_required("$schema"));

        let scalar = registry.schema_for::<String>().unwrap();
        assert!(t.link_schema(&mut registry, &scalar).is_none());
    }

    #[test]
    fn adds_link_and_leading_schema() {
        let t = SchemaLinkTransformer::new("/schemas");
        let mut ctx = ctx("localhost:8888", Some("Thing"));
        let out = t.transform(&mut ctx, "200", json!({"name": "x"})).unwrap();

        let keys: Vec<_> = out.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, ["$schema", "name"]);
        assert_eq!(out["$schema"], "http://localhost:8888/schemas/Thing.json");
        assert_eq!(
            ctx.response_headers()["link"],
            "</schemas/Thing.json>; rel=\"describedBy\""
        );
    }

    #[test]
    fn remote_hosts_use_https() {
        let t = SchemaLinkTransformer::new("/schemas/");
        let mut ctx = ctx("api.example.com", Some("Thing"));
        let out = t.transform(&mut ctx, "201", json!({})).unwrap();
        assert_eq!(out["$schema"], "https://api.example.com/schemas/Thing.json");
    }

    #[test]
    fn skips_non_objects_and_failures() {
        let t = SchemaLinkTransformer::new("/schemas");
        let mut ctx = ctx("localhost", Some("Thing"));
        assert_eq!(t.transform(&mut ctx, "200", json!([1])).unwrap(), json!([1]));
        assert_eq!(t.transform(&mut ctx, "404", json!({})).unwrap(), json!({}));
        assert!(ctx.response_headers().get("link").is_none());

        let mut ctx = self::ctx("localhost", None);
        assert_eq!(t.transform(&mut ctx, "200", json!({})).unwrap(), json!({}));
    }

    #[test]
    fn closures_transform() {
        let t = FnTransformer(
            |_ctx: &mut dyn Context, _status: &str, mut v: Value| -> Result<Value, ApiError> {
                v["seen"] = json!(true);
                Ok(v)
            },
        );
        let mut ctx = ctx("localhost", None);
        assert_eq!(t.transform(&mut ctx, "200", json!({})).unwrap(), json!({"seen": true}));
    }
}
