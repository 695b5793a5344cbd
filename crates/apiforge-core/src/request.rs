//! Request pipeline
//!
//! Decodes parameters and the body into one JSON object keyed by the input's
//! serde field names, validates it, binds it to the input type and runs the
//! resolvers. Every failure along the way is collected so the client sees
//! them all at once.

use apiforge_schema::{
    canonicalize_keys, strict_casing, validate, ErrorDetail, InstanceType, PathBuffer, Registry,
    Schema, ValidateMode, ValidateResult,
};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::context::{BodyError, Context};
use crate::error::{new_error, StatusError};
use crate::format::{essence, Formats};
use crate::multipart::MultipartForm;
use crate::params::{coerce_scalar, decode_params};
use crate::register::{BodySpec, InputPlan, RawBodyKind};
use crate::resolver::Resolvable;

fn body_error(err: BodyError) -> Box<dyn StatusError> {
    match err {
        BodyError::TooLarge { .. } => new_error(StatusCode::PAYLOAD_TOO_LARGE, &err.to_string(), vec![]),
        BodyError::Timeout => new_error(StatusCode::REQUEST_TIMEOUT, &err.to_string(), vec![]),
        other => {
            tracing::debug!(error = %other, "cannot read request body");
            new_error(StatusCode::INTERNAL_SERVER_ERROR, "cannot read request body", vec![])
        }
    }
}

/// Insert schema defaults for absent object properties, recursively.
pub(crate) fn fill_defaults(registry: &Registry, schema: &Schema, value: &mut Value) {
    let Some(schema) = registry.resolve(schema) else {
        return;
    };
    match value {
        Value::Object(obj) => {
            for (name, prop) in &schema.properties {
                match obj.get_mut(name) {
                    Some(child) => fill_defaults(registry, prop, child),
                    None => {
                        let default = registry.resolve(prop).and_then(|p| p.default.clone());
                        if let Some(default) = default {
                            obj.insert(name.clone(), default);
                        }
                    }
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema.items.as_deref() {
                for item in items {
                    fill_defaults(registry, item_schema, item);
                }
            }
        }
        _ => {}
    }
}

/// Decode multipart text values into the body object using parameter rules.
/// Each decoded value is validated against its property schema.
fn form_to_body(
    registry: &Registry,
    spec: &BodySpec,
    form: &MultipartForm,
    skip_validate: bool,
    res: &mut ValidateResult,
) -> Value {
    let fallback = Schema::default();
    let schema = registry.resolve(&spec.schema).unwrap_or(&spec.schema);
    let mut path = PathBuffer::new();
    path.push("body");
    let mut obj = Map::new();

    for (name, values) in &form.values {
        let declared = schema.properties.get(name);
        let prop = declared.and_then(|p| registry.resolve(p)).unwrap_or(&fallback);
        path.push(name);
        let before = res.len();
        let value = if prop.is_type(InstanceType::Array) {
            let items = prop
                .items
                .as_deref()
                .and_then(|i| registry.resolve(i))
                .unwrap_or(&fallback);
            let mut out = Vec::with_capacity(values.len());
            for (i, raw) in values.iter().enumerate() {
                match coerce_scalar(items, None, raw) {
                    Ok(v) => out.push(v),
                    Err(msg) => {
                        path.push_index(i);
                        res.add(&path, &Value::String(raw.clone()), msg);
                        path.pop();
                    }
                }
            }
            Some(Value::Array(out))
        } else if values.len() > 1 {
            res.add(
                &path,
                &Value::from(values.clone()),
                "expected at most one value, but received multiple values",
            );
            None
        } else {
            values.first().and_then(|raw| match coerce_scalar(prop, None, raw) {
                Ok(v) => Some(v),
                Err(msg) => {
                    res.add(&path, &Value::String(raw.clone()), msg);
                    None
                }
            })
        };
        if let (Some(v), Some(declared)) = (&value, declared) {
            if !skip_validate && res.len() == before {
                validate(registry, declared, &mut path, ValidateMode::WriteToServer, v, res);
            }
        }
        path.pop();
        if let Some(value) = value {
            obj.insert(name.clone(), value);
        }
    }

    for (name, files) in &form.files {
        let prop = schema.properties.get(name).and_then(|p| registry.resolve(p));
        let many = prop.map_or(false, |p| p.is_type(InstanceType::Array));
        let value = if many {
            serde_json::to_value(files)
        } else {
            match files.first() {
                Some(file) => serde_json::to_value(file),
                None => continue,
            }
        };
        if let Ok(value) = value {
            obj.insert(name.clone(), value);
        }
    }
    Value::Object(obj)
}

fn bytes_value(bytes: &Bytes) -> Value {
    Value::Array(bytes.iter().map(|b| Value::from(*b)).collect())
}

/// Run the request half of the pipeline and produce the handler's input.
pub(crate) async fn decode_input<I>(
    ctx: &mut dyn Context,
    registry: &Registry,
    formats: &Formats,
    plan: &InputPlan,
) -> Result<I, Box<dyn StatusError>>
where
    I: DeserializeOwned + Resolvable,
{
    let (limit, timeout, skip_params, skip_body) = {
        let op = ctx.operation();
        (
            op.max_body_bytes,
            op.body_read_timeout,
            op.skip_validate_params,
            op.skip_validate_body,
        )
    };

    let mut out = Map::new();
    let mut res = ValidateResult::new();
    let mut err_status: Option<StatusCode> = None;

    decode_params(&*ctx, registry, &plan.params, skip_params, &mut out, &mut res);

    if plan.body.is_some() || plan.raw_body.is_some() {
        ctx.set_read_deadline(timeout.map(|t| Instant::now() + t));
        let content_type = ctx.header(CONTENT_TYPE.as_str()).map(str::to_string);
        let is_form = content_type.as_deref().map(essence).as_deref() == Some("multipart/form-data");

        if is_form {
            match ctx.multipart_form(limit).await {
                Ok(form) => {
                    if let Some(raw) = plan.raw_body.as_ref().filter(|r| r.kind == RawBodyKind::Form) {
                        if let Ok(v) = serde_json::to_value(&form) {
                            out.insert(raw.field.to_string(), v);
                        }
                    }
                    if let Some(body) = &plan.body {
                        let value = form_to_body(registry, body, &form, skip_body, &mut res);
                        out.insert(body.field.to_string(), value);
                    }
                }
                Err(err @ (BodyError::TooLarge { .. } | BodyError::Timeout)) => return Err(body_error(err)),
                Err(err) => res.push(
                    ErrorDetail::new(format!("cannot read multipart form: {}", err)).with_location("body"),
                ),
            }
        } else {
            let bytes = ctx.read_body(limit).await.map_err(body_error)?;

            if let Some(raw) = plan.raw_body.as_ref().filter(|r| r.kind == RawBodyKind::Bytes) {
                out.insert(raw.field.to_string(), bytes_value(&bytes));
            }

            if let Some(body) = &plan.body {
                if bytes.is_empty() {
                    if body.required {
                        return Err(new_error(StatusCode::BAD_REQUEST, "request body is required", vec![]));
                    }
                } else {
                    let text = || Value::String(String::from_utf8_lossy(&bytes).into_owned());
                    match formats.for_request(content_type.as_deref()) {
                        Err(err) => {
                            err_status = Some(StatusCode::UNSUPPORTED_MEDIA_TYPE);
                            res.push(ErrorDetail::new(err.to_string()).with_location("body").with_value(text()));
                        }
                        Ok(format) => match format.unmarshal(&bytes) {
                            Err(err) => {
                                err_status = Some(StatusCode::BAD_REQUEST);
                                res.push(ErrorDetail::new(err.to_string()).with_location("body").with_value(text()));
                            }
                            Ok(mut value) => {
                                if !strict_casing() {
                                    canonicalize_keys(registry, &body.schema, &mut value);
                                }
                                fill_defaults(registry, &body.schema, &mut value);
                                if !skip_body {
                                    let mut path = PathBuffer::new();
                                    path.push("body");
                                    validate(
                                        registry,
                                        &body.schema,
                                        &mut path,
                                        ValidateMode::WriteToServer,
                                        &value,
                                        &mut res,
                                    );
                                }
                                out.insert(body.field.to_string(), value);
                            }
                        },
                    }
                }
            }
        }
    }

    let mut input = match serde_json::from_value::<I>(Value::Object(out)) {
        Ok(input) => Some(input),
        Err(err) => {
            // Already-reported failures usually explain the binding error.
            if res.is_empty() {
                res.push(ErrorDetail::new(err.to_string()).with_location("body"));
            }
            None
        }
    };

    let mut override_status = None;
    if let Some(input) = input.as_mut() {
        let mut path = PathBuffer::new();
        let mut errs = Vec::new();
        input.resolve_all(&*ctx, &mut path, &mut errs);
        for err in errs {
            if let Some(status) = err.status.and_then(|s| StatusCode::from_u16(s).ok()) {
                override_status = Some(status);
            }
            res.push(err);
        }
    }

    match input {
        Some(input) if res.is_empty() => Ok(input),
        _ => {
            let status = override_status
                .or(err_status)
                .unwrap_or(StatusCode::UNPROCESSABLE_ENTITY);
            Err(new_error(status, "validation failed", std::mem::take(&mut res.errors)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::HttpContext;
    use crate::body::{full_request_body, request_body};
    use crate::operation::Operation;
    use crate::path::PathTemplate;
    use crate::register::InputPlan;
    use crate::resolver::Resolver;
    use apiforge_schema::{Describe, FieldDescriptor, Tags, TypeDescriptor, TypeKind};
    use serde::Deserialize;
    use serde_json::json;
    use smallvec::SmallVec;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Deserialize)]
    struct Item {
        name: String,
        #[serde(default)]
        qty: i64,
    }

    impl Describe for Item {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::new::<Self>(TypeKind::Object(vec![
                FieldDescriptor::new("name", "name", String::describe).with_tags(Tags(&[("maxLength", "5")])),
                FieldDescriptor::new("qty", "qty", i64::describe).with_tags(Tags(&[("default", "1")])),
            ]))
            .named("Item")
        }
    }

    impl Resolvable for Item {}

    #[derive(Debug, Deserialize)]
    struct CreateInput {
        id: String,
        body: Item,
    }

    impl Describe for CreateInput {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::new::<Self>(TypeKind::Object(vec![
                FieldDescriptor::new("id", "id", String::describe).with_tags(Tags(&[("path", "id")])),
                FieldDescriptor::new("body", "body", Item::describe),
            ]))
            .named("CreateInput")
        }
    }

    impl Resolver for CreateInput {
        fn resolve(&mut self, _ctx: &dyn Context, _path: &PathBuffer) -> Vec<ErrorDetail> {
            if self.id == "locked" {
                return vec![ErrorDetail::new("item is locked").with_location("path.id").with_status(409)];
            }
            vec![]
        }
    }

    impl Resolvable for CreateInput {
        fn resolve_all(&mut self, ctx: &dyn Context, path: &mut PathBuffer, errs: &mut Vec<ErrorDetail>) {
            errs.extend(self.resolve(ctx, path));
        }
    }

    struct Setup {
        registry: Registry,
        plan: InputPlan,
    }

    fn setup() -> Setup {
        let mut registry = Registry::new();
        let template = PathTemplate::parse("/items/{id}").unwrap();
        let plan = InputPlan::build(&mut registry, &CreateInput::describe(), &template).unwrap();
        Setup { registry, plan }
    }

    fn ctx(op: Operation, id: &str, content_type: Option<&str>, body: &'static str) -> HttpContext {
        let mut req = http::Request::builder().method("POST").uri("/items/x");
        if let Some(ct) = content_type {
            req = req.header("content-type", ct);
        }
        let params = SmallVec::from_vec(vec![("id".to_string(), id.to_string())]);
        HttpContext::new(Arc::new(op), req.body(full_request_body(body)).unwrap(), params)
    }

    async fn run(ctx: &mut HttpContext, s: &Setup) -> Result<CreateInput, Box<dyn StatusError>> {
        decode_input::<CreateInput>(ctx, &s.registry, &Formats::new(), &s.plan).await
    }

    #[tokio::test]
    async fn decodes_and_fills_defaults() {
        let s = setup();
        let mut ctx = ctx(Operation::post("/items/{id}"), "7", Some("application/json"), r#"{"name":"bolt"}"#);
        let input = run(&mut ctx, &s).await.unwrap();
        assert_eq!(input.id, "7");
        assert_eq!(input.body.name, "bolt");
        assert_eq!(input.body.qty, 1);
    }

    #[tokio::test]
    async fn body_keys_bind_regardless_of_case() {
        let s = setup();
        let mut ctx = ctx(
            Operation::post("/items/{id}"),
            "7",
            Some("application/json"),
            r#"{"NAME":"bolt","Qty":4}"#,
        );
        let input = run(&mut ctx, &s).await.unwrap();
        assert_eq!(input.body.name, "bolt");
        assert_eq!(input.body.qty, 4);
    }

    #[tokio::test]
    async fn suffix_formats_and_missing_content_type() {
        let s = setup();
        let mut ctx = ctx(
            Operation::post("/items/{id}"),
            "7",
            Some("application/merge-patch+json"),
            r#"{"name":"a"}"#,
        );
        assert!(run(&mut ctx, &s).await.is_ok());
        let mut ctx = self::ctx(Operation::post("/items/{id}"), "7", None, r#"{"name":"a"}"#);
        assert!(run(&mut ctx, &s).await.is_ok());
    }

    #[tokio::test]
    async fn validation_errors_are_aggregated() {
        let s = setup();
        let mut ctx = ctx(
            Operation::post("/items/{id}"),
            "7",
            Some("application/json"),
            r#"{"name":"toolong","extra":true}"#,
        );
        let err = run(&mut ctx, &s).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let v = err.to_value();
        assert_eq!(v["detail"], "validation failed");
        let locations: Vec<_> = v["errors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["location"].as_str().unwrap().to_string())
            .collect();
        assert!(locations.contains(&"body.name".to_string()));
        assert!(locations.contains(&"body.extra".to_string()));
    }

    #[tokio::test]
    async fn bad_bodies() {
        let s = setup();
        let mut ctx = ctx(Operation::post("/items/{id}"), "7", Some("application/json"), "{nope");
        assert_eq!(run(&mut ctx, &s).await.unwrap_err().status(), StatusCode::BAD_REQUEST);

        let mut ctx = self::ctx(Operation::post("/items/{id}"), "7", Some("text/csv"), "a,b");
        let err = run(&mut ctx, &s).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(err.to_value()["errors"][0]["message"], "unknown content type");

        let mut ctx = self::ctx(Operation::post("/items/{id}"), "7", Some("application/json"), "");
        let err = run(&mut ctx, &s).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_value()["detail"], "request body is required");
    }

    #[tokio::test]
    async fn body_limits() {
        let s = setup();
        let op = Operation::post("/items/{id}").max_body_bytes(4);
        let mut ctx = ctx(op, "7", Some("application/json"), r#"{"name":"bolt"}"#);
        let err = run(&mut ctx, &s).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err.to_value()["detail"], "request body is too large limit=4 bytes");
    }

    #[tokio::test]
    async fn resolver_status_override() {
        let s = setup();
        let mut ctx = ctx(Operation::post("/items/{id}"), "locked", Some("application/json"), r#"{"name":"a"}"#);
        let err = run(&mut ctx, &s).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.to_value()["errors"][0]["location"], "path.id");
    }

    #[tokio::test]
    async fn skip_validation() {
        let s = setup();
        let op = Operation::post("/items/{id}").skip_validate_body();
        let mut ctx = ctx(op, "7", Some("application/json"), r#"{"name":"toolong"}"#);
        assert_eq!(run(&mut ctx, &s).await.unwrap().body.name, "toolong");
    }

    #[tokio::test]
    async fn stalled_body_times_out() {
        let s = setup();
        let op = Operation::post("/items/{id}").body_read_timeout(Duration::from_millis(20));
        let stalled = http_body_util::StreamBody::new(futures_util::stream::pending::<
            Result<hyper::body::Frame<Bytes>, std::convert::Infallible>,
        >());
        let req = http::Request::builder()
            .method("POST")
            .uri("/items/7")
            .header("content-type", "application/json")
            .body(request_body(stalled))
            .unwrap();
        let params = SmallVec::from_vec(vec![("id".to_string(), "7".to_string())]);
        let mut ctx = HttpContext::new(Arc::new(op), req, params);
        let err = run(&mut ctx, &s).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[derive(Debug, Deserialize)]
    struct UploadForm {
        title: String,
        #[serde(default)]
        count: i64,
        #[serde(default)]
        ids: Vec<i64>,
    }

    impl Describe for UploadForm {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::new::<Self>(TypeKind::Object(vec![
                FieldDescriptor::new("title", "title", String::describe).with_tags(Tags(&[("maxLength", "5")])),
                FieldDescriptor::new("count", "count", i64::describe),
                FieldDescriptor::new("ids", "ids", <Vec<i64>>::describe),
            ]))
            .named("UploadForm")
        }
    }

    impl Resolvable for UploadForm {}

    #[derive(Debug, Deserialize)]
    struct UploadInput {
        body: UploadForm,
    }

    impl Describe for UploadInput {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::new::<Self>(TypeKind::Object(vec![FieldDescriptor::new(
                "body",
                "body",
                UploadForm::describe,
            )
            .with_tags(Tags(&[("contentType", "multipart/form-data")]))]))
            .named("UploadInput")
        }
    }

    impl Resolvable for UploadInput {}

    fn form(parts: &[(&str, &str)]) -> String {
        let mut out = String::new();
        for (name, value) in parts {
            out.push_str(&format!(
                "--XyZ\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                name, value
            ));
        }
        out.push_str("--XyZ--\r\n");
        out
    }

    async fn upload(op: Operation, parts: &[(&str, &str)]) -> Result<UploadInput, Box<dyn StatusError>> {
        let mut registry = Registry::new();
        let template = PathTemplate::parse("/upload").unwrap();
        let plan = InputPlan::build(&mut registry, &UploadInput::describe(), &template).unwrap();
        let req = http::Request::builder()
            .method("POST")
            .uri("/upload")
            .header("content-type", "multipart/form-data; boundary=XyZ")
            .body(full_request_body(form(parts)))
            .unwrap();
        let mut ctx = HttpContext::new(Arc::new(op), req, SmallVec::new());
        decode_input::<UploadInput>(&mut ctx, &registry, &Formats::new(), &plan).await
    }

    #[tokio::test]
    async fn multipart_fills_typed_fields() {
        let input = upload(
            Operation::post("/upload"),
            &[("title", "bolt"), ("count", "3"), ("ids", "1"), ("ids", "2")],
        )
        .await
        .unwrap();
        assert_eq!(input.body.title, "bolt");
        assert_eq!(input.body.count, 3);
        assert_eq!(input.body.ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn multipart_errors_are_located() {
        let err = upload(
            Operation::post("/upload"),
            &[("title", "toolong"), ("count", "x"), ("ids", "1"), ("ids", "y")],
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let found: Vec<(String, String)> = err.to_value()["errors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| {
                (
                    e["message"].as_str().unwrap().to_string(),
                    e["location"].as_str().unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(
            found,
            [
                ("cannot parse integer".to_string(), "body.count".to_string()),
                ("cannot parse integer".to_string(), "body.ids[1]".to_string()),
                ("expected length <= 5".to_string(), "body.title".to_string()),
            ]
        );

        let err = upload(Operation::post("/upload"), &[("title", "a"), ("title", "b")])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_value()["errors"][0]["message"],
            "expected at most one value, but received multiple values"
        );
        assert_eq!(err.to_value()["errors"][0]["location"], "body.title");
    }

    #[tokio::test]
    async fn multipart_validation_can_be_skipped() {
        let op = Operation::post("/upload").skip_validate_body();
        let input = upload(op, &[("title", "toolong")]).await.unwrap();
        assert_eq!(input.body.title, "toolong");
    }

    #[test]
    fn defaults_fill_nested_values() {
        let mut registry = Registry::new();
        let schema = registry.schema_for::<Vec<Item>>().unwrap();
        let mut value = json!([{"name": "a"}, {"name": "b", "qty": 3}]);
        fill_defaults(&registry, &schema, &mut value);
        assert_eq!(value, json!([{"name": "a", "qty": 1}, {"name": "b", "qty": 3}]));
    }
}
