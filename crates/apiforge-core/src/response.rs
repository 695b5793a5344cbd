//! Response pipeline
//!
//! Turns a handler's output (already serialized to a `serde_json::Value`)
//! into status, headers and body: header fields are written first, then the
//! status, then the body is negotiated, transformed and marshaled.

use std::sync::Arc;

use apiforge_schema::ErrorDetail;
use chrono::{DateTime, Utc};
use http::header::{HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use http::StatusCode;
use serde_json::{Map, Value};
use tracing::error;

use crate::context::Context;
use crate::error::{new_error, StatusError};
use crate::format::Formats;
use crate::register::OutputPlan;
use crate::transform::Transformer;

/// RFC 1123 date layout used on the wire.
pub(crate) const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

const OCTET_STREAM: &str = "application/octet-stream";

/// Write `err` as a problem document in the negotiated format.
pub(crate) fn write_error(ctx: &mut dyn Context, formats: &Formats, err: &dyn StatusError) {
    let status = err.status();
    ctx.set_status(status);
    if let Some(headers) = err.headers() {
        for (name, value) in headers {
            ctx.append_header(name.clone(), value.clone());
        }
    }
    if status == StatusCode::NOT_MODIFIED {
        return;
    }

    let negotiated = formats
        .negotiate(ctx.header(ACCEPT.as_str()))
        .unwrap_or_else(|| "application/json".to_string());
    let format = formats
        .get(&negotiated)
        .or_else(|| formats.get("application/json"));
    let body = match format.map(|f| f.marshal(&err.to_value())) {
        Some(Ok(body)) => body,
        Some(Err(e)) => {
            error!(error = %e, "cannot marshal error response");
            return;
        }
        None => serde_json::to_vec(&err.to_value()).unwrap_or_default(),
    };

    if let Ok(ct) = HeaderValue::from_str(&err.content_type(&negotiated)) {
        ctx.set_header(CONTENT_TYPE, ct);
    }
    ctx.body_writer().extend_from_slice(&body);
}

fn header_text(value: &Value, is_time: bool) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if is_time => Some(
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc).format(HTTP_DATE).to_string())
                .unwrap_or_else(|_| s.clone()),
        ),
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        other => serde_json::to_string(other).ok(),
    }
}

fn write_headers(ctx: &mut dyn Context, plan: &OutputPlan, out: &mut Map<String, Value>) {
    for h in &plan.headers {
        let Some(value) = out.remove(h.field) else {
            continue;
        };
        let Ok(name) = HeaderName::from_bytes(h.name.as_bytes()) else {
            continue;
        };
        let values = match value {
            Value::Array(items) => items,
            single => vec![single],
        };
        for item in &values {
            let Some(text) = header_text(item, h.is_time) else {
                continue;
            };
            match HeaderValue::from_str(&text) {
                Ok(v) => ctx.append_header(name.clone(), v),
                Err(err) => tracing::warn!(header = %h.name, error = %err, "skipping invalid response header"),
            }
        }
    }
}

fn status_from(plan: &OutputPlan, out: &mut Map<String, Value>) -> StatusCode {
    let dynamic = plan
        .status_field
        .and_then(|f| out.remove(f))
        .and_then(|v| v.as_u64())
        .filter(|s| *s != 0)
        .and_then(|s| u16::try_from(s).ok())
        .and_then(|s| StatusCode::from_u16(s).ok());
    dynamic
        .or_else(|| StatusCode::from_u16(plan.default_status).ok())
        .unwrap_or(StatusCode::OK)
}

fn prefers_minimal(ctx: &dyn Context) -> bool {
    ctx.header_values("prefer").iter().any(|p| {
        p.split(',')
            .any(|pref| pref.trim().eq_ignore_ascii_case("return=minimal"))
    })
}

/// Bytes of a serialized `Vec<u8>`.
fn raw_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
            .collect(),
        Value::String(s) => Some(s.as_bytes().to_vec()),
        _ => None,
    }
}

/// Write a handler's output.
pub(crate) fn write_output(
    ctx: &mut dyn Context,
    plan: &OutputPlan,
    formats: &Formats,
    transformers: &[Arc<dyn Transformer>],
    output: Value,
) {
    let mut out = match output {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    write_headers(ctx, plan, &mut out);
    let status = status_from(plan, &mut out);

    let body = plan
        .body
        .as_ref()
        .and_then(|b| out.remove(b.field).map(|v| (b, v)))
        .filter(|(_, v)| !v.is_null());
    let Some((spec, body)) = body else {
        ctx.set_status(status);
        return;
    };

    if status.is_success() && prefers_minimal(ctx) {
        ctx.set_status(StatusCode::NO_CONTENT);
        return;
    }

    if spec.raw {
        let Some(bytes) = raw_bytes(&body) else {
            let err = new_error(StatusCode::INTERNAL_SERVER_ERROR, "unable to marshal response", vec![]);
            return write_error(ctx, formats, &err);
        };
        if !ctx.response_headers().contains_key(CONTENT_TYPE) {
            let ct = spec.content_type.as_deref().unwrap_or(OCTET_STREAM);
            if let Ok(ct) = HeaderValue::from_str(ct) {
                ctx.set_header(CONTENT_TYPE, ct);
            }
        }
        ctx.set_status(status);
        ctx.body_writer().extend_from_slice(&bytes);
        return;
    }

    let explicit = ctx
        .response_headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let content_type = match explicit {
        Some(ct) => ct,
        None => match formats.negotiate(ctx.header(ACCEPT.as_str())) {
            Some(ct) => ct,
            None => {
                let err = new_error(
                    StatusCode::NOT_ACCEPTABLE,
                    "unable to marshal response",
                    vec![ErrorDetail::new(format!(
                        "no format matches accept header {}",
                        ctx.header(ACCEPT.as_str()).unwrap_or("")
                    ))],
                );
                return write_error(ctx, formats, &err);
            }
        },
    };

    let status_text = status.as_u16().to_string();
    let mut body = body;
    for t in transformers {
        body = match t.transform(ctx, &status_text, body) {
            Ok(v) => v,
            Err(err) => {
                error!(error = %err, "response transformer failed");
                let err = new_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "error transforming response",
                    vec![ErrorDetail::new(err.detail)],
                );
                return write_error(ctx, formats, &err);
            }
        };
    }

    let Some(format) = formats.get(&content_type) else {
        error!(content_type = %content_type, "no format registered for response content type");
        let err = new_error(StatusCode::INTERNAL_SERVER_ERROR, "unable to marshal response", vec![]);
        return write_error(ctx, formats, &err);
    };
    let bytes = match format.marshal(&body) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(error = %err, content_type = %content_type, "cannot marshal response");
            let err = new_error(StatusCode::INTERNAL_SERVER_ERROR, "unable to marshal response", vec![]);
            return write_error(ctx, formats, &err);
        }
    };

    if !ctx.response_headers().contains_key(CONTENT_TYPE) {
        if let Ok(ct) = HeaderValue::from_str(&content_type) {
            ctx.set_header(CONTENT_TYPE, ct);
        }
    }
    ctx.set_status(status);
    ctx.body_writer().extend_from_slice(&bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::HttpContext;
    use crate::body::full_request_body;
    use crate::error::ApiError;
    use crate::operation::Operation;
    use crate::register::{OutputBody, OutputHeader};
    use crate::transform::FnTransformer;
    use serde_json::json;
    use smallvec::SmallVec;

    fn ctx(headers: &[(&str, &str)]) -> HttpContext {
        let mut req = http::Request::builder().uri("/");
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        HttpContext::new(
            Arc::new(Operation::get("/")),
            req.body(full_request_body("")).unwrap(),
            SmallVec::new(),
        )
    }

    fn plan() -> OutputPlan {
        OutputPlan {
            headers: vec![
                OutputHeader {
                    field: "etag",
                    name: "ETag".into(),
                    is_time: false,
                },
                OutputHeader {
                    field: "modified",
                    name: "Last-Modified".into(),
                    is_time: true,
                },
                OutputHeader {
                    field: "links",
                    name: "Link".into(),
                    is_time: false,
                },
            ],
            status_field: Some("status"),
            body: Some(OutputBody {
                field: "body",
                schema: None,
                raw: false,
                content_type: None,
            }),
            default_status: 200,
            ..Default::default()
        }
    }

    fn text(ctx: &mut HttpContext) -> String {
        String::from_utf8(ctx.body_writer().to_vec()).unwrap()
    }

    #[test]
    fn headers_status_and_body() {
        let mut ctx = ctx(&[]);
        let out = json!({
            "etag": "abc",
            "modified": "2006-01-02T15:04:05Z",
            "links": ["<a>", "<b>"],
            "status": 0,
            "body": {"ok": true}
        });
        write_output(&mut ctx, &plan(), &Formats::new(), &[], out);

        assert_eq!(ctx.status(), StatusCode::OK);
        let headers = ctx.response_headers();
        assert_eq!(headers["etag"], "abc");
        assert_eq!(headers["last-modified"], "Mon, 02 Jan 2006 15:04:05 GMT");
        assert_eq!(headers.get_all("link").iter().count(), 2);
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(text(&mut ctx), r#"{"ok":true}"#);
    }

    #[test]
    fn dynamic_status_and_missing_body() {
        let mut ctx = ctx(&[]);
        write_output(&mut ctx, &plan(), &Formats::new(), &[], json!({"status": 202, "etag": null}));
        assert_eq!(ctx.status(), StatusCode::ACCEPTED);
        assert!(ctx.response_headers().get("etag").is_none());
        assert!(ctx.body_writer().is_empty());
    }

    #[test]
    fn prefer_minimal_drops_body() {
        let mut ctx = ctx(&[("prefer", "respond-async, return=minimal")]);
        write_output(&mut ctx, &plan(), &Formats::new(), &[], json!({"body": {"a": 1}}));
        assert_eq!(ctx.status(), StatusCode::NO_CONTENT);
        assert!(ctx.body_writer().is_empty());
    }

    #[test]
    fn unacceptable_is_406() {
        let mut ctx = ctx(&[("accept", "application/xml")]);
        write_output(&mut ctx, &plan(), &Formats::new(), &[], json!({"body": {"a": 1}}));
        assert_eq!(ctx.status(), StatusCode::NOT_ACCEPTABLE);
        assert_eq!(ctx.response_headers()[CONTENT_TYPE], "application/problem+json");
        assert!(text(&mut ctx).contains("unable to marshal response"));
    }

    #[test]
    fn raw_bodies_skip_marshaling() {
        let mut p = plan();
        if let Some(b) = p.body.as_mut() {
            b.raw = true;
        }
        let mut ctx = ctx(&[]);
        write_output(&mut ctx, &p, &Formats::new(), &[], json!({"body": [104, 105]}));
        assert_eq!(ctx.response_headers()[CONTENT_TYPE], "application/octet-stream");
        assert_eq!(text(&mut ctx), "hi");
    }

    #[test]
    fn transformers_run_in_order() {
        let add = |key: &'static str| -> Arc<dyn Transformer> {
            Arc::new(FnTransformer(
                move |_ctx: &mut dyn Context, _status: &str, mut v: Value| -> Result<Value, ApiError> {
                    v[key] = json!(true);
                    Ok(v)
                },
            ))
        };
        let mut ctx = ctx(&[]);
        write_output(&mut ctx, &plan(), &Formats::new(), &[add("a"), add("b")], json!({"body": {}}));
        assert_eq!(text(&mut ctx), r#"{"a":true,"b":true}"#);

        let failing: Arc<dyn Transformer> = Arc::new(FnTransformer(
            |_ctx: &mut dyn Context, _status: &str, _v: Value| -> Result<Value, ApiError> {
                Err(ApiError::internal("boom"))
            },
        ));
        let mut ctx = self::ctx(&[]);
        write_output(&mut ctx, &plan(), &Formats::new(), &[failing], json!({"body": {}}));
        assert_eq!(ctx.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn errors_keep_headers_and_304_has_no_body() {
        let mut ctx = ctx(&[]);
        let err = ApiError::service_unavailable("later")
            .with_header(HeaderName::from_static("retry-after"), HeaderValue::from_static("30"));
        write_error(&mut ctx, &Formats::new(), &err);
        assert_eq!(ctx.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ctx.response_headers()["retry-after"], "30");
        assert!(text(&mut ctx).contains("\"detail\":\"later\""));

        let mut ctx = self::ctx(&[]);
        write_error(&mut ctx, &Formats::new(), &ApiError::not_modified());
        assert_eq!(ctx.status(), StatusCode::NOT_MODIFIED);
        assert!(ctx.body_writer().is_empty());
    }
}
