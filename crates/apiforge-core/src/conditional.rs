//! Conditional requests
//!
//! [`ConditionalParams`] reads `If-Match`, `If-None-Match`,
//! `If-Modified-Since` and `If-Unmodified-Since`. Embed it in an input with
//! `#[serde(flatten)]`, load the resource's current ETag and modification
//! time, and call [`ConditionalParams::precondition_failed`]:
//!
//! ```rust,ignore
//! #[derive(Deserialize, Model)]
//! struct UpdateInput {
//!     #[field(path)]
//!     id: String,
//!     #[serde(flatten)]
//!     cond: ConditionalParams,
//!     body: Thing,
//! }
//!
//! async fn update(input: UpdateInput) -> Result<Empty, ApiError> {
//!     let (etag, modified) = store::version(&input.id).await;
//!     if let Some(err) = input.cond.precondition_failed(&etag, Some(modified)) {
//!         return Err(err);
//!     }
//!     // ...
//! }
//! ```
//!
//! Reads answer 304 Not Modified; writes answer 412 Precondition Failed with
//! one error detail per failed header.

use apiforge_schema::{Describe, ErrorDetail, FieldDescriptor, PathBuffer, Tags, TypeDescriptor, TypeKind};
use chrono::{DateTime, Utc};
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Context;
use crate::error::ApiError;
use crate::resolver::{Resolvable, Resolver};
use crate::response::HTTP_DATE;

/// Conditional request headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionalParams {
    #[serde(default)]
    pub if_match: Vec<String>,
    #[serde(default)]
    pub if_none_match: Vec<String>,
    #[serde(default)]
    pub if_modified_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub if_unmodified_since: Option<DateTime<Utc>>,
    #[serde(skip)]
    is_write: bool,
}

impl Describe for ConditionalParams {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::new::<Self>(TypeKind::Object(vec![
            FieldDescriptor::new("if_match", "if_match", <Vec<String>>::describe).with_tags(Tags(&[
                ("header", "If-Match"),
                ("doc", "Succeeds if the server's resource matches one of the passed values."),
            ])),
            FieldDescriptor::new("if_none_match", "if_none_match", <Vec<String>>::describe).with_tags(Tags(&[
                ("header", "If-None-Match"),
                ("doc", "Succeeds if the server's resource matches none of the passed values. On writes, the special value * may be used to match any existing value."),
            ])),
            FieldDescriptor::new("if_modified_since", "if_modified_since", <Option<DateTime<Utc>>>::describe).with_tags(Tags(&[
                ("header", "If-Modified-Since"),
                ("doc", "Succeeds if the server's resource date is more recent than the passed date."),
            ])),
            FieldDescriptor::new("if_unmodified_since", "if_unmodified_since", <Option<DateTime<Utc>>>::describe).with_tags(Tags(&[
                ("header", "If-Unmodified-Since"),
                ("doc", "Succeeds if the server's resource date is older or the same as the passed date."),
            ])),
        ]))
        .named("ConditionalParams")
    }
}

impl Resolver for ConditionalParams {
    fn resolve(&mut self, ctx: &dyn Context, _path: &PathBuffer) -> Vec<ErrorDetail> {
        self.is_write = matches!(
            *ctx.method(),
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        );
        Vec::new()
    }
}

impl Resolvable for ConditionalParams {
    fn resolve_all(&mut self, ctx: &dyn Context, path: &mut PathBuffer, errs: &mut Vec<ErrorDetail>) {
        errs.extend(self.resolve(ctx, path));
    }
}

/// Strip the weak prefix and quotes from an ETag.
fn trim_etag(value: &str) -> &str {
    let value = match value.strip_prefix("W/") {
        Some(rest) if !rest.is_empty() => rest,
        _ => value,
    };
    value.trim_matches('"')
}

fn http_date(t: &DateTime<Utc>) -> String {
    t.format(HTTP_DATE).to_string()
}

impl ConditionalParams {
    /// Treat the request as a write (412) or read (304) regardless of method.
    pub fn with_write(mut self, is_write: bool) -> Self {
        self.is_write = is_write;
        self
    }

    pub fn is_write(&self) -> bool {
        self.is_write
    }

    /// Whether any conditional header was sent.
    pub fn has_conditional_params(&self) -> bool {
        !self.if_match.is_empty()
            || !self.if_none_match.is_empty()
            || self.if_modified_since.is_some()
            || self.if_unmodified_since.is_some()
    }

    /// Check the headers against the resource's current `etag` and
    /// modification time. An empty `etag` means the resource does not exist.
    /// Returns `None` when the request may proceed.
    pub fn precondition_failed(&self, etag: &str, modified: Option<DateTime<Utc>>) -> Option<ApiError> {
        let mut failed = false;
        let mut errors = Vec::new();

        let found = if etag.is_empty() {
            "found no existing resource".to_string()
        } else {
            format!("found resource with ETag {}", etag)
        };

        for value in &self.if_none_match {
            let trimmed = trim_etag(value);
            if trimmed == etag || (trimmed == "*" && !etag.is_empty()) {
                if self.is_write {
                    errors.push(
                        ErrorDetail::new(format!("If-None-Match: {} precondition failed, {}", value, found))
                            .with_location("request.headers.If-None-Match")
                            .with_value(value.as_str()),
                    );
                }
                failed = true;
            }
        }

        if !self.if_match.is_empty() && !self.if_match.iter().any(|m| trim_etag(m) == etag) {
            if self.is_write {
                errors.push(
                    ErrorDetail::new(format!("If-Match precondition failed, {}", found))
                        .with_location("request.headers.If-Match")
                        .with_value(Value::from(self.if_match.clone())),
                );
            }
            failed = true;
        }

        let modified_at = modified.map(|m| http_date(&m)).unwrap_or_default();

        if let Some(since) = &self.if_modified_since {
            if !modified.map_or(false, |m| m > *since) {
                if self.is_write {
                    errors.push(
                        ErrorDetail::new(format!(
                            "If-Modified-Since: {} precondition failed, resource was modified at {}",
                            http_date(since),
                            modified_at
                        ))
                        .with_location("request.headers.If-Modified-Since")
                        .with_value(http_date(since)),
                    );
                }
                failed = true;
            }
        }

        if let Some(since) = &self.if_unmodified_since {
            if modified.map_or(false, |m| m > *since) {
                if self.is_write {
                    errors.push(
                        ErrorDetail::new(format!(
                            "If-Unmodified-Since: {} precondition failed, resource was modified at {}",
                            http_date(since),
                            modified_at
                        ))
                        .with_location("request.headers.If-Unmodified-Since")
                        .with_value(http_date(since)),
                    );
                }
                failed = true;
            }
        }

        if !failed {
            return None;
        }
        if self.is_write {
            return Some(ApiError::precondition_failed("Precondition Failed").with_errors(errors));
        }
        Some(ApiError::not_modified())
    }
}
