//! Operations
//!
//! An [`Operation`] is one HTTP method on one path template, together with
//! everything needed to document and serve it. Operations are configured
//! with builder methods, handed to [`Api::register`](crate::Api::register)
//! and are immutable (shared through `Arc`) once registered.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use apiforge_openapi::{ExternalDocs, Response, SecurityRequirement, Server};
use heck::ToKebabCase;
use http::Method;
use regex::Regex;
use serde_json::Value;

use crate::middleware::Middleware;

/// Default request body cap, 1 MiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Default body read timeout.
pub const DEFAULT_BODY_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// A single API operation.
#[derive(Clone)]
pub struct Operation {
    pub method: Method,
    pub path: String,
    /// Generated from method and path when left empty.
    pub operation_id: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub external_docs: Option<ExternalDocs>,
    pub deprecated: bool,
    /// Success status when the output carries no `status` field.
    pub default_status: Option<u16>,
    /// Error statuses to document.
    pub errors: Vec<u16>,
    /// Extra documented responses, keyed by status code or `default`.
    pub responses: BTreeMap<String, Response>,
    pub security: Vec<SecurityRequirement>,
    pub servers: Vec<Server>,
    /// `None` disables the body limit.
    pub max_body_bytes: Option<usize>,
    /// `None` disables the read deadline.
    pub body_read_timeout: Option<Duration>,
    pub skip_validate_params: bool,
    pub skip_validate_body: bool,
    /// Served but left out of the OpenAPI document.
    pub hidden: bool,
    /// `x-` extensions.
    pub extensions: BTreeMap<String, Value>,
    pub middlewares: Vec<Arc<dyn Middleware>>,
    /// Schema name of the default response body, set at registration.
    pub(crate) body_schema: Option<String>,
    /// Fill in a generated summary when none is set.
    pub(crate) auto_summary: bool,
}

impl Operation {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            operation_id: String::new(),
            summary: None,
            description: None,
            tags: Vec::new(),
            external_docs: None,
            deprecated: false,
            default_status: None,
            errors: Vec::new(),
            responses: BTreeMap::new(),
            security: Vec::new(),
            servers: Vec::new(),
            max_body_bytes: Some(DEFAULT_MAX_BODY_BYTES),
            body_read_timeout: Some(DEFAULT_BODY_READ_TIMEOUT),
            skip_validate_params: false,
            skip_validate_body: false,
            hidden: false,
            extensions: BTreeMap::new(),
            middlewares: Vec::new(),
            body_schema: None,
            auto_summary: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn head(path: impl Into<String>) -> Self {
        Self::new(Method::HEAD, path)
    }

    pub fn operation_id(mut self, id: impl Into<String>) -> Self {
        self.operation_id = id.into();
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn external_docs(mut self, docs: ExternalDocs) -> Self {
        self.external_docs = Some(docs);
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    pub fn default_status(mut self, status: u16) -> Self {
        self.default_status = Some(status);
        self
    }

    /// Document the given error statuses.
    pub fn errors(mut self, statuses: &[u16]) -> Self {
        self.errors.extend_from_slice(statuses);
        self
    }

    pub fn response(mut self, status: impl Into<String>, response: Response) -> Self {
        self.responses.insert(status.into(), response);
        self
    }

    /// Require a security scheme with the given scopes.
    pub fn security(mut self, scheme: impl Into<String>, scopes: &[&str]) -> Self {
        let mut req = SecurityRequirement::new();
        req.insert(scheme.into(), scopes.iter().map(|s| s.to_string()).collect());
        self.security.push(req);
        self
    }

    pub fn server(mut self, server: Server) -> Self {
        self.servers.push(server);
        self
    }

    /// Cap the request body. Zero disables the limit.
    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = (limit > 0).then_some(limit);
        self
    }

    pub fn no_max_body(mut self) -> Self {
        self.max_body_bytes = None;
        self
    }

    /// Deadline for reading the whole body. Zero disables it.
    pub fn body_read_timeout(mut self, timeout: Duration) -> Self {
        self.body_read_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    pub fn no_body_read_timeout(mut self) -> Self {
        self.body_read_timeout = None;
        self
    }

    pub fn skip_validate_params(mut self) -> Self {
        self.skip_validate_params = true;
        self
    }

    pub fn skip_validate_body(mut self) -> Self {
        self.skip_validate_body = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Add an `x-` extension. The prefix is added when missing.
    pub fn extension(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let key = if key.starts_with("x-") { key } else { format!("x-{}", key) };
        self.extensions.insert(key, value.into());
        self
    }

    /// Run `middleware` for this operation, after the API-wide ones.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Schema name of the default response body, once registered.
    pub fn body_schema(&self) -> Option<&str> {
        self.body_schema.as_deref()
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("operation_id", &self.operation_id)
            .field("default_status", &self.default_status)
            .field("hidden", &self.hidden)
            .field("middlewares", &self.middlewares.len())
            .finish_non_exhaustive()
    }
}

fn operation_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z]([a-zA-Z0-9-_]*[a-zA-Z0-9])?$").unwrap())
}

fn path_params_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([^}.]+)(\.\.\.)?\}").unwrap())
}

/// Whether `id` is usable as an operation id.
pub fn is_valid_operation_id(id: &str) -> bool {
    operation_id_regex().is_match(id)
}

fn phrase(method: &Method, path: &str, list: bool) -> String {
    let action = if list && method == Method::GET {
        "list".to_string()
    } else {
        method.as_str().to_ascii_lowercase()
    };
    let path = path_params_regex().replace_all(path, " by $1 ");
    let path: String = path
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect();
    format!("{} {}", action, path)
}

/// Kebab-case operation id from method and path. `list` marks a GET whose
/// body is an array.
///
/// ```rust
/// use apiforge_core::generate_operation_id;
/// use http::Method;
///
/// assert_eq!(generate_operation_id(&Method::GET, "/greeting/{name}", false), "get-greeting-by-name");
/// assert_eq!(generate_operation_id(&Method::GET, "/things", true), "list-things");
/// ```
pub fn generate_operation_id(method: &Method, path: &str, list: bool) -> String {
    phrase(method, path, list).to_kebab_case()
}

/// Human-readable summary from method and path, e.g. `Get greeting by name`.
pub fn generate_summary(method: &Method, path: &str, list: bool) -> String {
    let words = phrase(method, path, list).to_kebab_case().replace('-', " ");
    let mut chars = words.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => words,
    }
}
