//! Error types for apiforge
//!
//! HTTP-facing errors are RFC 9457 problem documents ([`ApiError`]). Anything
//! that can be written as an error response implements [`StatusError`], and
//! the pipeline creates its own errors through [`new_error`], which routes
//! through a replaceable process-wide factory.

use std::fmt;
use std::sync::RwLock;

use apiforge_openapi::DocumentError;
use apiforge_schema::{Describe, ErrorDetail, FieldDescriptor, SchemaBuildError, Tags, TypeDescriptor, TypeKind};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Result type alias for apiforge handlers
pub type Result<T, E = ApiError> = std::result::Result<T, E>;

/// Media type of JSON problem documents
pub const PROBLEM_JSON: &str = "application/problem+json";

/// An error that knows its HTTP status and how to serialize itself.
pub trait StatusError: fmt::Debug + fmt::Display + Send + Sync + 'static {
    fn status(&self) -> StatusCode;

    /// Wire representation of the error.
    fn to_value(&self) -> Value;

    /// Content type to send, given the negotiated one.
    fn content_type(&self, negotiated: &str) -> String {
        match negotiated {
            "application/json" => PROBLEM_JSON.to_string(),
            "application/cbor" => "application/problem+cbor".to_string(),
            other => other.to_string(),
        }
    }

    /// Extra response headers, e.g. `Retry-After`.
    fn headers(&self) -> Option<&HeaderMap> {
        None
    }
}

impl StatusError for Box<dyn StatusError> {
    fn status(&self) -> StatusCode {
        (**self).status()
    }

    fn to_value(&self) -> Value {
        (**self).to_value()
    }

    fn content_type(&self, negotiated: &str) -> String {
        (**self).content_type(negotiated)
    }

    fn headers(&self) -> Option<&HeaderMap> {
        (**self).headers()
    }
}

fn about_blank() -> String {
    "about:blank".to_string()
}

/// Problem details error
///
/// Serializes as `application/problem+json`:
///
/// ```json
/// {
///   "type": "about:blank",
///   "title": "Unprocessable Entity",
///   "status": 422,
///   "detail": "validation failed",
///   "errors": [{"message": "expected length <= 5", "location": "body.suffix", "value": "toolong"}]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// A URI reference identifying the problem type
    #[serde(rename = "type", default = "about_blank")]
    pub error_type: String,
    /// Short summary, the HTTP reason phrase by default
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    pub status: u16,
    /// Human-readable explanation of this occurrence
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instance: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorDetail>,
    #[serde(skip)]
    pub headers: HeaderMap,
}

impl ApiError {
    /// Create a new API error
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            error_type: about_blank(),
            title: status.canonical_reason().unwrap_or_default().to_string(),
            status: status.as_u16(),
            detail: detail.into(),
            instance: String::new(),
            errors: Vec::new(),
            headers: HeaderMap::new(),
        }
    }

    pub fn with_errors(mut self, errors: Vec<ErrorDetail>) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = error_type.into();
        self
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    /// Send an extra header with the error response
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Append an error detail
    pub fn add(&mut self, detail: ErrorDetail) {
        self.errors.push(detail);
    }

    /// Create a 304 Not Modified response. It is written without a body.
    pub fn not_modified() -> Self {
        Self::new(StatusCode::NOT_MODIFIED, "")
    }

    /// Create a 400 Bad Request error
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    /// Create a 401 Unauthorized error
    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, detail)
    }

    /// Create a 403 Forbidden error
    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, detail)
    }

    /// Create a 404 Not Found error
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }

    /// Create a 409 Conflict error
    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, detail)
    }

    /// Create a 412 Precondition Failed error
    pub fn precondition_failed(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::PRECONDITION_FAILED, detail)
    }

    /// Create a 422 Unprocessable Entity error
    pub fn unprocessable(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, detail)
    }

    /// Create a 500 Internal Server Error
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }

    /// Create a 503 Service Unavailable error
    pub fn service_unavailable(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, detail)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.status, self.title, self.detail)?;
        for detail in &self.errors {
            write!(f, "; {}", detail)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

impl StatusError for ApiError {
    fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn headers(&self) -> Option<&HeaderMap> {
        (!self.headers.is_empty()).then_some(&self.headers)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::bad_request(format!("invalid JSON: {}", err))
    }
}

impl From<ErrorDetail> for ApiError {
    fn from(detail: ErrorDetail) -> Self {
        let status = detail
            .status
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or(StatusCode::UNPROCESSABLE_ENTITY);
        ApiError::new(status, "validation failed").with_errors(vec![detail])
    }
}

impl Describe for ApiError {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::new::<Self>(TypeKind::Object(vec![
            FieldDescriptor::new("error_type", "type", String::describe).with_tags(Tags(&[
                ("doc", "A URI reference to human-readable documentation for the error."),
                ("format", "uri"),
                ("default", "about:blank"),
                ("example", "https://example.com/errors/example"),
                ("omitempty", "true"),
            ])),
            FieldDescriptor::new("title", "title", String::describe).with_tags(Tags(&[
                ("doc", "A short, human-readable summary of the problem type. This value should not change between occurrences of the error."),
                ("example", "Bad Request"),
                ("omitempty", "true"),
            ])),
            FieldDescriptor::new("status", "status", u16::describe).with_tags(Tags(&[
                ("doc", "HTTP status code"),
                ("example", "400"),
                ("omitempty", "true"),
            ])),
            FieldDescriptor::new("detail", "detail", String::describe).with_tags(Tags(&[
                ("doc", "A human-readable explanation specific to this occurrence of the problem."),
                ("example", "Property foo is required but is missing."),
                ("omitempty", "true"),
            ])),
            FieldDescriptor::new("instance", "instance", String::describe).with_tags(Tags(&[
                ("doc", "A URI reference that identifies the specific occurrence of the problem."),
                ("format", "uri"),
                ("example", "https://example.com/error-log/abc123"),
                ("omitempty", "true"),
            ])),
            FieldDescriptor::new("errors", "errors", <Vec<ErrorDetail>>::describe).with_tags(
                Tags(&[
                    ("doc", "Optional list of individual error details"),
                    ("omitempty", "true"),
                ]),
            ),
        ]))
        .named("ErrorModel")
    }
}

/// Builds the error written for pipeline failures.
pub type ErrorFactory = fn(StatusCode, &str, Vec<ErrorDetail>) -> Box<dyn StatusError>;

fn default_error_factory(status: StatusCode, msg: &str, errs: Vec<ErrorDetail>) -> Box<dyn StatusError> {
    Box::new(ApiError::new(status, msg).with_errors(errs))
}

static ERROR_FACTORY: RwLock<ErrorFactory> = RwLock::new(default_error_factory);

/// Create an error through the installed factory.
///
/// ```rust
/// use apiforge_core::{new_error, StatusError};
/// use http::StatusCode;
///
/// let err = new_error(StatusCode::NOT_FOUND, "no such thing", vec![]);
/// assert_eq!(err.status(), StatusCode::NOT_FOUND);
/// assert_eq!(err.to_value()["detail"], "no such thing");
/// ```
pub fn new_error(status: StatusCode, msg: &str, errs: Vec<ErrorDetail>) -> Box<dyn StatusError> {
    let factory = match ERROR_FACTORY.read() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    };
    factory(status, msg, errs)
}

/// Replace the process-wide error factory used by [`new_error`].
pub fn set_error_factory(factory: ErrorFactory) {
    match ERROR_FACTORY.write() {
        Ok(mut guard) => *guard = factory,
        Err(poisoned) => *poisoned.into_inner() = factory,
    }
}

/// Restore the default problem-details factory.
pub fn reset_error_factory() {
    set_error_factory(default_error_factory);
}

/// Failure while registering an operation.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("duplicate operation {method} {path} conflicts with existing {existing}")]
    DuplicateOperation {
        method: String,
        path: String,
        existing: String,
    },

    #[error("path parameter '{param}' is declared by the input but missing from path '{path}'")]
    PathParamNotInTemplate { param: String, path: String },

    #[error("path '{path}' has parameter '{param}' that the input does not declare")]
    PathParamUndeclared { param: String, path: String },

    #[error("invalid path template '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid operation id '{0}'")]
    InvalidOperationId(String),

    #[error("duplicate operation id '{0}'")]
    DuplicateOperationId(String),

    #[error("invalid {kind} type '{type_name}': {reason}")]
    InvalidType {
        kind: &'static str,
        type_name: String,
        reason: String,
    },

    #[error(transparent)]
    Schema(#[from] SchemaBuildError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("route conflict: {0}")]
    Route(String),
}

/// Failure of a body format.
#[derive(Debug, Error)]
pub enum FormatError {
    /// The content type has no registered format.
    #[error("unknown content type")]
    UnknownContentType,

    #[error("{0}")]
    Marshal(String),

    #[error("{0}")]
    Unmarshal(String),
}

/// Failure while serving.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("invalid address: {0}")]
    Addr(#[from] std::net::AddrParseError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A streaming write after the client went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stream closed")]
pub struct StreamClosed;
