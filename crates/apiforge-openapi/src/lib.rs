//! OpenAPI documents for apiforge
//!
//! This crate holds the OpenAPI 3.1 document model that apiforge assembles
//! while operations are registered, plus the pieces needed to serve it:
//!
//! - Deterministic JSON and YAML rendering
//! - A 3.0.3 downgrade view for older tooling
//! - Documentation UI pages (Stoplight Elements, Swagger UI, ReDoc, Scalar)
//!
//! # Usage
//!
//! ```rust
//! use apiforge_openapi::{OpenApi, Operation, Response};
//!
//! let mut doc = OpenApi::new("Example API", "1.0.0");
//! let mut op = Operation::default();
//! op.operation_id = "get-greeting".into();
//! op.responses.insert("200".into(), Response::new("OK"));
//! doc.add_operation("GET", "/greeting/{name}", op).unwrap();
//!
//! let json = doc.to_json().unwrap();
//! let legacy = doc.downgrade_yaml().unwrap();
//! assert!(legacy.contains("openapi: 3.0.3"));
//! # let _ = json;
//! ```

mod docs;
mod downgrade;
mod error;
mod spec;

pub use docs::DocsRenderer;
pub use error::DocumentError;
pub use spec::{
    Components, Contact, Encoding, Example, Extensions, ExternalDocs, Header, Info, License,
    Link, MediaType, OAuthFlow, OAuthFlows, OpenApi, Operation, Param, PathItem, RequestBody,
    Response, SecurityRequirement, SecurityScheme, Server, ServerVariable, Tag,
};

/// Media type for the JSON rendering of the document
pub const OPENAPI_JSON: &str = "application/vnd.oai.openapi+json";

/// Media type for the YAML rendering of the document
pub const OPENAPI_YAML: &str = "application/vnd.oai.openapi+yaml";
