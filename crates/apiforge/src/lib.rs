//! # apiforge
//!
//! A declarative HTTP API framework. Describe an operation's input and
//! output as plain Rust types and apiforge derives everything else from
//! them: the OpenAPI 3.1 document and its JSON Schemas, parameter and body
//! decoding, validation with problem-details errors, and content-negotiated
//! responses.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use apiforge::prelude::*;
//!
//! #[derive(Deserialize, Model)]
//! struct GreetingInput {
//!     /// Name to greet
//!     #[field(path, max_length = 30, example = "world")]
//!     name: String,
//! }
//!
//! #[derive(Serialize, Model)]
//! struct GreetingBody {
//!     message: String,
//! }
//!
//! #[derive(Serialize, Model)]
//! struct GreetingOutput {
//!     body: GreetingBody,
//! }
//!
//! async fn greet(input: GreetingInput) -> Result<GreetingOutput> {
//!     Ok(GreetingOutput {
//!         body: GreetingBody { message: format!("Hello, {}!", input.name) },
//!     })
//! }
//!
//! #[apiforge::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let mut api = Api::new(Config::new("Greetings", "1.0.0"));
//!     api.get("/greeting/{name}", greet)?;
//!     api.serve("127.0.0.1:8080").await?;
//!     Ok(())
//! }
//! ```
//!
//! The document is served at `/openapi.json`, the docs UI at `/docs` and
//! each body schema at `/schemas/<Name>.json`.
//!
//! ## Crates
//!
//! - `apiforge-schema` - type descriptors, schema registry and validator
//! - `apiforge-openapi` - the OpenAPI document model and docs pages
//! - `apiforge-core` - registration, request and response pipelines
//! - `apiforge-macros` - `#[derive(Model)]` and `#[apiforge::main]`

// Re-export core functionality
pub use apiforge_core::*;

// Re-export macros
pub use apiforge_macros::{main, Model};

pub use apiforge_schema::{
    default_namer, set_strict_casing, strict_casing, validate, Base64Bytes, Describe,
    ErrorDetail, Mode, Namer, PathBuffer, Registry, Schema, SchemaBuildError, TypeDescriptor,
    ValidateMode, ValidateResult,
};

/// Schema model, descriptors, registry and validator.
pub mod schema {
    pub use apiforge_schema::*;
}

/// OpenAPI document model and docs renderers.
pub mod openapi {
    pub use apiforge_openapi::*;
}

/// Prelude module - import everything you need with `use apiforge::prelude::*`
pub mod prelude {
    pub use apiforge_core::{
        // Errors
        ApiError,
        // API
        Api,
        ApiService,
        Config,
        Context,
        Empty,
        Group,
        Middleware,
        Next,
        Operation,
        Registrar,
        RegistrationError,
        Resolver,
        Result,
        StatusError,
        // Streaming
        StreamResponse,
        StreamWriter,
    };

    pub use apiforge_macros::Model;
    pub use apiforge_openapi::DocsRenderer;
    pub use apiforge_schema::{Base64Bytes, ErrorDetail, PathBuffer};

    // Re-export commonly used external types
    pub use serde::{Deserialize, Serialize};
    pub use tracing::{debug, error, info, trace, warn};
}

/// Paths used by `#[derive(Model)]` output.
#[doc(hidden)]
pub mod __private {
    pub use apiforge_core::{Context, Resolvable, Resolver};
    pub use apiforge_schema::{
        Composition, CompositionKind, Describe, DescribeFn, ErrorDetail, FieldDescriptor,
        PathBuffer, Tags, TypeDescriptor, TypeKind,
    };
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn prelude_imports_work() {
        let _: fn() -> Result<()> = || Ok(());
        let _ = Config::new("Test", "1.0.0");
    }
}
