//! # apiforge schema
//!
//! JSON Schema generation and validation for apiforge.
//!
//! Types describe themselves through [`Describe`]. The [`Registry`] turns
//! those descriptors into named, `$ref`-able OpenAPI 3.1 schemas, and
//! [`validate`] checks decoded JSON values against them, collecting every
//! violation with its full location.
//!
//! ## Example
//!
//! ```rust
//! use apiforge_schema::{validate, PathBuffer, Registry, ValidateMode, ValidateResult};
//! use serde_json::json;
//!
//! let mut registry = Registry::new();
//! let schema = registry.schema_for::<Vec<u8>>().unwrap();
//!
//! let mut path = PathBuffer::new();
//! path.push("body");
//! let mut res = ValidateResult::new();
//! validate(&registry, &schema, &mut path, ValidateMode::WriteToServer, &json!([1, -3]), &mut res);
//!
//! assert_eq!(res.errors[0].location, "body[1]");
//! assert_eq!(res.errors[0].message, "expected number >= 0");
//! ```
//!
//! ## Metadata tags
//!
//! Field descriptors carry `(key, value)` tags such as `maxLength = "5"`,
//! `readOnly = "true"` or `json = "name,omitempty"`. `#[derive(Model)]`
//! produces them from `#[field(...)]` attributes.

mod builder;
mod descriptor;
mod error;
pub mod messages;
mod path_buffer;
mod registry;
mod schema;
mod validate;

pub use builder::{schema_from_field, schema_from_type, Mode};
pub use descriptor::{
    Base64Bytes, Composition, CompositionKind, Describe, DescribeFn, FieldDescriptor,
    SchemaTransform, Tags, TypeDescriptor, TypeKind,
};
pub use error::SchemaBuildError;
pub use path_buffer::PathBuffer;
pub use registry::{default_namer, Namer, Registry, SCHEMA_REF_PREFIX};
pub use schema::{AdditionalProperties, Discriminator, InstanceType, Schema, SchemaType};
pub use validate::{
    canonicalize_keys, set_strict_casing, strict_casing, validate, validate_format, ErrorDetail,
    ValidateMode, ValidateResult,
};
