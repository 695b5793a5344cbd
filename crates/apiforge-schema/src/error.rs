//! Schema generation errors.

use thiserror::Error;

/// Failure while deriving a schema from a type descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaBuildError {
    /// Two different types resolved to the same schema name.
    #[error("duplicate schema name: {name}, new type: {new_type}, existing type: {existing_type}")]
    DuplicateName {
        name: String,
        new_type: String,
        existing_type: String,
    },

    /// The type has no JSON Schema representation.
    #[error("unsupported type '{type_name}' at '{path}'")]
    Unsupported { type_name: String, path: String },

    /// A metadata tag value could not be applied.
    #[error("invalid {tag} tag value '{value}' for field '{field}': {reason}")]
    InvalidTag {
        field: String,
        tag: String,
        value: String,
        reason: String,
    },

    /// A `dependentRequired` entry names a field the struct does not have.
    #[error("dependent field '{dependent}' for field '{field}' does not exist")]
    UnknownDependency { field: String, dependent: String },
}

impl SchemaBuildError {
    pub(crate) fn invalid_tag(
        field: &str,
        tag: &str,
        value: &str,
        reason: impl ToString,
    ) -> Self {
        Self::InvalidTag {
            field: field.to_string(),
            tag: tag.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}
