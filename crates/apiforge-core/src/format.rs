//! Body formats
//!
//! A [`Format`] marshals and unmarshals bodies for one media type. Formats
//! are looked up by the exact media type or by a structured-syntax suffix, so
//! `application/merge-patch+json` is handled by the JSON format.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::FormatError;
use crate::negotiation;

/// Encoder and decoder for one media type.
pub trait Format: Send + Sync + 'static {
    fn marshal(&self, value: &Value) -> Result<Vec<u8>, FormatError>;
    fn unmarshal(&self, data: &[u8]) -> Result<Value, FormatError>;
}

/// `application/json`
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormat;

impl Format for JsonFormat {
    fn marshal(&self, value: &Value) -> Result<Vec<u8>, FormatError> {
        serde_json::to_vec(value).map_err(|e| FormatError::Marshal(e.to_string()))
    }

    fn unmarshal(&self, data: &[u8]) -> Result<Value, FormatError> {
        serde_json::from_slice(data).map_err(|e| FormatError::Unmarshal(e.to_string()))
    }
}

/// Registered formats, in preference order.
#[derive(Clone)]
pub struct Formats {
    by_type: IndexMap<String, Arc<dyn Format>>,
    suffixes: IndexMap<String, String>,
    default: String,
}

impl Default for Formats {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Formats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Formats")
            .field("types", &self.by_type.keys().collect::<Vec<_>>())
            .field("default", &self.default)
            .finish()
    }
}

/// Media type without parameters, lower-cased.
pub(crate) fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

impl Formats {
    /// JSON only, as the default.
    pub fn new() -> Self {
        let mut formats = Self {
            by_type: IndexMap::new(),
            suffixes: IndexMap::new(),
            default: "application/json".to_string(),
        };
        formats.insert("application/json", JsonFormat);
        formats.suffix("json", "application/json");
        formats
    }

    /// Register a format for `content_type`.
    pub fn insert(&mut self, content_type: impl Into<String>, format: impl Format) {
        self.by_type.insert(essence(&content_type.into()), Arc::new(format));
    }

    /// Route `+suffix` media types to `content_type`'s format.
    pub fn suffix(&mut self, suffix: impl Into<String>, content_type: impl Into<String>) {
        self.suffixes.insert(suffix.into(), essence(&content_type.into()));
    }

    /// Make `content_type` the type used when the client expresses no preference.
    pub fn set_default(&mut self, content_type: impl Into<String>) {
        self.default = essence(&content_type.into());
    }

    pub fn default_type(&self) -> &str {
        &self.default
    }

    /// Offered types, default first.
    pub fn offered(&self) -> Vec<&str> {
        let mut out = Vec::with_capacity(self.by_type.len());
        if self.by_type.contains_key(&self.default) {
            out.push(self.default.as_str());
        }
        out.extend(
            self.by_type
                .keys()
                .map(String::as_str)
                .filter(|k| *k != self.default),
        );
        out
    }

    /// Format for a request or response content type.
    pub fn get(&self, content_type: &str) -> Option<&Arc<dyn Format>> {
        let essence = essence(content_type);
        if let Some(f) = self.by_type.get(&essence) {
            return Some(f);
        }
        let (_, suffix) = essence.rsplit_once('+')?;
        self.suffixes.get(suffix).and_then(|t| self.by_type.get(t))
    }

    /// Format for a request body. A missing content type means the default.
    pub fn for_request(&self, content_type: Option<&str>) -> Result<&Arc<dyn Format>, FormatError> {
        match content_type.map(str::trim).filter(|c| !c.is_empty()) {
            Some(ct) => self.get(ct).ok_or(FormatError::UnknownContentType),
            None => self.get(&self.default).ok_or(FormatError::UnknownContentType),
        }
    }

    /// Response content type for an `Accept` header.
    pub fn negotiate(&self, accept: Option<&str>) -> Option<String> {
        let offered = self.offered();
        negotiation::negotiate(accept, &offered).map(|n| n.media_type.to_string())
    }
}
