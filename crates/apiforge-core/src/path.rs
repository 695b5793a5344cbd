//! Path templates
//!
//! Templates are `/`-separated segments. A segment is a literal, a parameter
//! `{name}`, or a greedy capture `{name...}` which must be the last segment.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::RegistrationError;

fn param_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_-]*$").unwrap())
}

/// One segment of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
    /// Matches the rest of the path, slashes included.
    CatchAll(String),
}

/// A parsed path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parse and validate a template.
    ///
    /// ```rust
    /// use apiforge_core::PathTemplate;
    ///
    /// let t = PathTemplate::parse("/files/{bucket}/{key...}").unwrap();
    /// assert_eq!(t.params().collect::<Vec<_>>(), ["bucket", "key"]);
    /// assert_eq!(t.router_path(), "/files/:bucket/*key");
    /// assert!(PathTemplate::parse("/files/{key...}/meta").is_err());
    /// ```
    pub fn parse(path: &str) -> Result<Self, RegistrationError> {
        let invalid = |reason: String| RegistrationError::InvalidPath {
            path: path.to_string(),
            reason,
        };

        if !path.starts_with('/') {
            return Err(invalid("must start with '/'".into()));
        }

        let mut segments = Vec::new();
        let parts: Vec<&str> = path[1..].split('/').collect();
        let last = parts.len() - 1;
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() {
                if i == last {
                    // Trailing slash or the root path.
                    continue;
                }
                return Err(invalid("empty segment".into()));
            }

            if let Some(inner) = part.strip_prefix('{') {
                let name = inner
                    .strip_suffix('}')
                    .ok_or_else(|| invalid(format!("unclosed parameter in segment '{}'", part)))?;
                let (name, greedy) = match name.strip_suffix("...") {
                    Some(n) => (n, true),
                    None => (name, false),
                };
                if !param_name_regex().is_match(name) {
                    return Err(invalid(format!("invalid parameter name '{}'", name)));
                }
                if segments.iter().any(|s| matches!(s, Segment::Param(n) | Segment::CatchAll(n) if n == name)) {
                    return Err(invalid(format!("parameter '{}' appears twice", name)));
                }
                if greedy {
                    if i != last {
                        return Err(invalid(format!("greedy parameter '{}' must be last", name)));
                    }
                    segments.push(Segment::CatchAll(name.to_string()));
                } else {
                    segments.push(Segment::Param(name.to_string()));
                }
                continue;
            }

            if let Some(c) = part.chars().find(|c| matches!(c, '{' | '}' | ':' | '*')) {
                return Err(invalid(format!("invalid character '{}' in segment '{}'", c, part)));
            }
            segments.push(Segment::Literal(part.to_string()));
        }

        Ok(Self {
            raw: path.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Parameter names in template order.
    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(n) | Segment::CatchAll(n) => Some(n.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// The template in matchit syntax.
    pub fn router_path(&self) -> String {
        self.render(|name| format!(":{}", name), |name| format!("*{}", name))
    }

    /// The template with parameter names erased, so `/a/{x}` and `/a/{y}`
    /// compare equal.
    pub fn normalized(&self) -> String {
        self.render(|_| "{}".to_string(), |_| "{...}".to_string())
    }

    fn render(&self, param: impl Fn(&str) -> String, catch_all: impl Fn(&str) -> String) -> String {
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            out.push('/');
            match segment {
                Segment::Literal(l) => out.push_str(l),
                Segment::Param(n) => out.push_str(&param(n)),
                Segment::CatchAll(n) => out.push_str(&catch_all(n)),
            }
        }
        if out.is_empty() || (self.raw.ends_with('/') && self.raw.len() > 1) {
            out.push('/');
        }
        out
    }
}

/// Join a group prefix and an operation path.
pub(crate) fn join(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return path.to_string();
    }
    let prefix = if prefix.starts_with('/') {
        prefix.to_string()
    } else {
        format!("/{}", prefix)
    };
    if path == "/" || path.is_empty() {
        prefix
    } else {
        format!("{}{}", prefix, path)
    }
}
