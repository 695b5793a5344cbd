//! `multipart/form-data` bodies
//!
//! Forms are parsed in memory, after the body limiter has capped their size.
//! Text parts land in [`MultipartForm::values`], parts with a filename in
//! [`MultipartForm::files`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use apiforge_schema::{Describe, InstanceType, Registry, Schema, TypeDescriptor, TypeKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of parts in one form
pub const MAX_PARTS: usize = 1000;

/// Failure while parsing a form.
#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("malformed multipart body: {0}")]
    Malformed(&'static str),

    #[error("too many parts, limit is {0}")]
    TooManyParts(usize),
}

/// An uploaded file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormFile {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl FormFile {
    /// Filename with path separators and parent references removed.
    pub fn safe_filename(&self) -> String {
        sanitize_filename(&self.filename)
    }

    /// Write the file into `dir` under its sanitized name and return the path.
    pub async fn save_to(&self, dir: impl AsRef<Path>) -> std::io::Result<PathBuf> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(self.safe_filename());
        tokio::fs::write(&path, &self.data).await?;
        Ok(path)
    }
}

/// A parsed form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartForm {
    pub values: BTreeMap<String, Vec<String>>,
    pub files: BTreeMap<String, Vec<FormFile>>,
}

impl MultipartForm {
    /// First text value for `name`.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    /// First file for `name`.
    pub fn file(&self, name: &str) -> Option<&FormFile> {
        self.files.get(name).and_then(|f| f.first())
    }
}

fn form_schema(_: &mut Registry) -> Schema {
    let mut s = Schema::new(InstanceType::Object);
    s.description = Some("multipart/form-data request body".to_string());
    s
}

impl Describe for MultipartForm {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::new::<Self>(TypeKind::Custom(form_schema))
    }
}

fn sanitize_filename(filename: &str) -> String {
    filename
        .replace(['/', '\\'], "_")
        .replace("..", "_")
        .trim_start_matches('.')
        .to_string()
}

/// Boundary parameter of a `multipart/form-data` content type.
pub fn extract_boundary(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"').to_string())
            .filter(|b| !b.is_empty())
    })
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn strip_newline(data: &[u8], at: usize) -> usize {
    if data[at..].starts_with(b"\r\n") {
        at + 2
    } else if data[at..].starts_with(b"\n") {
        at + 1
    } else {
        at
    }
}

#[derive(Default)]
struct PartHeaders {
    name: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
}

fn parse_headers(raw: &[u8]) -> PartHeaders {
    let mut out = PartHeaders::default();
    for line in String::from_utf8_lossy(raw).lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if key.trim().eq_ignore_ascii_case("content-disposition") {
            for param in value.split(';').skip(1) {
                let Some((k, v)) = param.trim().split_once('=') else {
                    continue;
                };
                let v = v.trim().trim_matches('"').to_string();
                match k.trim().to_ascii_lowercase().as_str() {
                    "name" => out.name = Some(v),
                    "filename" => out.filename = Some(v),
                    _ => {}
                }
            }
        } else if key.trim().eq_ignore_ascii_case("content-type") {
            out.content_type = Some(value.to_string());
        }
    }
    out
}

/// Parse a complete form body.
pub fn parse(body: &[u8], boundary: &str) -> Result<MultipartForm, MultipartError> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut form = MultipartForm::default();
    let mut parts = 0;

    let mut pos = find(body, &delimiter, 0).ok_or(MultipartError::Malformed("missing boundary"))?;
    loop {
        pos += delimiter.len();
        if body[pos..].starts_with(b"--") {
            return Ok(form);
        }
        pos = strip_newline(body, pos);

        let (header_end, data_start) = match find(body, b"\r\n\r\n", pos) {
            Some(i) => (i, i + 4),
            None => match find(body, b"\n\n", pos) {
                Some(i) => (i, i + 2),
                None => return Err(MultipartError::Malformed("unterminated part headers")),
            },
        };
        let headers = parse_headers(&body[pos..header_end]);

        let next = find(body, &delimiter, data_start)
            .ok_or(MultipartError::Malformed("missing closing boundary"))?;
        let mut data_end = next;
        if data_end >= data_start + 2 && &body[data_end - 2..data_end] == b"\r\n" {
            data_end -= 2;
        } else if data_end > data_start && body[data_end - 1] == b'\n' {
            data_end -= 1;
        }
        let data = &body[data_start..data_end];

        parts += 1;
        if parts > MAX_PARTS {
            return Err(MultipartError::TooManyParts(MAX_PARTS));
        }

        let name = headers.name.unwrap_or_default();
        match headers.filename {
            Some(filename) => form.files.entry(name).or_default().push(FormFile {
                filename,
                content_type: headers.content_type,
                data: data.to_vec(),
            }),
            None => form
                .values
                .entry(name)
                .or_default()
                .push(String::from_utf8_lossy(data).into_owned()),
        }
        pos = next;
    }
}
