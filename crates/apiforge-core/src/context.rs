//! Per-request context
//!
//! [`Context`] is the contract between the request pipeline and whatever
//! HTTP router carries the request. The default implementation lives in the
//! [`adapter`](crate::adapter) module.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::{Extensions, HeaderMap, Method, StatusCode, Uri};
use thiserror::Error;
use tokio::time::Instant;

use crate::body::BodyStream;
use crate::format::essence;
use crate::multipart::{self, MultipartForm};
use crate::operation::Operation;

/// Failure while reading a request body.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("request body is too large limit={limit} bytes")]
    TooLarge { limit: usize },

    #[error("request body read timeout")]
    Timeout,

    #[error("cannot read request body: {0}")]
    Read(String),

    #[error("{0}")]
    Multipart(String),
}

/// Request accessors and response writers for one request.
#[async_trait]
pub trait Context: Send {
    /// The operation being served.
    fn operation(&self) -> &Operation;

    fn method(&self) -> &Method;

    fn host(&self) -> &str;

    fn url(&self) -> &Uri;

    /// Raw (still percent-encoded) path parameter.
    fn param(&self, name: &str) -> Option<&str>;

    /// First decoded query value for `name`.
    fn query(&self, name: &str) -> Option<&str> {
        self.query_pairs()
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Every decoded query value for `name`, in order.
    fn query_values(&self, name: &str) -> Vec<&str> {
        self.query_pairs()
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// All decoded query pairs.
    fn query_pairs(&self) -> &[(String, String)];

    fn request_headers(&self) -> &HeaderMap;

    /// First value of a request header.
    fn header(&self, name: &str) -> Option<&str> {
        self.request_headers().get(name).and_then(|v| v.to_str().ok())
    }

    /// Every value of a request header.
    fn header_values(&self, name: &str) -> Vec<&str> {
        self.request_headers()
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    fn each_header(&self, f: &mut dyn FnMut(&str, &str)) {
        for (name, value) in self.request_headers() {
            if let Ok(value) = value.to_str() {
                f(name.as_str(), value);
            }
        }
    }

    /// Read the whole request body, at most `limit` bytes when given and
    /// before the read deadline. The body can be read once.
    async fn read_body(&mut self, limit: Option<usize>) -> Result<Bytes, BodyError>;

    fn set_read_deadline(&mut self, deadline: Option<Instant>);

    /// Read and parse a `multipart/form-data` body.
    async fn multipart_form(&mut self, limit: Option<usize>) -> Result<MultipartForm, BodyError> {
        let content_type = self.header("content-type").unwrap_or("").to_string();
        if essence(&content_type) != "multipart/form-data" {
            return Err(BodyError::Multipart(format!(
                "expected multipart/form-data, got '{}'",
                content_type
            )));
        }
        let boundary = multipart::extract_boundary(&content_type)
            .ok_or_else(|| BodyError::Multipart("missing boundary in content type".to_string()))?;
        let body = self.read_body(limit).await?;
        multipart::parse(&body, &boundary).map_err(|e| BodyError::Multipart(e.to_string()))
    }

    fn status(&self) -> StatusCode;

    fn set_status(&mut self, status: StatusCode);

    fn response_headers(&self) -> &HeaderMap;

    /// Replace a response header.
    fn set_header(&mut self, name: HeaderName, value: HeaderValue);

    /// Add a response header, keeping existing values.
    fn append_header(&mut self, name: HeaderName, value: HeaderValue);

    /// Buffered response body.
    fn body_writer(&mut self) -> &mut BytesMut;

    /// Stream the response body from a channel instead of the buffer.
    fn set_body_stream(&mut self, stream: BodyStream);

    fn extensions(&self) -> &Extensions;

    fn extensions_mut(&mut self) -> &mut Extensions;
}
