//! TestClient for integration testing without network binding
//!
//! Requests go through the adapter, the middleware chain and the full
//! request and response pipelines, without a socket.
//!
//! # Example
//!
//! ```rust,ignore
//! use apiforge_core::{Api, Config, Registrar, TestClient};
//!
//! #[tokio::test]
//! async fn test_greeting() {
//!     let mut api = Api::new(Config::new("Greetings", "1.0.0"));
//!     api.get("/greeting/{name}", greet).unwrap();
//!
//!     let client = TestClient::new(api);
//!     let response = client.get("/greeting/world").send().await;
//!     response.assert_status(200);
//! }
//! ```

use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use http_body_util::BodyExt;
use serde::{de::DeserializeOwned, Serialize};

use crate::api::{Api, ApiService};
use crate::body::full_request_body;

/// Test client for integration testing without network binding
#[derive(Clone)]
pub struct TestClient {
    service: ApiService,
}

impl TestClient {
    /// Freeze `api` and wrap it
    pub fn new(api: Api) -> Self {
        Self { service: api.freeze() }
    }

    /// Wrap an already frozen API
    pub fn from_service(service: ApiService) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &ApiService {
        &self.service
    }

    /// Start a request
    pub fn request(&self, method: Method, path: &str) -> TestRequest<'_> {
        TestRequest {
            client: self,
            method,
            path: path.to_string(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(&self, path: &str) -> TestRequest<'_> {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> TestRequest<'_> {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> TestRequest<'_> {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: &str) -> TestRequest<'_> {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: &str) -> TestRequest<'_> {
        self.request(Method::DELETE, path)
    }
}

/// Request builder for [`TestClient`]
pub struct TestRequest<'a> {
    client: &'a TestClient,
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl TestRequest<'_> {
    /// Add a header to the request
    ///
    /// ```rust,ignore
    /// client.get("/").header("Accept", "application/json");
    /// ```
    pub fn header(mut self, key: &str, value: &str) -> Self {
        if let (Ok(name), Ok(val)) = (
            key.parse::<http::header::HeaderName>(),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, val);
        }
        self
    }

    /// Set the request body as JSON
    ///
    /// This also sets the Content-Type header to `application/json`.
    pub fn json<T: Serialize>(mut self, body: &T) -> Self {
        if let Ok(bytes) = serde_json::to_vec(body) {
            self.body = Some(Bytes::from(bytes));
            self.headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }
        self
    }

    /// Set the request body as raw bytes
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the Content-Type header
    pub fn content_type(self, content_type: &str) -> Self {
        self.header("content-type", content_type)
    }

    /// Send the request through the API
    pub async fn send(self) -> TestResponse {
        let mut builder = http::Request::builder()
            .method(self.method)
            .uri(&self.path)
            .header(header::HOST, "localhost");
        if let Some(headers) = builder.headers_mut() {
            headers.extend(self.headers);
        }
        let req = match builder.body(full_request_body(self.body.unwrap_or_default())) {
            Ok(req) => req,
            Err(err) => panic!("invalid test request {}: {}", self.path, err),
        };

        let response = self.client.service.call(req).await;
        let (parts, body) = response.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(never) => match never {},
        };
        TestResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        }
    }
}

/// Test response with assertion helpers
#[derive(Debug)]
pub struct TestResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl TestResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of `name`, if it is valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The body as a string, lossily decoded
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Parse the response body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Assert that the response has the expected status code
    ///
    /// # Panics
    ///
    /// Panics if the status code doesn't match.
    pub fn assert_status(&self, expected: u16) -> &Self {
        assert_eq!(
            self.status.as_u16(),
            expected,
            "Expected status {}, got {}. Body: {}",
            expected,
            self.status,
            self.text()
        );
        self
    }

    /// Assert that the response has the expected header value
    ///
    /// # Panics
    ///
    /// Panics if the header doesn't exist or doesn't match.
    pub fn assert_header(&self, key: &str, expected: &str) -> &Self {
        let actual = self.header(key).unwrap_or("");
        assert_eq!(
            actual, expected,
            "Expected header '{}' to be '{}', got '{}'",
            key, expected, actual
        );
        self
    }

    /// Assert that the response body contains the expected string
    pub fn assert_body_contains(&self, expected: &str) -> &Self {
        let body = self.text();
        assert!(
            body.contains(expected),
            "Expected body to contain '{}', got '{}'",
            expected, body
        );
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Config;

    #[tokio::test]
    async fn serves_builtin_documents() {
        let client = TestClient::new(Api::new(Config::new("Test API", "2.0.0")));

        let res = client.get("/openapi.json").send().await;
        res.assert_status(200)
            .assert_header("content-type", "application/vnd.oai.openapi+json");
        let doc: serde_json::Value = res.json().unwrap();
        assert_eq!(doc["openapi"], "3.1.0");
        assert_eq!(doc["info"]["title"], "Test API");

        let res = client.get("/openapi-3.0.yaml").send().await;
        res.assert_status(200).assert_body_contains("openapi: 3.0.3");

        let res = client.get("/docs").send().await;
        res.assert_status(200)
            .assert_header("content-type", "text/html")
            .assert_body_contains("/openapi.json");
    }

    #[tokio::test]
    async fn unknown_routes_are_problems() {
        let client = TestClient::new(Api::new(Config::new("Test API", "2.0.0")));

        let res = client.get("/nope").send().await;
        res.assert_status(404);
        let problem: serde_json::Value = res.json().unwrap();
        assert_eq!(problem["status"], 404);

        client.get("/schemas/Missing.json").send().await.assert_status(404);
        client.post("/openapi.json").send().await.assert_status(405);
    }

    #[tokio::test]
    async fn disabled_paths_are_not_served() {
        let config = Config::new("Test API", "2.0.0").docs_path("").openapi_path("");
        let client = TestClient::new(Api::new(config));
        client.get("/docs").send().await.assert_status(404);
        client.get("/openapi.json").send().await.assert_status(404);
    }
}
