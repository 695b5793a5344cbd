//! Router adapters
//!
//! The core only needs two things from a router: a way to bind an
//! [`Endpoint`] to an operation's method and path, and a way to dispatch a
//! request. [`MuxAdapter`] is the default, built on matchit.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::header::{self, HeaderName, HeaderValue};
use http::{Extensions, HeaderMap, Method, StatusCode, Uri};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use matchit::Router as MatchitRouter;
use smallvec::SmallVec;
use tokio::time::Instant;

use crate::body::{Body, BodyStream, RequestBody, Response};
use crate::context::{BodyError, Context};
use crate::error::{new_error, RegistrationError, StatusError};
use crate::operation::Operation;
use crate::path::PathTemplate;

/// Request handler bound to one operation.
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    async fn call(&self, ctx: &mut dyn Context);
}

/// Boundary between the core and an HTTP router.
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Route `(op.method, op.path)` to `endpoint`.
    fn handle(&mut self, op: Arc<Operation>, endpoint: Arc<dyn Endpoint>) -> Result<(), RegistrationError>;

    /// Dispatch one request.
    async fn serve_http(&self, req: http::Request<RequestBody>) -> Response;
}

/// A problem document response written outside any operation.
pub(crate) fn problem_response(err: &dyn StatusError) -> Response {
    let body = serde_json::to_vec(&err.to_value()).unwrap_or_default();
    let mut res = http::Response::new(Body::from(body));
    *res.status_mut() = err.status();
    if let Ok(ct) = HeaderValue::from_str(&err.content_type("application/json")) {
        res.headers_mut().insert(header::CONTENT_TYPE, ct);
    }
    if let Some(headers) = err.headers() {
        for (name, value) in headers {
            res.headers_mut().append(name.clone(), value.clone());
        }
    }
    res
}

struct MethodEntry {
    op: Arc<Operation>,
    endpoint: Arc<dyn Endpoint>,
    param_names: Vec<String>,
}

#[derive(Default)]
struct Route {
    methods: Vec<MethodEntry>,
}

impl Route {
    fn allow(&self) -> String {
        self.methods
            .iter()
            .map(|e| e.op.method.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Default adapter: a matchit radix tree keyed by path, then by method.
///
/// Templates that differ only in parameter names share one route; each
/// method keeps its own names and receives its values by position.
#[derive(Default)]
pub struct MuxAdapter {
    router: MatchitRouter<usize>,
    routes: Vec<Route>,
    by_pattern: HashMap<String, usize>,
}

impl MuxAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Adapter for MuxAdapter {
    fn handle(&mut self, op: Arc<Operation>, endpoint: Arc<dyn Endpoint>) -> Result<(), RegistrationError> {
        let template = PathTemplate::parse(&op.path)?;
        let pattern = template.normalized();

        let idx = match self.by_pattern.get(&pattern) {
            Some(idx) => *idx,
            None => {
                let idx = self.routes.len();
                self.router
                    .insert(template.router_path(), idx)
                    .map_err(|e| RegistrationError::Route(format!("{}: {}", op.path, e)))?;
                self.routes.push(Route::default());
                self.by_pattern.insert(pattern, idx);
                idx
            }
        };

        let route = &mut self.routes[idx];
        if let Some(existing) = route.methods.iter().find(|e| e.op.method == op.method) {
            return Err(RegistrationError::DuplicateOperation {
                method: op.method.to_string(),
                path: op.path.clone(),
                existing: existing.op.path.clone(),
            });
        }
        route.methods.push(MethodEntry {
            param_names: template.params().map(str::to_string).collect(),
            op,
            endpoint,
        });
        Ok(())
    }

    async fn serve_http(&self, req: http::Request<RequestBody>) -> Response {
        let path = req.uri().path().to_string();
        let Ok(matched) = self.router.at(&path) else {
            let err = new_error(StatusCode::NOT_FOUND, &format!("no route found for {} {}", req.method(), path), vec![]);
            return problem_response(&err);
        };

        let route = &self.routes[*matched.value];
        let Some(entry) = route.methods.iter().find(|e| e.op.method == req.method()) else {
            let err = new_error(
                StatusCode::METHOD_NOT_ALLOWED,
                &format!("method {} not allowed for {}", req.method(), path),
                vec![],
            );
            let mut res = problem_response(&err);
            if let Ok(allow) = HeaderValue::from_str(&route.allow()) {
                res.headers_mut().insert(header::ALLOW, allow);
            }
            return res;
        };

        let params = entry
            .param_names
            .iter()
            .cloned()
            .zip(matched.params.iter().map(|(_, v)| v.to_string()))
            .collect();

        let mut ctx = HttpContext::new(entry.op.clone(), req, params);
        entry.endpoint.call(&mut ctx).await;
        ctx.into_response()
    }
}

/// [`Context`] over an `http::Request`.
pub struct HttpContext {
    op: Arc<Operation>,
    method: Method,
    uri: Uri,
    host: String,
    headers: HeaderMap,
    params: SmallVec<[(String, String); 4]>,
    query: Vec<(String, String)>,
    body: Option<RequestBody>,
    deadline: Option<Instant>,
    extensions: Extensions,
    status: StatusCode,
    response_headers: HeaderMap,
    buffer: BytesMut,
    stream: Option<BodyStream>,
}

impl HttpContext {
    pub fn new(op: Arc<Operation>, req: http::Request<RequestBody>, params: SmallVec<[(String, String); 4]>) -> Self {
        let (parts, body) = req.into_parts();
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()))
            .unwrap_or_default();
        let query = parts
            .uri
            .query()
            .and_then(|q| serde_urlencoded::from_str::<Vec<(String, String)>>(q).ok())
            .unwrap_or_default();

        Self {
            op,
            method: parts.method,
            uri: parts.uri,
            host,
            headers: parts.headers,
            params,
            query,
            body: Some(body),
            deadline: None,
            extensions: parts.extensions,
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            buffer: BytesMut::new(),
            stream: None,
        }
    }

    /// Finish the exchange.
    pub fn into_response(self) -> Response {
        let body = match self.stream {
            Some(stream) => Body::Stream(stream),
            None => Body::from(self.buffer.freeze()),
        };
        let mut res = http::Response::new(body);
        *res.status_mut() = self.status;
        *res.headers_mut() = self.response_headers;
        res
    }
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

#[async_trait]
impl Context for HttpContext {
    fn operation(&self) -> &Operation {
        &self.op
    }

    fn method(&self) -> &Method {
        &self.method
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn url(&self) -> &Uri {
        &self.uri
    }

    fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    fn request_headers(&self) -> &HeaderMap {
        &self.headers
    }

    async fn read_body(&mut self, limit: Option<usize>) -> Result<Bytes, BodyError> {
        let body = self
            .body
            .take()
            .ok_or_else(|| BodyError::Read("body already read".to_string()))?;

        if let (Some(limit), Some(len)) = (limit, content_length(&self.headers)) {
            if len > limit {
                return Err(BodyError::TooLarge { limit });
            }
        }

        let read = async move {
            match limit {
                Some(limit) => Limited::new(body, limit)
                    .boxed_unsync()
                    .collect()
                    .await
                    .map(|c| c.to_bytes())
                    .map_err(|e| {
                        if e.downcast_ref::<LengthLimitError>().is_some() {
                            BodyError::TooLarge { limit }
                        } else {
                            BodyError::Read(e.to_string())
                        }
                    }),
                None => body
                    .collect()
                    .await
                    .map(|c| c.to_bytes())
                    .map_err(|e| BodyError::Read(e.to_string())),
            }
        };

        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, read)
                .await
                .map_err(|_| BodyError::Timeout)?,
            None => read.await,
        }
    }

    fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    fn status(&self) -> StatusCode {
        self.status
    }

    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response_headers.insert(name, value);
    }

    fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response_headers.append(name, value);
    }

    fn body_writer(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    fn set_body_stream(&mut self, stream: BodyStream) {
        self.stream = Some(stream);
    }

    fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}
