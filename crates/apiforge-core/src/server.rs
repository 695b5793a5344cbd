//! HTTP server implementation

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;

use http::{Method, StatusCode};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::api::{Api, ApiService};
use crate::body::{request_body, RequestBody, Response};
use crate::error::ServeError;

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,apiforge=debug";

/// Install a fmt subscriber unless the host already installed one.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

impl ApiService {
    /// Dispatch one request through the adapter.
    pub async fn call(&self, req: http::Request<RequestBody>) -> Response {
        self.adapter.serve_http(req).await
    }

    /// Serve on `addr` until the process exits.
    pub async fn serve(self, addr: &str) -> Result<(), ServeError> {
        self.serve_with_shutdown(addr, std::future::pending()).await
    }

    /// Serve on `addr` until `signal` resolves.
    ///
    /// The listener stops accepting when the signal fires; connections in
    /// flight finish on their own tasks.
    pub async fn serve_with_shutdown<F>(self, addr: &str, signal: F) -> Result<(), ServeError>
    where
        F: Future<Output = ()> + Send,
    {
        let addr: SocketAddr = addr.parse()?;
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "apiforge server listening on http://{}", addr);

        tokio::pin!(signal);
        loop {
            let (stream, _remote_addr) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = &mut signal => {
                    info!("shutdown signal received, no longer accepting connections");
                    return Ok(());
                }
            };
            let io = TokioIo::new(stream);
            let service = self.clone();

            tokio::spawn(async move {
                let svc = service_fn(move |req: hyper::Request<Incoming>| {
                    let service = service.clone();
                    async move { Ok::<_, Infallible>(handle_request(&service, req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, svc).await {
                    error!("Connection error: {}", err);
                }
            });
        }
    }
}

impl Api {
    /// Freeze the API, install logging and serve on `addr`.
    pub async fn serve(self, addr: &str) -> Result<(), ServeError> {
        init_tracing();
        self.freeze().serve(addr).await
    }

    /// Like [`Api::serve`], stopping when `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, addr: &str, signal: F) -> Result<(), ServeError>
    where
        F: Future<Output = ()> + Send,
    {
        init_tracing();
        self.freeze().serve_with_shutdown(addr, signal).await
    }
}

/// Handle a single HTTP request
async fn handle_request(service: &ApiService, req: hyper::Request<Incoming>) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();

    let response = service.call(req.map(request_body)).await;

    log_request(&method, &path, response.status(), start);
    response
}

/// Log request completion
fn log_request(method: &Method, path: &str, status: StatusCode, start: Instant) {
    let duration_ms = start.elapsed().as_millis() as u64;

    if status.is_server_error() {
        error!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms,
            "Request failed"
        );
    } else if status.is_client_error() {
        warn!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms,
            "Client error"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms,
            "Request completed"
        );
    }
}
