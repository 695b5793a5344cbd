//! Streaming responses
//!
//! A handler registered with `register_streaming` returns a
//! [`StreamResponse`]. Its body callback receives a [`StreamWriter`] that may
//! set the status and headers until the first write; the first write (or
//! dropping the writer) commits them. Streamed bodies skip transformers.

use std::future::Future;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use tokio::sync::{mpsc, oneshot};

use crate::error::StreamClosed;

/// Chunks buffered between the writer and the connection.
pub(crate) const STREAM_BUFFER: usize = 16;

type BodyFn = Box<dyn FnOnce(StreamWriter) -> BoxFuture<'static, ()> + Send>;

/// Output of a streaming handler.
pub struct StreamResponse {
    pub(crate) body: BodyFn,
}

impl StreamResponse {
    /// Stream the body produced by `f`.
    ///
    /// ```rust,ignore
    /// StreamResponse::new(|mut w| async move {
    ///     w.set_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    ///     for i in 0..3 {
    ///         if w.write(format!("tick {}\n", i)).await.is_err() {
    ///             return;
    ///         }
    ///     }
    /// })
    /// ```
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(StreamWriter) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            body: Box::new(move |w| Box::pin(f(w))),
        }
    }
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse").finish_non_exhaustive()
    }
}

/// Writer handed to a streaming body.
pub struct StreamWriter {
    status: StatusCode,
    headers: HeaderMap,
    commit: Option<oneshot::Sender<(StatusCode, HeaderMap)>>,
    tx: mpsc::Sender<Bytes>,
}

impl StreamWriter {
    pub(crate) fn new(
        status: StatusCode,
        commit: oneshot::Sender<(StatusCode, HeaderMap)>,
        tx: mpsc::Sender<Bytes>,
    ) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            commit: Some(commit),
            tx,
        }
    }

    /// Ignored once committed.
    pub fn set_status(&mut self, status: StatusCode) {
        if !self.is_committed() {
            self.status = status;
        }
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        if !self.is_committed() {
            self.headers.insert(name, value);
        }
    }

    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        if !self.is_committed() {
            self.headers.append(name, value);
        }
    }

    pub fn is_committed(&self) -> bool {
        self.commit.is_none()
    }

    fn flush_head(&mut self) {
        if let Some(commit) = self.commit.take() {
            let _ = commit.send((self.status, std::mem::take(&mut self.headers)));
        }
    }

    /// Send a chunk, committing the head first. Fails once the client has
    /// gone away.
    pub async fn write(&mut self, data: impl Into<Bytes>) -> Result<(), StreamClosed> {
        self.flush_head();
        self.tx.send(data.into()).await.map_err(|_| StreamClosed)
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        self.flush_head();
    }
}
