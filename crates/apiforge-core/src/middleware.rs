//! Middleware chain
//!
//! API-wide middlewares run first, in registration order, then the
//! operation's own, then the endpoint. A middleware short-circuits by
//! writing a response and returning without calling [`Next::run`].
//!
//! ```rust,ignore
//! struct RequireKey;
//!
//! #[async_trait]
//! impl Middleware for RequireKey {
//!     async fn handle(&self, ctx: &mut dyn Context, next: Next<'_>) {
//!         if ctx.header("x-api-key").is_none() {
//!             ctx.set_status(StatusCode::UNAUTHORIZED);
//!             return;
//!         }
//!         next.run(ctx).await
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::adapter::Endpoint;
use crate::context::Context;

/// Code that runs around an operation's endpoint.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(&self, ctx: &mut dyn Context, next: Next<'_>);
}

/// The rest of the chain.
pub struct Next<'a> {
    outer: &'a [Arc<dyn Middleware>],
    inner: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        outer: &'a [Arc<dyn Middleware>],
        inner: &'a [Arc<dyn Middleware>],
        endpoint: &'a dyn Endpoint,
    ) -> Self {
        Self {
            outer,
            inner,
            endpoint,
        }
    }

    /// Number of middlewares left before the endpoint.
    pub fn remaining(&self) -> usize {
        self.outer.len() + self.inner.len()
    }

    /// Continue with the next middleware, or the endpoint.
    pub async fn run(self, ctx: &mut dyn Context) {
        if let Some((first, rest)) = self.outer.split_first() {
            first.handle(ctx, Next::new(rest, self.inner, self.endpoint)).await
        } else if let Some((first, rest)) = self.inner.split_first() {
            first.handle(ctx, Next::new(&[], rest, self.endpoint)).await
        } else {
            self.endpoint.call(ctx).await
        }
    }
}

/// Middleware that appends fixed response headers before the endpoint runs.
#[derive(Debug, Clone, Default)]
pub struct SetHeaders {
    headers: http::HeaderMap,
}

impl SetHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: http::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }
}

#[async_trait]
impl Middleware for SetHeaders {
    async fn handle(&self, ctx: &mut dyn Context, next: Next<'_>) {
        for (name, value) in &self.headers {
            ctx.append_header(name.clone(), value.clone());
        }
        next.run(ctx).await
    }
}
