//! Handler trait and endpoints
//!
//! A handler is an async function from a typed input to a typed output:
//!
//! ```rust,ignore
//! async fn greet(input: GreetingInput) -> Result<GreetingOutput, ApiError> { ... }
//! ```
//!
//! Registration wraps it in an endpoint that decodes the input, calls the
//! function with panics caught, and writes the output or error.

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};

use apiforge_schema::Describe;
use async_trait::async_trait;
use futures_util::FutureExt;
use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::error;

use crate::adapter::{problem_response, Endpoint};
use crate::api::ApiState;
use crate::context::Context;
use crate::error::{new_error, StatusError};
use crate::middleware::Next;
use crate::operation::Operation;
use crate::register::{InputPlan, OutputPlan};
use crate::request::decode_input;
use crate::resolver::Resolvable;
use crate::response::{write_error, write_output};
use crate::stream::{StreamResponse, StreamWriter, STREAM_BUFFER};

/// Types usable as handler input.
pub trait Input: DeserializeOwned + Describe + Resolvable + Send + 'static {}

impl<T> Input for T where T: DeserializeOwned + Describe + Resolvable + Send + 'static {}

/// Types usable as handler output.
pub trait Output: Serialize + Describe + Send + 'static {}

impl<T> Output for T where T: Serialize + Describe + Send + 'static {}

/// Trait representing an async handler function
pub trait Handler<I, O>: Send + Sync + 'static {
    /// Error returned by the handler
    type Error: StatusError;

    /// The handler's future
    type Future: Future<Output = Result<O, Self::Error>> + Send + 'static;

    /// Call the handler with the decoded input
    fn call(&self, input: I) -> Self::Future;
}

impl<F, Fut, I, O, E> Handler<I, O> for F
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, E>> + Send + 'static,
    E: StatusError,
{
    type Error = E;
    type Future = Fut;

    fn call(&self, input: I) -> Self::Future {
        self(input)
    }
}

/// Frozen API state, filled in by `Api::freeze`.
pub(crate) type SharedState = Arc<OnceLock<Arc<ApiState>>>;

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn not_ready(ctx: &mut dyn Context) {
    error!(path = %ctx.operation().path, "request served before the API was frozen");
    let err = new_error(StatusCode::SERVICE_UNAVAILABLE, "api is not ready", vec![]);
    let res = problem_response(&err);
    ctx.set_status(res.status());
    for (name, value) in res.headers() {
        ctx.append_header(name.clone(), value.clone());
    }
    if let Ok(body) = serde_json::to_vec(&err.to_value()) {
        ctx.body_writer().extend_from_slice(&body);
    }
}

/// Decode, call and recover. Returns `None` once an error has been written.
async fn invoke<H, I, O>(
    handler: &H,
    ctx: &mut dyn Context,
    state: &ApiState,
    input: &InputPlan,
) -> Option<O>
where
    H: Handler<I, O>,
    I: Input,
{
    let value = match decode_input::<I>(ctx, &state.registry, &state.formats, input).await {
        Ok(v) => v,
        Err(err) => {
            write_error(ctx, &state.formats, &err);
            return None;
        }
    };

    match AssertUnwindSafe(handler.call(value)).catch_unwind().await {
        Ok(Ok(output)) => Some(output),
        Ok(Err(err)) => {
            write_error(ctx, &state.formats, &err);
            None
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            error!(
                operation_id = %ctx.operation().operation_id,
                panic = %msg,
                "handler panicked"
            );
            if let Some(hook) = &state.on_panic {
                hook(&msg);
            }
            let err = new_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error", vec![]);
            write_error(ctx, &state.formats, &err);
            None
        }
    }
}

/// Endpoint for a typed handler.
pub(crate) struct HandlerEndpoint<H, I, O> {
    handler: Arc<H>,
    state: SharedState,
    input: Arc<InputPlan>,
    output: Arc<OutputPlan>,
    _marker: PhantomData<fn(I) -> O>,
}

impl<H, I, O> HandlerEndpoint<H, I, O> {
    pub(crate) fn new(handler: Arc<H>, state: SharedState, input: InputPlan, output: OutputPlan) -> Self {
        Self {
            handler,
            state,
            input: Arc::new(input),
            output: Arc::new(output),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<H, I, O> Endpoint for HandlerEndpoint<H, I, O>
where
    H: Handler<I, O>,
    I: Input,
    O: Output,
{
    async fn call(&self, ctx: &mut dyn Context) {
        let Some(state) = self.state.get() else {
            return not_ready(ctx);
        };
        let Some(output) = invoke(&*self.handler, ctx, state, &self.input).await else {
            return;
        };
        match serde_json::to_value(&output) {
            Ok(value) => write_output(ctx, &self.output, &state.formats, &state.transformers, value),
            Err(err) => {
                error!(error = %err, "cannot serialize handler output");
                let err = new_error(StatusCode::INTERNAL_SERVER_ERROR, "unable to marshal response", vec![]);
                write_error(ctx, &state.formats, &err);
            }
        }
    }
}

/// Endpoint for a streaming handler.
pub(crate) struct StreamEndpoint<H, I> {
    handler: Arc<H>,
    state: SharedState,
    input: Arc<InputPlan>,
    status: StatusCode,
    _marker: PhantomData<fn(I)>,
}

impl<H, I> StreamEndpoint<H, I> {
    pub(crate) fn new(handler: Arc<H>, state: SharedState, input: InputPlan, status: u16) -> Self {
        Self {
            handler,
            state,
            input: Arc::new(input),
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<H, I> Endpoint for StreamEndpoint<H, I>
where
    H: Handler<I, StreamResponse>,
    I: Input,
{
    async fn call(&self, ctx: &mut dyn Context) {
        let Some(state) = self.state.get() else {
            return not_ready(ctx);
        };
        let Some(stream) = invoke(&*self.handler, ctx, state, &self.input).await else {
            return;
        };

        let (commit_tx, commit_rx) = oneshot::channel();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn((stream.body)(StreamWriter::new(self.status, commit_tx, tx)));

        match commit_rx.await {
            Ok((status, headers)) => {
                ctx.set_status(status);
                for (name, value) in &headers {
                    ctx.append_header(name.clone(), value.clone());
                }
                ctx.set_body_stream(rx);
            }
            Err(_) => {
                error!("stream body ended without committing a response");
                ctx.set_status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
    }
}

/// Runs the API-wide and operation middlewares around an endpoint.
pub(crate) struct ChainEndpoint {
    op: Arc<Operation>,
    state: SharedState,
    inner: Arc<dyn Endpoint>,
}

impl ChainEndpoint {
    pub(crate) fn new(op: Arc<Operation>, state: SharedState, inner: Arc<dyn Endpoint>) -> Self {
        Self { op, state, inner }
    }
}

#[async_trait]
impl Endpoint for ChainEndpoint {
    async fn call(&self, ctx: &mut dyn Context) {
        let outer = match self.state.get() {
            Some(state) => state.middlewares.as_slice(),
            None => &[],
        };
        Next::new(outer, &self.op.middlewares, &*self.inner).run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;

    async fn double(n: i64) -> Result<i64, ApiError> {
        Ok(n * 2)
    }

    fn assert_handler<H: Handler<I, O>, I, O>(_: &H) {}

    #[tokio::test]
    async fn async_fns_are_handlers() {
        assert_handler(&double);
        assert_eq!(Handler::call(&double, 4).await.unwrap(), 8);

        let closure = |s: String| async move { Ok::<_, ApiError>(s.len()) };
        assert_handler(&closure);
        assert_eq!(Handler::call(&closure, "abc".to_string()).await.unwrap(), 3);
    }

    #[test]
    fn panic_messages() {
        let p: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(p.as_ref()), "static");
        let p: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(p.as_ref()), "owned");
        let p: Box<dyn Any + Send> = Box::new(5_u8);
        assert_eq!(panic_message(p.as_ref()), "unknown panic");
    }
}
