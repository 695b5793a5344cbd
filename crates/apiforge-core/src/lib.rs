//! # apiforge Core
//!
//! The engine behind apiforge: operation registration, the request pipeline
//! (parameter binding, body decoding, validation, resolvers), the response
//! pipeline (negotiation, transformers, problem details) and the default
//! hyper/matchit adapter.
//!
//! This crate is not meant to be used directly. Use `apiforge` instead.

mod adapter;
mod api;
mod body;
pub mod conditional;
mod context;
mod error;
mod format;
mod group;
mod handler;
pub mod middleware;
pub mod multipart;
pub mod negotiation;
mod operation;
mod params;
mod path;
mod register;
mod request;
mod resolver;
mod response;
mod server;
pub mod stream;
mod test_client;
mod transform;

// Public API
pub use adapter::{Adapter, Endpoint, HttpContext, MuxAdapter};
pub use api::{Api, ApiService, Config, PanicHook, Registrar};
pub use body::{full_request_body, request_body, Body, BodyStream, BoxError, RequestBody, Response};
pub use conditional::ConditionalParams;
pub use context::{BodyError, Context};
pub use error::{
    new_error, reset_error_factory, set_error_factory, ApiError, ErrorFactory, FormatError,
    RegistrationError, Result, ServeError, StatusError, StreamClosed, PROBLEM_JSON,
};
pub use format::{Format, Formats, JsonFormat};
pub use group::Group;
pub use handler::{Handler, Input, Output};
pub use middleware::{Middleware, Next, SetHeaders};
pub use multipart::{FormFile, MultipartForm};
pub use operation::{
    generate_operation_id, generate_summary, is_valid_operation_id, Operation,
    DEFAULT_BODY_READ_TIMEOUT, DEFAULT_MAX_BODY_BYTES,
};
pub use params::{ParamLocation, ParamSpec};
pub use path::{PathTemplate, Segment};
pub use resolver::{Empty, Resolvable, Resolver};
pub use server::{init_tracing, DEFAULT_LOG_FILTER};
pub use stream::{StreamResponse, StreamWriter};
pub use test_client::{TestClient, TestRequest, TestResponse};
pub use transform::{FnTransformer, SchemaLinkTransformer, Transformer};
