//! API configuration and operation registration

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use apiforge_openapi::{
    Contact, DocsRenderer, License, OpenApi, Operation as DocOperation, SecurityScheme, Server, Tag,
    OPENAPI_JSON, OPENAPI_YAML,
};
use apiforge_schema::{set_strict_casing, Describe, Namer, Registry, SCHEMA_REF_PREFIX};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Method, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::adapter::{Adapter, Endpoint, MuxAdapter};
use crate::context::Context;
use crate::error::{new_error, RegistrationError};
use crate::format::{Format, Formats};
use crate::handler::{ChainEndpoint, Handler, HandlerEndpoint, Input, Output, SharedState, StreamEndpoint};
use crate::middleware::Middleware;
use crate::operation::{generate_operation_id, generate_summary, is_valid_operation_id, Operation};
use crate::path::PathTemplate;
use crate::register::{default_status, document, InputPlan, OutputPlan};
use crate::response::write_error;
use crate::stream::StreamResponse;
use crate::transform::{schema_url, SchemaLinkTransformer, Transformer};

/// Called with the panic message when a handler panics.
pub type PanicHook = Arc<dyn Fn(&str) + Send + Sync>;

/// API configuration
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::new("Notes API", "1.0.0")
///     .description("Keeps notes")
///     .docs_renderer(DocsRenderer::Scalar)
///     .middleware(SetHeaders::new().header(SERVER, HeaderValue::from_static("notes")));
/// let api = Api::new(config);
/// ```
pub struct Config {
    doc: OpenApi,
    openapi_path: String,
    docs_path: String,
    schemas_path: String,
    docs_renderer: DocsRenderer,
    formats: Formats,
    transformers: Vec<Arc<dyn Transformer>>,
    middlewares: Vec<Arc<dyn Middleware>>,
    on_panic: Option<PanicHook>,
    namer: Option<Namer>,
    strict_casing: Option<bool>,
    link_transformer: bool,
}

impl Config {
    /// Defaults: OpenAPI 3.1.0 at `/openapi`, docs at `/docs`, schemas at
    /// `/schemas`, JSON only, schema links on.
    pub fn new(title: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            doc: OpenApi::new(title, version),
            openapi_path: "/openapi".to_string(),
            docs_path: "/docs".to_string(),
            schemas_path: "/schemas".to_string(),
            docs_renderer: DocsRenderer::default(),
            formats: Formats::new(),
            transformers: Vec::new(),
            middlewares: Vec::new(),
            on_panic: None,
            namer: None,
            strict_casing: None,
            link_transformer: true,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.doc.info.description = Some(description.into());
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.doc.info.summary = Some(summary.into());
        self
    }

    pub fn terms_of_service(mut self, url: impl Into<String>) -> Self {
        self.doc.info.terms_of_service = Some(url.into());
        self
    }

    pub fn contact(mut self, contact: Contact) -> Self {
        self.doc.info.contact = Some(contact);
        self
    }

    pub fn license(mut self, license: License) -> Self {
        self.doc.info.license = Some(license);
        self
    }

    pub fn server(mut self, server: Server) -> Self {
        self.doc.servers.push(server);
        self
    }

    pub fn tag(mut self, tag: Tag) -> Self {
        self.doc.tags.push(tag);
        self
    }

    /// Declare a security scheme in `components.securitySchemes`.
    pub fn security_scheme(mut self, name: impl Into<String>, scheme: SecurityScheme) -> Self {
        self.doc.add_security_scheme(name, scheme);
        self
    }

    /// Require `name` for every operation.
    pub fn security(mut self, name: impl Into<String>, scopes: &[&str]) -> Self {
        self.doc = self
            .doc
            .security_requirement(name, scopes.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Base path of the OpenAPI documents. Empty disables them.
    pub fn openapi_path(mut self, path: impl Into<String>) -> Self {
        self.openapi_path = path.into();
        self
    }

    /// Path of the docs page. Empty disables it.
    pub fn docs_path(mut self, path: impl Into<String>) -> Self {
        self.docs_path = path.into();
        self
    }

    /// Base path of the per-type JSON Schemas. Empty disables them and the
    /// schema links.
    pub fn schemas_path(mut self, path: impl Into<String>) -> Self {
        self.schemas_path = path.into();
        self
    }

    pub fn docs_renderer(mut self, renderer: DocsRenderer) -> Self {
        self.docs_renderer = renderer;
        self
    }

    /// Register a format for `content_type`.
    pub fn format(mut self, content_type: impl Into<String>, format: impl Format) -> Self {
        self.formats.insert(content_type, format);
        self
    }

    /// Route `+suffix` media types to the format of `content_type`.
    pub fn format_suffix(mut self, suffix: impl Into<String>, content_type: impl Into<String>) -> Self {
        self.formats.suffix(suffix, content_type);
        self
    }

    pub fn default_format(mut self, content_type: impl Into<String>) -> Self {
        self.formats.set_default(content_type);
        self
    }

    /// Transformers run in registration order after the schema linker.
    pub fn transformer(mut self, transformer: impl Transformer) -> Self {
        self.transformers.push(Arc::new(transformer));
        self
    }

    /// API-wide middleware, run before operation middleware.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn on_panic<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_panic = Some(Arc::new(hook));
        self
    }

    /// Schema naming function.
    pub fn namer(mut self, namer: Namer) -> Self {
        self.namer = Some(namer);
        self
    }

    /// Match body property names exactly. This is process-wide.
    pub fn strict_casing(mut self, strict: bool) -> Self {
        self.strict_casing = Some(strict);
        self
    }

    /// Toggle the `$schema` property and `Link` header on response bodies.
    pub fn link_transformer(mut self, enabled: bool) -> Self {
        self.link_transformer = enabled;
        self
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("title", &self.doc.info.title)
            .field("openapi_path", &self.openapi_path)
            .field("docs_path", &self.docs_path)
            .field("schemas_path", &self.schemas_path)
            .field("formats", &self.formats)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
enum DocKind {
    Json,
    Yaml,
    Json30,
    Yaml30,
}

/// Immutable state shared by every request after [`Api::freeze`].
pub(crate) struct ApiState {
    pub registry: Registry,
    pub formats: Formats,
    pub transformers: Vec<Arc<dyn Transformer>>,
    pub middlewares: Vec<Arc<dyn Middleware>>,
    pub on_panic: Option<PanicHook>,
    doc: OpenApi,
    documents: [OnceLock<Option<Bytes>>; 4],
    docs_page: String,
    schemas_path: String,
}

impl ApiState {
    /// Rendered once, on first request.
    fn document(&self, kind: DocKind) -> Option<Bytes> {
        self.documents[kind as usize]
            .get_or_init(|| {
                let rendered = match kind {
                    DocKind::Json => self.doc.to_json(),
                    DocKind::Yaml => self.doc.to_yaml().map(String::into_bytes),
                    DocKind::Json30 => self.doc.downgrade(),
                    DocKind::Yaml30 => self.doc.downgrade_yaml().map(String::into_bytes),
                };
                match rendered {
                    Ok(bytes) => Some(Bytes::from(bytes)),
                    Err(err) => {
                        error!(error = %err, "cannot render OpenAPI document");
                        None
                    }
                }
            })
            .clone()
    }

    /// A registry schema with an absolute `$id` and served refs.
    fn schema_document(&self, host: &str, name: &str) -> Option<Value> {
        let name = name.strip_suffix(".json").unwrap_or(name);
        let schema = self.registry.get(name)?;
        let mut value = match serde_json::to_value(schema) {
            Ok(v) => v,
            Err(err) => {
                error!(schema = %name, error = %err, "cannot serialize schema");
                return None;
            }
        };
        rewrite_refs(&mut value, self.registry.prefix(), &self.schemas_path);

        let mut out = Map::new();
        out.insert(
            "$id".to_string(),
            Value::String(schema_url(host, &self.schemas_path, name)),
        );
        if let Value::Object(obj) = value {
            out.extend(obj);
        }
        Some(Value::Object(out))
    }
}

fn rewrite_refs(value: &mut Value, prefix: &str, schemas_path: &str) {
    match value {
        Value::Object(obj) => {
            for (key, v) in obj.iter_mut() {
                if key == "$ref" {
                    if let Some(name) = v.as_str().and_then(|r| r.strip_prefix(prefix)) {
                        *v = Value::String(format!("{}/{}.json", schemas_path, name));
                    }
                } else {
                    rewrite_refs(v, prefix, schemas_path);
                }
            }
        }
        Value::Array(items) => {
            for v in items {
                rewrite_refs(v, prefix, schemas_path);
            }
        }
        _ => {}
    }
}

#[derive(Debug, Clone, Copy)]
enum Builtin {
    Document(DocKind),
    Docs,
    Schema,
}

/// Serves the OpenAPI documents, the docs page and the JSON Schemas.
struct BuiltinEndpoint {
    kind: Builtin,
    state: SharedState,
}

#[async_trait]
impl Endpoint for BuiltinEndpoint {
    async fn call(&self, ctx: &mut dyn Context) {
        let Some(state) = self.state.get() else {
            ctx.set_status(StatusCode::SERVICE_UNAVAILABLE);
            return;
        };

        let (content_type, body) = match self.kind {
            Builtin::Document(kind) => {
                let ct = match kind {
                    DocKind::Json | DocKind::Json30 => OPENAPI_JSON,
                    DocKind::Yaml | DocKind::Yaml30 => OPENAPI_YAML,
                };
                let Some(body) = state.document(kind) else {
                    let err = new_error(StatusCode::INTERNAL_SERVER_ERROR, "cannot render OpenAPI document", vec![]);
                    return write_error(ctx, &state.formats, &err);
                };
                (ct, body)
            }
            Builtin::Docs => ("text/html", Bytes::from(state.docs_page.clone())),
            Builtin::Schema => {
                let name = ctx.param("schema").unwrap_or_default().to_string();
                let doc = state.schema_document(ctx.host(), &name);
                let Some(body) = doc.and_then(|v| serde_json::to_vec(&v).ok()) else {
                    let err = new_error(StatusCode::NOT_FOUND, &format!("schema {} not found", name), vec![]);
                    return write_error(ctx, &state.formats, &err);
                };
                ("application/schema+json", Bytes::from(body))
            }
        };

        ctx.set_status(StatusCode::OK);
        ctx.set_header(CONTENT_TYPE, HeaderValue::from_static(content_type));
        ctx.body_writer().extend_from_slice(&body);
    }
}

/// An API under construction.
///
/// Operations are registered through [`Registrar`]. [`Api::freeze`] then
/// moves everything into shared read-only state for serving.
pub struct Api {
    config: Config,
    registry: Registry,
    doc: OpenApi,
    adapter: Box<dyn Adapter>,
    operation_ids: HashSet<String>,
    state: SharedState,
    link: Option<SchemaLinkTransformer>,
}

impl Api {
    /// New API served by the default [`MuxAdapter`].
    pub fn new(config: Config) -> Self {
        Self::with_adapter(config, MuxAdapter::new())
    }

    /// New API served by a custom adapter.
    pub fn with_adapter(mut config: Config, adapter: impl Adapter) -> Self {
        if let Some(strict) = config.strict_casing {
            set_strict_casing(strict);
        }
        let registry = match config.namer {
            Some(namer) => Registry::with_namer(SCHEMA_REF_PREFIX, namer),
            None => Registry::new(),
        };
        let link = (config.link_transformer && !config.schemas_path.is_empty())
            .then(|| SchemaLinkTransformer::new(config.schemas_path.as_str()));
        let doc = std::mem::replace(&mut config.doc, OpenApi::new("", ""));

        let mut api = Self {
            config,
            registry,
            doc,
            adapter: Box::new(adapter),
            operation_ids: HashSet::new(),
            state: Arc::new(OnceLock::new()),
            link,
        };
        api.mount_builtins();
        api
    }

    fn mount_builtins(&mut self) {
        let mut routes = Vec::new();
        let openapi = self.config.openapi_path.trim_end_matches('/').to_string();
        if !openapi.is_empty() {
            routes.push((format!("{}.json", openapi), Builtin::Document(DocKind::Json)));
            routes.push((format!("{}.yaml", openapi), Builtin::Document(DocKind::Yaml)));
            routes.push((format!("{}-3.0.json", openapi), Builtin::Document(DocKind::Json30)));
            routes.push((format!("{}-3.0.yaml", openapi), Builtin::Document(DocKind::Yaml30)));
        }
        if !self.config.docs_path.is_empty() {
            routes.push((self.config.docs_path.clone(), Builtin::Docs));
        }
        let schemas = self.config.schemas_path.trim_end_matches('/').to_string();
        if !schemas.is_empty() {
            routes.push((format!("{}/{{schema}}", schemas), Builtin::Schema));
        }

        for (path, kind) in routes {
            let op = Arc::new(Operation::get(path).hidden());
            let endpoint = Arc::new(BuiltinEndpoint {
                kind,
                state: self.state.clone(),
            });
            if let Err(err) = self.mount(op.clone(), endpoint, None) {
                error!(path = %op.path, error = %err, "cannot serve built-in endpoint");
            }
        }
    }

    /// The document being assembled, for customisation before freezing.
    pub fn openapi(&self) -> &OpenApi {
        &self.doc
    }

    pub fn openapi_mut(&mut self) -> &mut OpenApi {
        &mut self.doc
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Register `T`'s schema without an operation referencing it.
    pub fn register_schema<T: Describe>(&mut self) -> Result<(), RegistrationError> {
        self.registry.schema_for::<T>()?;
        Ok(())
    }

    /// Finish registration and share the API for serving.
    pub fn freeze(self) -> ApiService {
        let Api {
            config,
            registry,
            mut doc,
            adapter,
            state,
            link,
            ..
        } = self;

        doc.components_mut().schemas = registry.map().clone();
        registry.precompute_messages();

        let mut transformers: Vec<Arc<dyn Transformer>> = Vec::new();
        if let Some(link) = link {
            transformers.push(Arc::new(link));
        }
        transformers.extend(config.transformers);

        let openapi_url = format!("{}.json", config.openapi_path.trim_end_matches('/'));
        let docs_page = config.docs_renderer.render(&doc.info.title, &openapi_url);

        let frozen = Arc::new(ApiState {
            registry,
            formats: config.formats,
            transformers,
            middlewares: config.middlewares,
            on_panic: config.on_panic,
            doc,
            documents: Default::default(),
            docs_page,
            schemas_path: config.schemas_path.trim_end_matches('/').to_string(),
        });
        // Api owns the only setter.
        let _ = state.set(frozen.clone());

        ApiService {
            adapter: Arc::from(adapter),
            state: frozen,
        }
    }

    fn check_operation_id(&self, op: &mut Operation, list: bool) -> Result<(), RegistrationError> {
        if op.operation_id.is_empty() {
            op.operation_id = generate_operation_id(&op.method, &op.path, list);
        }
        if op.auto_summary && op.summary.is_none() {
            op.summary = Some(generate_summary(&op.method, &op.path, list));
        }
        if !is_valid_operation_id(&op.operation_id) {
            return Err(RegistrationError::InvalidOperationId(op.operation_id.clone()));
        }
        if self.operation_ids.contains(&op.operation_id) {
            return Err(RegistrationError::DuplicateOperationId(op.operation_id.clone()));
        }
        Ok(())
    }

    /// Bind through the middleware chain, then document.
    fn mount(
        &mut self,
        op: Arc<Operation>,
        endpoint: Arc<dyn Endpoint>,
        doc: Option<DocOperation>,
    ) -> Result<(), RegistrationError> {
        let chain = Arc::new(ChainEndpoint::new(op.clone(), self.state.clone(), endpoint));
        self.adapter.handle(op.clone(), chain)?;
        if let Some(doc) = doc {
            self.doc.add_operation(op.method.as_str(), &op.path, doc)?;
        }
        if !op.operation_id.is_empty() {
            self.operation_ids.insert(op.operation_id.clone());
        }
        debug!(
            method = %op.method,
            path = %op.path,
            operation_id = %op.operation_id,
            hidden = op.hidden,
            "registered operation"
        );
        Ok(())
    }

    fn add_handler<H, I, O>(&mut self, mut op: Operation, handler: H) -> Result<(), RegistrationError>
    where
        H: Handler<I, O>,
        I: Input,
        O: Output,
    {
        let template = PathTemplate::parse(&op.path)?;
        let input = InputPlan::build(&mut self.registry, &I::describe(), &template)?;
        let mut output = OutputPlan::build(&mut self.registry, &O::describe())?;
        output.default_status = default_status(&op, &output);
        let list = output.is_list(&self.registry);
        self.check_operation_id(&mut op, list)?;

        if let (Some(link), Some(schema)) = (&self.link, output.body.as_ref().and_then(|b| b.schema.as_ref())) {
            op.body_schema = link.link_schema(&mut self.registry, schema);
        }

        let doc = if op.hidden {
            None
        } else {
            let media_type = self.config.formats.default_type().to_string();
            Some(document(&mut self.registry, &op, &input, &output, &media_type)?)
        };

        let endpoint = HandlerEndpoint::<H, I, O>::new(Arc::new(handler), self.state.clone(), input, output);
        self.mount(Arc::new(op), Arc::new(endpoint), doc)
    }

    fn add_streaming<H, I>(&mut self, mut op: Operation, handler: H) -> Result<(), RegistrationError>
    where
        H: Handler<I, StreamResponse>,
        I: Input,
    {
        let template = PathTemplate::parse(&op.path)?;
        let input = InputPlan::build(&mut self.registry, &I::describe(), &template)?;
        let output = OutputPlan {
            default_status: op.default_status.unwrap_or(200),
            ..Default::default()
        };
        self.check_operation_id(&mut op, false)?;

        let doc = if op.hidden {
            None
        } else {
            let media_type = self.config.formats.default_type().to_string();
            Some(document(&mut self.registry, &op, &input, &output, &media_type)?)
        };

        let endpoint = StreamEndpoint::<H, I>::new(Arc::new(handler), self.state.clone(), input, output.default_status);
        self.mount(Arc::new(op), Arc::new(endpoint), doc)
    }
}

impl std::fmt::Debug for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Api")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("operations", &self.operation_ids.len())
            .finish_non_exhaustive()
    }
}

/// A frozen API, ready to serve. Cheap to clone.
#[derive(Clone)]
pub struct ApiService {
    pub(crate) adapter: Arc<dyn Adapter>,
    state: Arc<ApiState>,
}

impl ApiService {
    /// The final OpenAPI document.
    pub fn openapi(&self) -> &OpenApi {
        &self.state.doc
    }

    pub fn registry(&self) -> &Registry {
        &self.state.registry
    }
}

fn convenience(method: Method, path: &str) -> Operation {
    let mut op = Operation::new(method, path);
    op.auto_summary = true;
    op
}

/// Registers operations on an [`Api`] or a [`Group`](crate::group::Group).
///
/// `register` validates the input against the path template, checks the
/// operation id, documents the operation and binds it through the adapter.
/// Every failure is a [`RegistrationError`].
///
/// ```rust,ignore
/// api.register(Operation::get("/greeting/{name}").operation_id("get-greeting"), greet)?;
/// api.post("/notes", create_note)?;
/// ```
pub trait Registrar {
    /// The API to register on and the operation as this registrar sees it.
    #[doc(hidden)]
    fn target(&mut self, op: Operation) -> (&mut Api, Operation);

    fn register<H, I, O>(&mut self, op: Operation, handler: H) -> Result<(), RegistrationError>
    where
        H: Handler<I, O>,
        I: Input,
        O: Output,
    {
        let (api, op) = self.target(op);
        api.add_handler(op, handler)
    }

    /// Register a handler returning a [`StreamResponse`].
    fn register_streaming<H, I>(&mut self, op: Operation, handler: H) -> Result<(), RegistrationError>
    where
        H: Handler<I, StreamResponse>,
        I: Input,
    {
        let (api, op) = self.target(op);
        api.add_streaming(op, handler)
    }

    fn get<H, I, O>(&mut self, path: &str, handler: H) -> Result<(), RegistrationError>
    where
        H: Handler<I, O>,
        I: Input,
        O: Output,
    {
        self.register(convenience(Method::GET, path), handler)
    }

    fn post<H, I, O>(&mut self, path: &str, handler: H) -> Result<(), RegistrationError>
    where
        H: Handler<I, O>,
        I: Input,
        O: Output,
    {
        self.register(convenience(Method::POST, path), handler)
    }

    fn put<H, I, O>(&mut self, path: &str, handler: H) -> Result<(), RegistrationError>
    where
        H: Handler<I, O>,
        I: Input,
        O: Output,
    {
        self.register(convenience(Method::PUT, path), handler)
    }

    fn patch<H, I, O>(&mut self, path: &str, handler: H) -> Result<(), RegistrationError>
    where
        H: Handler<I, O>,
        I: Input,
        O: Output,
    {
        self.register(convenience(Method::PATCH, path), handler)
    }

    fn delete<H, I, O>(&mut self, path: &str, handler: H) -> Result<(), RegistrationError>
    where
        H: Handler<I, O>,
        I: Input,
        O: Output,
    {
        self.register(convenience(Method::DELETE, path), handler)
    }

    fn head<H, I, O>(&mut self, path: &str, handler: H) -> Result<(), RegistrationError>
    where
        H: Handler<I, O>,
        I: Input,
        O: Output,
    {
        self.register(convenience(Method::HEAD, path), handler)
    }
}

impl Registrar for Api {
    fn target(&mut self, op: Operation) -> (&mut Api, Operation) {
        (self, op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn refs_point_at_served_schemas() {
        let mut v = json!({
            "type": "object",
            "properties": {
                "owner": {"$ref": "#/components/schemas/User"},
                "tags": {"type": "array", "items": {"$ref": "#/components/schemas/Tag"}},
                "other": {"$ref": "https://example.com/x.json"}
            }
        });
        rewrite_refs(&mut v, SCHEMA_REF_PREFIX, "/schemas");
        assert_eq!(v["properties"]["owner"]["$ref"], "/schemas/User.json");
        assert_eq!(v["properties"]["tags"]["items"]["$ref"], "/schemas/Tag.json");
        assert_eq!(v["properties"]["other"]["$ref"], "https://example.com/x.json");
    }

    #[test]
    fn config_defaults() {
        let config = Config::new("Test", "1.0.0");
        assert_eq!(config.openapi_path, "/openapi");
        assert_eq!(config.docs_path, "/docs");
        assert_eq!(config.schemas_path, "/schemas");
        assert!(config.link_transformer);
        assert_eq!(config.formats.default_type(), "application/json");
        assert_eq!(config.doc.openapi, "3.1.0");
    }

    #[test]
    fn freezing_fills_components() {
        let mut api = Api::new(Config::new("Test", "1.0.0").description("Things"));
        api.register_schema::<crate::error::ApiError>().unwrap();
        let service = api.freeze();
        let doc = service.openapi();
        assert_eq!(doc.info.description.as_deref(), Some("Things"));
        assert!(doc.components.as_ref().unwrap().schemas.contains_key("ErrorModel"));
    }
}
