//! Operation registration
//!
//! At registration the input and output descriptors are turned into plans:
//! which fields are parameters, which is the body, which output fields are
//! headers or the status. The same plans drive the OpenAPI documentation
//! and, per request, the decoding and encoding pipelines.

use std::any::TypeId;
use std::collections::BTreeMap;

use apiforge_openapi::{
    Header, MediaType, Operation as DocOperation, RequestBody as DocRequestBody, Response as DocResponse,
};
use apiforge_schema::{
    schema_from_field, FieldDescriptor, InstanceType, Mode, Registry, Schema, TypeDescriptor, TypeKind,
};
use http::{Method, StatusCode};

use crate::error::{ApiError, RegistrationError, PROBLEM_JSON};
use crate::multipart::MultipartForm;
use crate::operation::Operation;
use crate::params::{ParamLocation, ParamSpec};
use crate::path::PathTemplate;

const OCTET_STREAM: &str = "application/octet-stream";
const MULTIPART: &str = "multipart/form-data";

/// The decoded request body.
#[derive(Debug, Clone)]
pub(crate) struct BodySpec {
    pub field: &'static str,
    pub schema: Schema,
    pub required: bool,
    pub content_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RawBodyKind {
    Bytes,
    Form,
}

/// The unparsed request body.
#[derive(Debug, Clone)]
pub(crate) struct RawBodySpec {
    pub field: &'static str,
    pub kind: RawBodyKind,
    pub content_type: String,
}

/// How to decode an input type.
#[derive(Debug, Clone, Default)]
pub(crate) struct InputPlan {
    pub params: Vec<ParamSpec>,
    pub body: Option<BodySpec>,
    pub raw_body: Option<RawBodySpec>,
}

fn is_body(field: &FieldDescriptor) -> bool {
    field.ident == "body" || field.tags.has("body")
}

fn is_raw_body(field: &FieldDescriptor) -> bool {
    field.ident == "raw_body" || field.tags.has("rawBody")
}

fn object_fields<'a>(
    desc: &'a TypeDescriptor,
    kind: &'static str,
) -> Result<&'a [FieldDescriptor], RegistrationError> {
    match &desc.kind {
        TypeKind::Object(fields) => Ok(fields),
        other => Err(RegistrationError::InvalidType {
            kind,
            type_name: desc.name.to_string(),
            reason: format!("expected a struct, got {:?}", other),
        }),
    }
}

impl InputPlan {
    pub(crate) fn build(
        registry: &mut Registry,
        desc: &TypeDescriptor,
        template: &PathTemplate,
    ) -> Result<Self, RegistrationError> {
        let name = registry.name_for(desc, "Input");
        let mut plan = InputPlan::default();

        for field in object_fields(desc, "input")? {
            if let Some(spec) = ParamSpec::from_field(registry, field, &name)? {
                plan.params.push(spec);
                continue;
            }

            let fd = (field.ty)().inner();
            if is_raw_body(field) {
                let kind = if fd.id == TypeId::of::<Vec<u8>>() {
                    RawBodyKind::Bytes
                } else if fd.id == TypeId::of::<MultipartForm>() {
                    RawBodyKind::Form
                } else {
                    return Err(RegistrationError::InvalidType {
                        kind: "input",
                        type_name: desc.name.to_string(),
                        reason: format!("raw body field '{}' must be Vec<u8> or MultipartForm", field.ident),
                    });
                };
                let default_ct = if kind == RawBodyKind::Form { MULTIPART } else { OCTET_STREAM };
                plan.raw_body = Some(RawBodySpec {
                    field: field.name,
                    kind,
                    content_type: field.tags.get("contentType").unwrap_or(default_ct).to_string(),
                });
            } else if is_body(field) {
                let optional = (field.ty)().is_optional();
                let required = match field.tags.get("required") {
                    Some(v) => v == "true",
                    None => !optional,
                };
                let content_type = field
                    .tags
                    .get("contentType")
                    .unwrap_or("application/json")
                    .to_string();
                let schema = schema_from_field(registry, field, &fd, Mode::All, &format!("{}Body", name))?;
                plan.body = Some(BodySpec {
                    field: field.name,
                    schema,
                    required,
                    content_type,
                });
            }
        }

        plan.check_path(template)?;
        Ok(plan)
    }

    /// Path parameters and template placeholders must match one to one.
    fn check_path(&self, template: &PathTemplate) -> Result<(), RegistrationError> {
        let declared: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.loc == ParamLocation::Path)
            .map(|p| p.name.as_str())
            .collect();
        for name in &declared {
            if !template.params().any(|t| t == *name) {
                return Err(RegistrationError::PathParamNotInTemplate {
                    param: name.to_string(),
                    path: template.as_str().to_string(),
                });
            }
        }
        for name in template.params() {
            if !declared.contains(&name) {
                return Err(RegistrationError::PathParamUndeclared {
                    param: name.to_string(),
                    path: template.as_str().to_string(),
                });
            }
        }
        Ok(())
    }
}

/// An output field written as a response header.
#[derive(Debug, Clone)]
pub(crate) struct OutputHeader {
    pub field: &'static str,
    pub name: String,
    /// Date-times are written as HTTP dates.
    pub is_time: bool,
}

/// The output field written as the response body.
#[derive(Debug, Clone)]
pub(crate) struct OutputBody {
    pub field: &'static str,
    /// `None` for raw bodies.
    pub schema: Option<Schema>,
    pub raw: bool,
    pub content_type: Option<String>,
}

/// How to encode an output type.
#[derive(Debug, Clone, Default)]
pub(crate) struct OutputPlan {
    pub headers: Vec<OutputHeader>,
    pub status_field: Option<&'static str>,
    pub body: Option<OutputBody>,
    pub default_status: u16,
    pub header_docs: BTreeMap<String, Header>,
}

impl OutputPlan {
    pub(crate) fn build(registry: &mut Registry, desc: &TypeDescriptor) -> Result<Self, RegistrationError> {
        let name = registry.name_for(desc, "Output");
        let mut plan = OutputPlan::default();

        for field in object_fields(desc, "output")? {
            let fd = (field.ty)().inner();

            if let Some(tag) = field.tags.get("header") {
                let header = match tag {
                    "" | "true" => field.wire_name().to_string(),
                    other => other.to_string(),
                };
                let mut schema = schema_from_field(registry, field, &fd, Mode::Read, &name)?;
                let description = schema.description.take();
                plan.header_docs.insert(
                    header.clone(),
                    Header {
                        description,
                        schema: Some(schema),
                        ..Default::default()
                    },
                );
                plan.headers.push(OutputHeader {
                    field: field.name,
                    name: header,
                    is_time: matches!(fd.kind, TypeKind::DateTime),
                });
                continue;
            }

            let int = matches!(fd.kind, TypeKind::Integer { .. });
            if field.tags.has("status") || (field.ident == "status" && int) {
                if !int {
                    return Err(RegistrationError::InvalidType {
                        kind: "output",
                        type_name: desc.name.to_string(),
                        reason: format!("status field '{}' must be an integer", field.ident),
                    });
                }
                plan.status_field = Some(field.name);
                continue;
            }

            if is_body(field) {
                let raw = fd.id == TypeId::of::<Vec<u8>>();
                let schema = if raw {
                    None
                } else {
                    Some(schema_from_field(registry, field, &fd, Mode::All, &format!("{}Body", name))?)
                };
                plan.body = Some(OutputBody {
                    field: field.name,
                    schema,
                    raw,
                    content_type: field.tags.get("contentType").map(str::to_string),
                });
            }
        }
        Ok(plan)
    }

    /// Whether the body is an array, which makes a GET a `list-...`.
    pub(crate) fn is_list(&self, registry: &Registry) -> bool {
        self.body
            .as_ref()
            .and_then(|b| b.schema.as_ref())
            .and_then(|s| registry.resolve(s))
            .map_or(false, |s| s.is_type(InstanceType::Array))
    }
}

/// Success status used when the output sets none.
pub(crate) fn default_status(op: &Operation, output: &OutputPlan) -> u16 {
    if let Some(status) = op.default_status {
        return status;
    }
    if output.body.is_none() {
        return StatusCode::NO_CONTENT.as_u16();
    }
    if op.method == Method::POST {
        return StatusCode::CREATED.as_u16();
    }
    StatusCode::OK.as_u16()
}

fn reason(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Response")
        .to_string()
}

fn error_response(description: String, error_schema: &Schema) -> DocResponse {
    let mut res = DocResponse::new(description);
    res.content
        .insert(PROBLEM_JSON.to_string(), MediaType::with_schema(error_schema.clone()));
    res
}

/// Build the OpenAPI operation for a registered operation.
pub(crate) fn document(
    registry: &mut Registry,
    op: &Operation,
    input: &InputPlan,
    output: &OutputPlan,
    media_type: &str,
) -> Result<DocOperation, RegistrationError> {
    let mut doc = DocOperation {
        tags: op.tags.clone(),
        summary: op.summary.clone(),
        description: op.description.clone(),
        external_docs: op.external_docs.clone(),
        operation_id: op.operation_id.clone(),
        deprecated: op.deprecated,
        security: op.security.clone(),
        servers: op.servers.clone(),
        extensions: op.extensions.clone(),
        ..Default::default()
    };

    doc.parameters = input
        .params
        .iter()
        .filter(|p| !p.hidden)
        .map(ParamSpec::to_openapi)
        .collect();

    if let Some(body) = &input.body {
        let mut rb = DocRequestBody {
            required: body.required,
            ..Default::default()
        };
        rb.content
            .insert(body.content_type.clone(), MediaType::with_schema(body.schema.clone()));
        doc.request_body = Some(rb);
    } else if let Some(raw) = &input.raw_body {
        let schema = match raw.kind {
            RawBodyKind::Bytes => Schema::string_format("binary"),
            RawBodyKind::Form => registry.schema_for::<MultipartForm>()?,
        };
        let mut rb = DocRequestBody {
            required: true,
            ..Default::default()
        };
        rb.content.insert(raw.content_type.clone(), MediaType::with_schema(schema));
        doc.request_body = Some(rb);
    }

    let status = output.default_status;
    let mut success = DocResponse::new(reason(status));
    success.headers = output.header_docs.clone();
    if let Some(body) = &output.body {
        match &body.schema {
            Some(schema) => {
                let ct = body.content_type.as_deref().unwrap_or(media_type);
                success.content.insert(ct.to_string(), MediaType::with_schema(schema.clone()));
            }
            None => {
                let ct = body.content_type.as_deref().unwrap_or(OCTET_STREAM);
                success
                    .content
                    .insert(ct.to_string(), MediaType::with_schema(Schema::string_format("binary")));
            }
        }
    }
    doc.responses.insert(status.to_string(), success);

    let error_schema = registry.schema_for::<ApiError>()?;
    if op.errors.is_empty() {
        doc.responses
            .entry("default".to_string())
            .or_insert_with(|| error_response("Error".to_string(), &error_schema));
    } else {
        let mut codes = op.errors.clone();
        if !input.params.is_empty() || input.body.is_some() {
            codes.push(StatusCode::UNPROCESSABLE_ENTITY.as_u16());
        }
        codes.push(StatusCode::INTERNAL_SERVER_ERROR.as_u16());
        for code in codes {
            doc.responses
                .entry(code.to_string())
                .or_insert_with(|| error_response(reason(code), &error_schema));
        }
    }

    for (code, res) in &op.responses {
        doc.responses.insert(code.clone(), res.clone());
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiforge_schema::{Describe, Tags};
    use chrono::{DateTime, Utc};

    struct ThingInput;

    impl Describe for ThingInput {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::new::<Self>(TypeKind::Object(vec![
                FieldDescriptor::new("id", "id", String::describe).with_tags(Tags(&[("path", "id")])),
                FieldDescriptor::new("verbose", "verbose", bool::describe)
                    .with_tags(Tags(&[("query", "verbose"), ("hidden", "true")])),
                FieldDescriptor::new("body", "body", <Option<Vec<String>>>::describe),
            ]))
            .named("ThingInput")
        }
    }

    struct ThingOutput;

    impl Describe for ThingOutput {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::new::<Self>(TypeKind::Object(vec![
                FieldDescriptor::new("etag", "etag", String::describe)
                    .with_tags(Tags(&[("header", "ETag"), ("doc", "Version")])),
                FieldDescriptor::new("modified", "modified", <DateTime<Utc>>::describe)
                    .with_tags(Tags(&[("header", "Last-Modified")])),
                FieldDescriptor::new("status", "status", u16::describe),
                FieldDescriptor::new("body", "body", <Vec<String>>::describe),
            ]))
            .named("ThingOutput")
        }
    }

    struct RawInput;

    impl Describe for RawInput {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::new::<Self>(TypeKind::Object(vec![FieldDescriptor::new(
                "raw_body",
                "raw_body",
                <Vec<u8>>::describe,
            )]))
        }
    }

    fn template(path: &str) -> PathTemplate {
        PathTemplate::parse(path).unwrap()
    }

    #[test]
    fn input_plan_splits_fields() {
        let mut registry = Registry::new();
        let plan = InputPlan::build(&mut registry, &ThingInput::describe(), &template("/things/{id}")).unwrap();
        assert_eq!(plan.params.len(), 2);
        let body = plan.body.unwrap();
        assert_eq!(body.field, "body");
        assert!(!body.required);
        assert_eq!(body.content_type, "application/json");
        assert!(plan.raw_body.is_none());

        let raw = InputPlan::build(&mut registry, &RawInput::describe(), &template("/upload")).unwrap();
        let raw = raw.raw_body.unwrap();
        assert_eq!(raw.kind, RawBodyKind::Bytes);
        assert_eq!(raw.content_type, OCTET_STREAM);
    }

    #[test]
    fn path_params_must_match_template() {
        let mut registry = Registry::new();
        let err = InputPlan::build(&mut registry, &ThingInput::describe(), &template("/things/{other}")).unwrap_err();
        assert!(matches!(err, RegistrationError::PathParamNotInTemplate { ref param, .. } if param == "id"));

        let err = InputPlan::build(&mut registry, &RawInput::describe(), &template("/upload/{id}")).unwrap_err();
        assert!(matches!(err, RegistrationError::PathParamUndeclared { ref param, .. } if param == "id"));
    }

    #[test]
    fn inputs_must_be_structs() {
        let mut registry = Registry::new();
        let err = InputPlan::build(&mut registry, &String::describe(), &template("/")).unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidType { kind: "input", .. }));
    }

    #[test]
    fn output_plan_finds_headers_status_and_body() {
        let mut registry = Registry::new();
        let plan = OutputPlan::build(&mut registry, &ThingOutput::describe()).unwrap();
        let headers: Vec<_> = plan.headers.iter().map(|h| (h.field, h.name.as_str(), h.is_time)).collect();
        assert_eq!(headers, [("etag", "ETag", false), ("modified", "Last-Modified", true)]);
        assert_eq!(plan.status_field, Some("status"));
        assert!(plan.is_list(&registry));
        assert_eq!(plan.header_docs["ETag"].description.as_deref(), Some("Version"));
    }

    #[test]
    fn default_statuses() {
        let with_body = OutputPlan {
            body: Some(OutputBody {
                field: "body",
                schema: None,
                raw: true,
                content_type: None,
            }),
            ..Default::default()
        };
        assert_eq!(default_status(&Operation::post("/"), &with_body), 201);
        assert_eq!(default_status(&Operation::get("/"), &with_body), 200);
        assert_eq!(default_status(&Operation::get("/"), &OutputPlan::default()), 204);
        assert_eq!(default_status(&Operation::post("/").default_status(200), &with_body), 200);
    }

    #[test]
    fn documents_parameters_bodies_and_errors() {
        let mut registry = Registry::new();
        let input = InputPlan::build(&mut registry, &ThingInput::describe(), &template("/things/{id}")).unwrap();
        let mut output = OutputPlan::build(&mut registry, &ThingOutput::describe()).unwrap();
        output.default_status = 200;

        let op = Operation::put("/things/{id}").errors(&[404]);
        let doc = document(&mut registry, &op, &input, &output, "application/json").unwrap();

        let names: Vec<_> = doc.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["id"]);
        assert!(doc.request_body.as_ref().unwrap().content.contains_key("application/json"));
        let codes: Vec<_> = doc.responses.keys().map(String::as_str).collect();
        assert_eq!(codes, ["200", "404", "422", "500"]);
        assert!(doc.responses["200"].headers.contains_key("Last-Modified"));
        assert!(doc.responses["404"].content.contains_key(PROBLEM_JSON));

        let plain = document(&mut registry, &Operation::put("/things/{id}"), &input, &output, "application/json").unwrap();
        assert!(plain.responses.contains_key("default"));
        assert!(registry.get("ErrorModel").is_some());
    }
}
