//! OpenAPI 3.0.3 compatibility view.
//!
//! Tools that predate 3.1 choke on type arrays and numeric exclusive bounds.
//! The rewrite works on the rendered JSON tree so every schema position is
//! covered, including ones nested in user-supplied extensions.

use serde_json::{Map, Value};

use crate::error::DocumentError;
use crate::spec::OpenApi;

impl OpenApi {
    /// The document rewritten for OpenAPI 3.0.3, as a JSON tree.
    pub fn downgrade_value(&self) -> Result<Value, DocumentError> {
        let mut value = downgrade_node(serde_json::to_value(self)?);
        if let Value::Object(root) = &mut value {
            root.insert("openapi".to_string(), Value::String("3.0.3".to_string()));
            root.retain(|k, _| k != "jsonSchemaDialect" && k != "webhooks");
        }
        Ok(value)
    }

    /// Render the 3.0.3 view as JSON.
    pub fn downgrade(&self) -> Result<Vec<u8>, DocumentError> {
        Ok(serde_json::to_vec(&self.downgrade_value()?)?)
    }

    /// Render the 3.0.3 view as YAML.
    pub fn downgrade_yaml(&self) -> Result<String, DocumentError> {
        Ok(serde_yaml::to_string(&self.downgrade_value()?)?)
    }
}

fn downgrade_node(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(downgrade_object(map)),
        Value::Array(items) => Value::Array(items.into_iter().map(downgrade_node).collect()),
        other => other,
    }
}

fn downgrade_object(map: Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::with_capacity(map.len());

    for (key, value) in map {
        match (key.as_str(), value) {
            ("type", Value::Array(types)) => {
                let nullable = types.iter().any(|t| t == "null");
                let mut concrete: Vec<Value> =
                    types.into_iter().filter(|t| t != "null").collect();
                if concrete.len() == 1 {
                    out.insert("type".to_string(), concrete.remove(0));
                } else if !concrete.is_empty() {
                    let any_of = concrete
                        .into_iter()
                        .map(|t| {
                            let mut m = Map::new();
                            m.insert("type".to_string(), t);
                            Value::Object(m)
                        })
                        .collect();
                    out.insert("anyOf".to_string(), Value::Array(any_of));
                }
                if nullable {
                    out.insert("nullable".to_string(), Value::Bool(true));
                }
            }
            ("exclusiveMinimum", Value::Number(n)) => {
                out.insert("minimum".to_string(), Value::Number(n));
                out.insert("exclusiveMinimum".to_string(), Value::Bool(true));
            }
            ("exclusiveMaximum", Value::Number(n)) => {
                out.insert("maximum".to_string(), Value::Number(n));
                out.insert("exclusiveMaximum".to_string(), Value::Bool(true));
            }
            ("examples", Value::Array(mut examples)) => {
                if !examples.is_empty() {
                    out.insert("example".to_string(), downgrade_node(examples.remove(0)));
                }
            }
            ("contentEncoding", Value::String(enc)) if enc == "base64" => {
                out.insert("format".to_string(), Value::String(enc));
            }
            (_, value) => {
                out.insert(key, downgrade_node(value));
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{MediaType, Operation, Response};
    use apiforge_schema::Schema;
    use serde_json::json;

    fn doc_with_schema(schema: Value) -> OpenApi {
        let mut doc = OpenApi::new("T", "1");
        let schema: Schema = serde_json::from_value(schema).unwrap();
        doc.components_mut().schemas.insert("Thing".into(), schema);
        doc
    }

    #[test]
    fn rewrites_schema_keywords() {
        let doc = doc_with_schema(json!({
            "type": "object",
            "properties": {
                "name": {"type": ["string", "null"], "examples": ["bob"]},
                "either": {"type": ["string", "integer"]},
                "count": {"type": "integer", "exclusiveMinimum": 0, "exclusiveMaximum": 10},
                "blob": {"type": "string", "contentEncoding": "base64"}
            }
        }));

        let v = doc.downgrade_value().unwrap();
        assert_eq!(v["openapi"], "3.0.3");

        let props = &v["components"]["schemas"]["Thing"]["properties"];
        assert_eq!(props["name"], json!({"type": "string", "nullable": true, "example": "bob"}));
        assert_eq!(
            props["either"],
            json!({"anyOf": [{"type": "string"}, {"type": "integer"}]})
        );
        assert_eq!(
            props["count"],
            json!({
                "type": "integer",
                "minimum": 0.0,
                "exclusiveMinimum": true,
                "maximum": 10.0,
                "exclusiveMaximum": true
            })
        );
        assert_eq!(props["blob"], json!({"type": "string", "format": "base64"}));
    }

    #[test]
    fn media_type_examples_maps_are_untouched() {
        let mut doc = OpenApi::new("T", "1");
        let mut media = MediaType::default();
        media.examples.insert("one".into(), Default::default());
        let mut response = Response::new("OK");
        response.content.insert("application/json".into(), media);
        let mut op = Operation::default();
        op.responses.insert("200".into(), response);
        doc.add_operation("GET", "/x", op).unwrap();

        let v = doc.downgrade_value().unwrap();
        let content = &v["paths"]["/x"]["get"]["responses"]["200"]["content"]["application/json"];
        assert!(content["examples"].is_object());
    }

    #[test]
    fn keeps_path_order_and_renders_yaml() {
        let mut doc = OpenApi::new("T", "1");
        doc.add_operation("GET", "/b", Operation::default()).unwrap();
        doc.add_operation("GET", "/a", Operation::default()).unwrap();

        let json = String::from_utf8(doc.downgrade().unwrap()).unwrap();
        assert!(json.find("\"/b\"").unwrap() < json.find("\"/a\"").unwrap());

        let yaml = doc.downgrade_yaml().unwrap();
        assert!(yaml.contains("openapi: 3.0.3"));
    }
}
