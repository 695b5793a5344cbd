//! Replacing the process-wide error factory.
//!
//! Kept in its own test binary: the factory is global state.

use std::fmt;

use apiforge::prelude::*;
use apiforge::{reset_error_factory, set_error_factory, StatusError, TestClient};
use http::StatusCode;
use serde_json::{json, Value};

#[derive(Debug)]
struct PlainError {
    status: StatusCode,
    message: String,
    count: usize,
}

impl fmt::Display for PlainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl StatusError for PlainError {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn to_value(&self) -> Value {
        json!({ "error": self.message, "count": self.count })
    }

    fn content_type(&self, _negotiated: &str) -> String {
        "application/json".to_string()
    }
}

fn plain(status: StatusCode, msg: &str, errs: Vec<ErrorDetail>) -> Box<dyn StatusError> {
    Box::new(PlainError {
        status,
        message: msg.to_string(),
        count: errs.len(),
    })
}

#[derive(Deserialize, Model)]
struct CountInput {
    #[field(query, required = true)]
    count: u32,
}

async fn count(_input: CountInput) -> Result<Empty> {
    Ok(Empty {})
}

#[tokio::test]
async fn custom_factory_shapes_pipeline_errors() {
    let mut api = Api::new(Config::new("Factory", "1.0.0"));
    api.get("/count", count).unwrap();
    let client = TestClient::new(api);

    set_error_factory(plain);
    let res = client.get("/count?count=many").send().await;
    let missing = client.get("/nowhere").send().await;
    reset_error_factory();

    res.assert_status(422)
        .assert_header("content-type", "application/json");
    let body: Value = res.json().unwrap();
    assert_eq!(body, json!({"error": "validation failed", "count": 1}));

    missing.assert_status(404);
    let body: Value = missing.json().unwrap();
    assert!(body["error"].as_str().unwrap().starts_with("no route found"));

    let res = client.get("/count?count=many").send().await;
    res.assert_status(422)
        .assert_header("content-type", "application/problem+json");
}
