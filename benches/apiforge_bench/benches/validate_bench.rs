//! Schema validation benchmarks
//!
//! Measures request-body validation against generated schemas, for valid
//! bodies and for bodies with several independent violations.

#![allow(dead_code)]

use apiforge::prelude::*;
use apiforge::{validate, Registry, ValidateMode, ValidateResult};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};

#[derive(Deserialize, Model)]
struct UserBody {
    #[field(min_length = 1, max_length = 64)]
    name: String,
    #[field(format = "email")]
    email: String,
    #[field(minimum = 0, maximum = 150)]
    age: u32,
}

#[derive(Deserialize, Model)]
struct ComplexBody {
    user: UserBody,
    #[field(max_items = 10, unique_items)]
    tags: Vec<String>,
    metadata: std::collections::HashMap<String, String>,
}

fn complex_body() -> Value {
    json!({
        "user": {"name": "Alice", "email": "alice@example.com", "age": 30},
        "tags": ["a", "b", "c"],
        "metadata": {"source": "bench", "region": "eu"}
    })
}

fn bench_validate(c: &mut Criterion) {
    let mut registry = Registry::new();
    let user = registry.schema_for::<UserBody>().unwrap();
    let complex = registry.schema_for::<ComplexBody>().unwrap();
    registry.precompute_messages();

    let mut group = c.benchmark_group("validate");

    group.bench_function("simple_valid", |b| {
        let value = json!({"name": "Alice", "email": "alice@example.com", "age": 30});
        let mut path = PathBuffer::new();
        let mut res = ValidateResult::new();
        b.iter(|| {
            path.reset();
            path.push("body");
            res.reset();
            validate(&registry, &user, &mut path, ValidateMode::WriteToServer, black_box(&value), &mut res);
            res.len()
        })
    });

    group.bench_function("simple_invalid", |b| {
        let value = json!({"name": "", "email": "nope", "age": 200, "extra": true});
        let mut path = PathBuffer::new();
        let mut res = ValidateResult::new();
        b.iter(|| {
            path.reset();
            path.push("body");
            res.reset();
            validate(&registry, &user, &mut path, ValidateMode::WriteToServer, black_box(&value), &mut res);
            res.len()
        })
    });

    group.bench_function("complex_valid", |b| {
        let value = complex_body();
        let mut path = PathBuffer::new();
        let mut res = ValidateResult::new();
        b.iter(|| {
            path.reset();
            path.push("body");
            res.reset();
            validate(&registry, &complex, &mut path, ValidateMode::WriteToServer, black_box(&value), &mut res);
            res.len()
        })
    });

    group.finish();
}

fn bench_schema_generation(c: &mut Criterion) {
    c.bench_function("schema_generation/complex", |b| {
        b.iter(|| {
            let mut registry = Registry::new();
            black_box(registry.schema_for::<ComplexBody>().unwrap())
        })
    });
}

criterion_group!(benches, bench_validate, bench_schema_generation);
criterion_main!(benches);
