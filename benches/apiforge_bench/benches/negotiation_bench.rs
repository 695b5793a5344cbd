//! Content negotiation benchmarks

use apiforge::negotiation::{negotiate, parse_accept};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_negotiation(c: &mut Criterion) {
    let mut group = c.benchmark_group("negotiation");
    let offered = ["application/json", "application/cbor", "application/yaml"];

    group.bench_function("no_header", |b| {
        b.iter(|| negotiate(black_box(None), &offered).map(|n| n.media_type))
    });

    group.bench_function("browser_accept", |b| {
        let header = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
        b.iter(|| negotiate(black_box(Some(header)), &offered).map(|n| n.media_type))
    });

    group.bench_function("weighted", |b| {
        let header = "application/cbor;q=0.5, application/json;q=0.9, application/yaml;q=0.1";
        b.iter(|| negotiate(black_box(Some(header)), &offered).map(|n| n.media_type))
    });

    group.bench_function("parse_accept", |b| {
        let header = "application/json;q=0.9;charset=utf-8, text/*;q=0.5, */*;q=0.1";
        b.iter(|| parse_accept(black_box(header)).len())
    });

    group.finish();
}

criterion_group!(benches, bench_negotiation);
criterion_main!(benches);
