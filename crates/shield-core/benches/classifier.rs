//! Benchmarks for domain classification and DNS decoding.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use shield_core::packet::DnsQuery;
use shield_core::{classify, ListType, PolicyStore};

fn generate_blocklist(size: usize) -> Vec<String> {
    (0..size)
        .map(|i| {
            if i % 2 == 0 {
                format!("blocked{i}.com")
            } else {
                format!("*.ads{i}.net")
            }
        })
        .collect()
}

fn encode_query(name: &str) -> Vec<u8> {
    let mut msg = vec![0x12, 0x34, 0x01, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0];
    for label in name.split('.') {
        msg.push(u8::try_from(label.len()).unwrap());
        msg.extend_from_slice(label.as_bytes());
    }
    msg.extend_from_slice(&[0, 0, 1, 0, 1]);
    msg
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");

    for size in &[10, 100, 1000, 10000] {
        let store = PolicyStore::new();
        let blocklist = generate_blocklist(*size);
        store
            .add_entries(blocklist.iter().map(String::as_str), ListType::Block)
            .unwrap();
        let snapshot = store.snapshot();

        group.bench_with_input(BenchmarkId::new("wildcard_hit", size), &snapshot, |b, snapshot| {
            b.iter(|| classify(black_box("tracking.ads1.net"), snapshot));
        });

        group.bench_with_input(BenchmarkId::new("category_hit", size), &snapshot, |b, snapshot| {
            b.iter(|| classify(black_box("www.pornhub.com"), snapshot));
        });

        // Every rule set is consulted before the default verdict
        group.bench_with_input(BenchmarkId::new("miss", size), &snapshot, |b, snapshot| {
            b.iter(|| classify(black_box("docs.rust-lang.org"), snapshot));
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let query = encode_query("www.example.com");
    c.bench_function("dns_query_parse", |b| {
        b.iter(|| DnsQuery::parse(black_box(&query)));
    });
}

criterion_group!(benches, bench_classify, bench_decode);
criterion_main!(benches);
