use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;

use iothub_link::twin::ChangeTracker;
use iothub_link::{TwinDocument, ValueKind};

// 16 maps of 32 leaves each, with every fourth leaf tombstoned.
fn seeded_document() -> TwinDocument {
    let mut doc = TwinDocument::with_listener(Arc::new(ChangeTracker::new()));
    let root = doc.root();
    for m in 0..16 {
        let name = format!("group{m}");
        doc.add_kind(root, &name, ValueKind::Map, None).unwrap();
        let node = doc.child_tree(root, &name).unwrap();
        for leaf in 0..32 {
            let key = format!("p{leaf}");
            doc.add_kind(node, &key, ValueKind::Number, Some(&json!(leaf))).unwrap();
            if leaf % 4 == 0 {
                doc.remove(node, &key).unwrap();
            }
        }
    }
    doc
}

fn bench_materialize(c: &mut Criterion) {
    let doc = seeded_document();
    let mut group = c.benchmark_group("twin");
    group.throughput(Throughput::Elements(16 * 32));
    group.bench_function("materialize_512", |b| {
        b.iter(|| black_box(doc.materialize_root()));
    });
    group.finish();
}

fn bench_deep_add(c: &mut Criterion) {
    c.bench_function("twin/add_at_depth_8", |b| {
        let mut doc = TwinDocument::with_listener(Arc::new(ChangeTracker::new()));
        let mut node = doc.root();
        for depth in 0..8 {
            let name = format!("d{depth}");
            doc.add_kind(node, &name, ValueKind::Map, None).unwrap();
            node = doc.child_tree(node, &name).unwrap();
        }
        b.iter(|| {
            doc.add_kind(node, "leaf", ValueKind::String, Some(&json!("v"))).unwrap();
            black_box(doc.generation())
        });
    });
}

criterion_group!(benches, bench_materialize, bench_deep_add);
criterion_main!(benches);
