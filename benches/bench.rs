use criterion::{criterion_group, criterion_main, Criterion};
use tony::snapshot::{Snapshot, SnapshotWriter};
use tony::{encode, parse, EncodeOptions};

/// A few thousand entries of mixed shapes, roughly what a large service
/// configuration looks like.
fn large_document() -> String {
    let mut doc = String::with_capacity(1 << 20);
    for i in 0..2_000 {
        doc.push_str(&format!("service{i}:\n"));
        doc.push_str(&format!("  replicas: {}\n", i % 7 + 1));
        doc.push_str(&format!("  image: registry.example.com/app{i}\n"));
        doc.push_str("  env:\n");
        doc.push_str(&format!("    - LOG_LEVEL=debug{i}\n"));
        doc.push_str("    - REGION=us-east-1\n");
        doc.push_str(&format!(
            "  limits: {{cpu: {}, mem: {}}}\n",
            i % 4,
            i * 16 % 4096
        ));
        if i % 5 == 0 {
            doc.push_str("  # pinned during the migration\n");
            doc.push_str("  pinned: true\n");
        }
    }
    doc
}

pub fn parser(c: &mut Criterion) {
    let input = large_document();
    c.bench_function("parse large", |b| {
        b.iter(|| parse(input.as_bytes()).unwrap())
    });

    let tree = parse(input.as_bytes()).unwrap();
    c.bench_function("encode large", |b| {
        b.iter(|| encode(&tree, &EncodeOptions::default()).unwrap())
    });

    c.bench_function("snapshot write large", |b| {
        b.iter(|| SnapshotWriter::new().write(&tree).unwrap())
    });

    let bytes = SnapshotWriter::new().write(&tree).unwrap();
    c.bench_function("snapshot open + field load", |b| {
        b.iter(|| {
            let snapshot = Snapshot::open(bytes.as_slice()).unwrap();
            snapshot.load_field("service1042").unwrap()
        })
    });
}

criterion_group!(benches, parser);
criterion_main!(benches);
