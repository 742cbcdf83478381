use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use metrics_wavefront::{decode_key, delta_counter, encode_key, TaggedRegistry, Tags};

fn tags() -> Tags {
    let mut tags = Tags::new();
    tags.insert("type".to_string(), "http".to_string());
    tags.insert("region".to_string(), "us-west".to_string());
    tags
}

fn registry_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    group.bench_function("cached counter (basic)", |b| {
        let registry = TaggedRegistry::new();
        registry.counter("simple_key", None);
        b.iter(|| registry.counter("simple_key", None).inc(1))
    });
    group.bench_function("cached counter (tags)", |b| {
        let registry = TaggedRegistry::new();
        let tags = tags();
        registry.counter("simple_key", Some(&tags));
        b.iter(|| registry.counter("simple_key", Some(&tags)).inc(1))
    });
    group.bench_function("uncached counter (tags)", |b| {
        let tags = tags();
        b.iter_batched_ref(
            TaggedRegistry::new,
            |registry| registry.counter("simple_key", Some(&tags)).inc(1),
            BatchSize::SmallInput,
        )
    });
    group.bench_function("cached delta counter", |b| {
        let registry = TaggedRegistry::new();
        b.iter(|| delta_counter(&registry, "simple_key", None).map(|delta| delta.inc(1)))
    });
    group.bench_function("snapshot (1000 metrics)", |b| {
        let registry = TaggedRegistry::new();
        for i in 0..1000 {
            registry.counter(&format!("key_{i}"), None);
        }
        b.iter(|| registry.snapshot())
    });

    group.finish();
}

fn key_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("key");
    let tags = tags();
    let encoded = encode_key("simple_key", Some(&tags));

    group.bench_function("encode (basic)", |b| b.iter(|| encode_key("simple_key", None)));
    group.bench_function("encode (tags)", |b| b.iter(|| encode_key("simple_key", Some(&tags))));
    group.bench_function("decode (tags)", |b| b.iter(|| decode_key(&encoded)));

    group.finish();
}

criterion_group!(benches, registry_benchmark, key_benchmark);
criterion_main!(benches);
