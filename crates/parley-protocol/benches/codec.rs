//! Codec benchmarks for parley-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use parley_protocol::{codec, Frame};

fn bench_encode_message(c: &mut Criterion) {
    let frame = Frame::message(format!("[12:00] alice: {}", "x".repeat(64)));

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));
    group.bench_function("message_64B", |b| b.iter(|| codec::encode(black_box(&frame))));
    group.finish();
}

fn bench_decode_roster(c: &mut Criterion) {
    let names = (0..100).map(|i| format!("user-{i}")).collect();
    let encoded = codec::encode(&Frame::roster(1, names)).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("roster_100", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

criterion_group!(benches, bench_encode_message, bench_decode_roster);
criterion_main!(benches);
