//! Micro-benchmarks for the RFC 6455 frame codec (spec.md §4.4): the
//! encode/decode pair is on the hot path of every session's read and
//! write loop, so its cost per payload size is worth tracking.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use stormsocket::ws::{decode, encode, WsFrame};

fn encode_unmasked(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_unmasked");
    for size in [64usize, 4096, 65_536] {
        let payload = vec![0x42u8; size];
        let frame = WsFrame::binary(payload);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| {
                let mut out = Vec::new();
                encode(black_box(frame), false, &mut out);
                black_box(out);
            });
        });
    }
    group.finish();
}

fn encode_masked(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_masked");
    for size in [64usize, 4096, 65_536] {
        let payload = vec![0x42u8; size];
        let frame = WsFrame::binary(payload);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| {
                let mut out = Vec::new();
                encode(black_box(frame), true, &mut out);
                black_box(out);
            });
        });
    }
    group.finish();
}

fn decode_masked(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_masked");
    for size in [64usize, 4096, 65_536] {
        let payload = vec![0x42u8; size];
        let mut wire = Vec::new();
        encode(&WsFrame::binary(payload), true, &mut wire);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &wire, |b, wire| {
            b.iter_batched(
                || wire.clone(),
                |mut buffer| {
                    let frame = decode(black_box(&mut buffer), 1 << 20).unwrap();
                    black_box(frame);
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, encode_unmasked, encode_masked, decode_masked);
criterion_main!(benches);
