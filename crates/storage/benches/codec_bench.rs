//! Tile codec throughput over representative payloads.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tessera_core::{Compressor, Datatype};
use tessera_storage::codec;

fn sequential_i64_payload(cells: usize) -> Vec<u8> {
    (0..cells as i64).flat_map(|v| (v * 7).to_le_bytes()).collect()
}

fn repetitive_i32_payload(cells: usize) -> Vec<u8> {
    (0..cells).flat_map(|i| ((i / 64) as i32).to_le_bytes()).collect()
}

fn bench_compress(c: &mut Criterion) {
    let sequential = sequential_i64_payload(64 * 1024);
    let repetitive = repetitive_i32_payload(64 * 1024);

    let mut group = c.benchmark_group("compress");
    for compressor in [
        Compressor::Rle,
        Compressor::DoubleDelta,
        Compressor::Zstd,
        Compressor::Lz4,
        Compressor::ShuffleZstd,
    ] {
        group.bench_function(format!("{}/sequential", compressor.name()), |b| {
            b.iter(|| {
                codec::compress(compressor, -1, Datatype::Int64, black_box(&sequential))
                    .unwrap()
            })
        });
        group.bench_function(format!("{}/repetitive", compressor.name()), |b| {
            b.iter(|| {
                codec::compress(compressor, -1, Datatype::Int32, black_box(&repetitive))
                    .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_round_trip(c: &mut Criterion) {
    let payload = repetitive_i32_payload(64 * 1024);
    let mut group = c.benchmark_group("round_trip");
    for compressor in [Compressor::Rle, Compressor::Zstd, Compressor::Gzip] {
        let packed = codec::compress(compressor, -1, Datatype::Int32, &payload).unwrap();
        group.bench_function(compressor.name(), |b| {
            b.iter(|| codec::decompress(compressor, Datatype::Int32, black_box(&packed)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compress, bench_round_trip);
criterion_main!(benches);
