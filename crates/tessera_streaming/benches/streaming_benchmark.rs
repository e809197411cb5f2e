//! Benchmark for replication payloads and the streaming round trip.
//!
//! TARGET: Encode + decode of a fully meshed 64-cell tile in < 2ms
//!
//! Run with: cargo bench --package tessera_streaming --bench streaming_benchmark

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tessera_procedural::{GenerationPipeline, TileCoord};
use tessera_shared::{TerrainConfig, Vec2};
use tessera_streaming::{StreamingService, TilePayload};

fn benchmark_payload_codec(c: &mut Criterion) {
    let pipeline = GenerationPipeline::new(TerrainConfig::default()).unwrap();
    let tile = pipeline.generate_complete(TileCoord::new(0, 0));
    let payload = TilePayload::encode(&tile);
    println!("Payload size: {} bytes", payload.len());

    let mut group = c.benchmark_group("payload");
    group.bench_function("encode", |b| b.iter(|| black_box(TilePayload::encode(&tile))));
    group.bench_function("decode", |b| b.iter(|| black_box(payload.decode())));
    group.finish();
}

fn benchmark_ring_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("service");
    group.sample_size(10);
    group.bench_function("ring_3x3_request_to_drain", |b| {
        let mut service = StreamingService::new(TerrainConfig::default()).unwrap();
        let mut offset = 0;
        b.iter(|| {
            offset += 10;
            let ring = TileCoord::new(offset, 0).ring(1);
            service.request_tiles(&ring);
            black_box(service.flush(Duration::from_secs(60)))
        });
        service.shutdown().unwrap();
    });
    group.bench_function("height_at_sync_fallback", |b| {
        let mut service = StreamingService::new(TerrainConfig::default()).unwrap();
        let mut x = 0.0f32;
        b.iter(|| {
            x += 100.0;
            black_box(service.height_at(Vec2::new(x, -250.0)))
        });
        service.shutdown().unwrap();
    });
    group.finish();
}

criterion_group!(benches, benchmark_payload_codec, benchmark_ring_round_trip);
criterion_main!(benches);
