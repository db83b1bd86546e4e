//! # Twin Correlation Benchmarks
//!
//! | Path | Operation |
//! |------|-----------|
//! | codec | decode of response and event frames |
//! | pending table | register then resolve, at several table sizes |
//! | router | raw frame to resolved handle |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use twin_correlation::codec;
use twin_correlation::{
    ChangeAction, ChangeEvent, ChangeSubscriptionRegistry, ClientConfig, CorrelationId,
    InboundMessage, InboundRouter, PendingRequestTable,
};

// ============================================================================
// Codec
// ============================================================================

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    let response = codec::encode_inbound(&InboundMessage::success(
        CorrelationId::new(),
        json!({"thingId": "org.example:lamp", "attributes": {"on": true, "level": 80}}),
    ))
    .unwrap();
    let event = codec::encode_inbound(&InboundMessage::Event(
        ChangeEvent::new("org.example:lamp", ChangeAction::Modified, json!(80))
            .at_path("/attributes/level")
            .with_revision(42),
    ))
    .unwrap();

    group.bench_function("decode_response", |b| {
        b.iter(|| black_box(codec::decode_inbound(black_box(&response)).is_ok()))
    });
    group.bench_function("decode_event", |b| {
        b.iter(|| black_box(codec::decode_inbound(black_box(&event)).is_ok()))
    });

    group.finish();
}

// ============================================================================
// Pending table
// ============================================================================

fn bench_pending_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("pending-table");

    // Background load the lookup has to coexist with
    for outstanding in [0usize, 1_000, 10_000] {
        let table = Arc::new(PendingRequestTable::new(Duration::from_secs(60)));
        let _parked: Vec<_> = (0..outstanding)
            .map(|_| table.register("things.retrieve", None))
            .collect();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("register_resolve", outstanding),
            &outstanding,
            |b, _| {
                b.iter(|| {
                    let (id, handle) = table.register("things.retrieve", None);
                    black_box(table.resolve(id, Ok(json!(null))));
                    drop(handle);
                })
            },
        );
    }

    group.finish();
}

// ============================================================================
// Router
// ============================================================================

fn bench_router(c: &mut Criterion) {
    let mut group = c.benchmark_group("router");

    let config = ClientConfig::default();
    let pending = Arc::new(PendingRequestTable::new(config.default_timeout));
    let router = InboundRouter::new(
        Arc::clone(&pending),
        Arc::new(ChangeSubscriptionRegistry::new(&config)),
    );

    group.bench_function("raw_response_to_handle", |b| {
        b.iter(|| {
            let (id, handle) = pending.register("things.retrieve", None);
            let frame =
                codec::encode_inbound(&InboundMessage::success(id, json!({"ok": true}))).unwrap();
            black_box(router.on_raw(&frame));
            black_box(futures::executor::block_on(handle).is_ok())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_codec, bench_pending_table, bench_router);
criterion_main!(benches);
