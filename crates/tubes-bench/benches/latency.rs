//! Latency benchmarks for tubes.
//!
//! These benchmarks focus on path resolution and single delivery latency.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Instant;
use tubes_bench::{frame, queued_client, PAYLOAD};
use tubes_core::{tracing_sink, ChannelHandlers, ContextBroadcastOptions, Hooks, PathPattern, Router};
use tubes_protocol::Envelope;

/// Benchmark matching a single pattern.
fn bench_path_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("path_match");

    let literal = PathPattern::parse("rooms/lobby/messages");
    group.bench_function("literal", |b| {
        b.iter(|| literal.matches(black_box("rooms/lobby/messages")))
    });

    let params = PathPattern::parse("orgs/:org/rooms/:room");
    group.bench_function("params", |b| {
        b.iter(|| params.matches(black_box("orgs/acme/rooms/lobby")))
    });

    let wildcard = PathPattern::parse("rooms/*/messages");
    group.bench_function("wildcard", |b| {
        b.iter(|| wildcard.matches(black_box("rooms/lobby/messages")))
    });

    group.bench_function("miss", |b| {
        b.iter(|| params.matches(black_box("orgs/acme/users/jon")))
    });

    group.bench_function("parse", |b| {
        b.iter(|| PathPattern::parse(black_box("orgs/:org/rooms/:room")))
    });

    group.finish();
}

/// Benchmark resolving a path against many registered patterns.
fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");

    // Setup: 1000 channels, one of them parameterized
    let router = Router::new(tracing_sink());
    for i in 0..999 {
        router.register_channel(format!("channels/{i}"), ChannelHandlers::new());
    }
    router.register_channel("users/:id", ChannelHandlers::new());

    group.bench_function("static_hit", |b| {
        let mut i = 0;
        b.iter(|| {
            let path = format!("channels/{}", i % 999);
            i += 1;
            router.channels().lookup(black_box(&path))
        });
    });

    group.bench_function("param_hit", |b| {
        b.iter(|| router.channels().lookup(black_box("users/jon")))
    });

    group.bench_function("exact", |b| {
        b.iter(|| router.channels().lookup_exact(black_box("users/:id")))
    });

    group.finish();
}

/// Benchmark publish-and-receive latency through client queues.
fn bench_delivery_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("delivery_latency");

    group.bench_function("direct_send", |b| {
        b.iter_custom(|iters| {
            let router = Router::new(tracing_sink());
            router.register_channel("inbox/:user", ChannelHandlers::new());
            let (client, mut rx) = queued_client("client-1");
            router.on_message(&client, &frame(&Envelope::subscribe("inbox/jon")));

            let start = Instant::now();
            for _ in 0..iters {
                let _ = router.send("inbox/jon", "client-1", PAYLOAD);
                let _ = rx.try_recv();
            }
            start.elapsed()
        });
    });

    group.bench_function("ten_subscribers", |b| {
        b.iter_custom(|iters| {
            let router = Router::new(tracing_sink());
            router.register_channel(
                "rooms/:room",
                ChannelHandlers::new().on_message(|ctx, envelope| {
                    if let Some(payload) = envelope.payload_bytes() {
                        ctx.broadcast(payload, ContextBroadcastOptions::default());
                    }
                }),
            );
            let subscribe = frame(&Envelope::subscribe("rooms/lobby"));
            let mut clients: Vec<_> = (0..10)
                .map(|i| {
                    let (client, rx) = queued_client(format!("client-{i}"));
                    router.on_message(&client, &subscribe);
                    (client, rx)
                })
                .collect();
            let message = frame(&Envelope::message("rooms/lobby", PAYLOAD).expect("valid payload"));
            let sender = clients[0].0.clone();

            let start = Instant::now();
            for _ in 0..iters {
                router.on_message(&sender, &message);
                for (_, rx) in &mut clients {
                    let _ = rx.try_recv();
                }
            }
            start.elapsed()
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_path_match,
    bench_lookup,
    bench_delivery_latency,
);
criterion_main!(benches);
