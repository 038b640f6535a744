//! One-shot round-trip benchmark suite.
//!
//! Measures request/response latency over the in-process transport and
//! envelope parsing throughput:
//! - Single round-trips against an echo responder
//! - Concurrent in-flight batches: 10, 100
//!
//! Run with: cargo bench --bench roundtrip
//! Results saved to: target/criterion/

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::json;
use tokio::runtime::Runtime;

use adblock_messaging::protocol::Envelope;
use adblock_messaging::transport::Channel;
use adblock_messaging::{Messenger, Reply};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const BATCH_SIZES: &[usize] = &[10, 100];

// ============================================================================
// Fixture
// ============================================================================

/// An endpoint pair with an echo responder on the far side.
fn echo_pair() -> (Messenger, Messenger) {
    let (near, far) = Channel::duplex();
    let client = Messenger::attach(near);
    let server = Messenger::attach(far);

    server.on(
        "echo",
        Arc::new(|payload, _| Ok(Reply::value(payload.clone()))),
    );

    (client, server)
}

// ============================================================================
// Benchmark: Single Round-Trip
// ============================================================================

fn bench_roundtrip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let (client, _server) = rt.block_on(async { echo_pair() });

    c.bench_function("roundtrip/single", |b| {
        b.to_async(&rt).iter(|| async {
            client
                .send(json!({"type": "echo", "what": "platform"}))
                .await
                .expect("reply")
        });
    });
}

// ============================================================================
// Benchmark: Concurrent In-Flight Requests
// ============================================================================

fn bench_concurrent(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let (client, _server) = rt.block_on(async { echo_pair() });
    let client = Arc::new(client);

    let mut group = c.benchmark_group("roundtrip_concurrent");
    for &batch in BATCH_SIZES {
        group.bench_with_input(BenchmarkId::new("batch", batch), &batch, |b, &batch| {
            let client = Arc::clone(&client);
            b.to_async(&rt).iter(move || {
                let client = Arc::clone(&client);
                async move {
                    let requests: Vec<_> = (0..batch)
                        .map(|n| client.send(json!({"type": "echo", "n": n})))
                        .collect();
                    for request in requests {
                        request.await.expect("reply");
                    }
                }
            });
        });
    }
    group.finish();
}

// ============================================================================
// Benchmark: Envelope Parsing
// ============================================================================

fn bench_envelope_parse(c: &mut Criterion) {
    let wire = json!({
        "type": "filters.respond",
        "action": "added",
        "args": [{"text": "||ads.example^", "subscription": "EasyList"}],
    });

    c.bench_function("envelope/parse_event", |b| {
        b.iter(|| Envelope::from_value(std::hint::black_box(wire.clone())).expect("parse"));
    });
}

criterion_group!(benches, bench_roundtrip, bench_concurrent, bench_envelope_parse);
criterion_main!(benches);
