//! Performance benchmarks for the output path.
//!
//! These benchmarks measure the hot paths between a shell channel and a
//! client:
//! - Output buffer push and drain
//! - Relay decision with and without a listener
//! - UTF-8 decoding of channel data
//! - End-to-end pool throughput over the in-memory connector

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use daemon::session::{relay, OutputBuffer, OutputState, Utf8Decoder};
use daemon::{Config, ListenerHub, MemoryConnector, SessionPool};
use protocol::{listener_destination, ConnectRequest, Credential, ShellTarget};

/// Benchmark buffer push, including eviction at capacity.
fn bench_buffer_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_push");
    let chunk = "x".repeat(80);
    group.throughput(Throughput::Bytes(chunk.len() as u64));

    // Below capacity
    group.bench_function("below_capacity", |b| {
        b.iter_batched(
            || OutputBuffer::new(1_000),
            |mut buffer| {
                buffer.push(black_box(chunk.clone()));
                buffer
            },
            criterion::BatchSize::SmallInput,
        );
    });

    // Every push evicts the oldest entry
    group.bench_function("at_capacity", |b| {
        let mut buffer = OutputBuffer::new(1_000);
        for _ in 0..1_000 {
            buffer.push(chunk.clone());
        }
        b.iter(|| buffer.push(black_box(chunk.clone())));
    });

    group.finish();
}

/// Benchmark draining a full buffer in fetch-sized batches.
fn bench_buffer_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_drain");
    let chunk = "line of terminal output\r\n".to_string();

    for entries in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(entries as u64));
        group.bench_function(format!("{}_entries", entries), |b| {
            b.iter_batched(
                || {
                    let mut buffer = OutputBuffer::new(entries);
                    for _ in 0..entries {
                        buffer.push(chunk.clone());
                    }
                    buffer
                },
                |mut buffer| {
                    while !buffer.drain(1_000, 100_000).is_empty() {}
                    buffer
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Benchmark the relay decision for one chunk.
fn bench_relay(c: &mut Criterion) {
    let mut group = c.benchmark_group("relay");
    let destination = listener_destination("bench", "session");
    let chunk = "x".repeat(80);

    group.bench_function("buffered", |b| {
        let hub = ListenerHub::default();
        let mut state = OutputState::new(10_000);
        b.iter(|| relay(&mut state, &hub, &destination, black_box(chunk.clone())));
    });

    group.bench_function("pushed", |b| {
        let hub = ListenerHub::new(16);
        let (_id, mut rx) = hub.subscribe(&destination);
        let mut state = OutputState::new(10_000);
        state.listener_attached = true;
        b.iter(|| {
            let delivery = relay(&mut state, &hub, &destination, black_box(chunk.clone()));
            let _ = rx.try_recv();
            delivery
        });
    });

    group.finish();
}

/// Benchmark UTF-8 decoding of channel data.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("utf8_decode");

    let ascii = vec![b'a'; 4096];
    group.throughput(Throughput::Bytes(ascii.len() as u64));
    group.bench_function("ascii_4KB", |b| {
        let mut decoder = Utf8Decoder::new();
        b.iter(|| decoder.decode(black_box(&ascii)));
    });

    // Multi-byte characters split across chunk boundaries
    let text = "état ✓ 日本語 ".repeat(256).into_bytes();
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("split_multibyte", |b| {
        let mut decoder = Utf8Decoder::new();
        b.iter(|| {
            let mut out = String::new();
            for piece in text.chunks(333) {
                out.push_str(&decoder.decode(black_box(piece)));
            }
            out
        });
    });

    group.finish();
}

/// Benchmark output flowing from a fake shell into a session buffer.
fn bench_pool_throughput(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("Failed to create runtime");
    let mut group = c.benchmark_group("pool_throughput");
    group.throughput(Throughput::Elements(100));

    let hub = Arc::new(ListenerHub::default());
    let pool = Arc::new(SessionPool::new(
        &Config::default(),
        MemoryConnector::new(),
        hub,
    ));
    let request = ConnectRequest {
        target: ShellTarget::new("bench", "bench"),
        credential: Credential::Password {
            password: "bench".to_string(),
        },
    };
    let info = rt
        .block_on(pool.connect("bench", request))
        .expect("Failed to connect");
    let link = pool.connector().last_link().expect("No link opened");

    group.bench_function("100_chunks", |b| {
        b.to_async(&rt).iter(|| async {
            for _ in 0..100 {
                link.output("line of terminal output\r\n");
            }
            while pool.buffered_count("bench", &info.session_id).unwrap_or(0) < 100 {
                tokio::task::yield_now().await;
            }
            black_box(pool.get_buffered_output("bench", &info.session_id))
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_buffer_push,
    bench_buffer_drain,
    bench_relay,
    bench_decode,
    bench_pool_throughput,
);

criterion_main!(benches);
