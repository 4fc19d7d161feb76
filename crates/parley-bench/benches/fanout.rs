//! Fan-out benchmarks for the Parley router.
//!
//! Each client is backed by a `ChannelSink` whose queue is drained after
//! every send, so the numbers cover registry snapshot, formatting and the
//! concurrent deliveries.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use parley_core::{ChannelSink, Delivery, Router};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

/// Connect `clients` users and return their queues.
async fn populate(router: &Router, clients: usize) -> Vec<mpsc::Receiver<Delivery>> {
    let mut queues = Vec::with_capacity(clients);
    for i in 0..clients {
        let (sink, rx) = ChannelSink::new(clients + 16);
        assert!(router.connect(&format!("user{i}"), Arc::new(sink)).await.is_accepted());
        queues.push(rx);
    }
    queues
}

fn drain(queues: &mut [mpsc::Receiver<Delivery>]) {
    for rx in queues {
        while rx.try_recv().is_ok() {}
    }
}

/// Benchmark a group message reaching every connected user.
fn bench_group_send(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("group_send");

    for clients in [10usize, 100, 1000] {
        let router = Router::new();
        let mut queues = rt.block_on(populate(&router, clients));
        drain(&mut queues);

        group.throughput(Throughput::Elements(clients as u64));
        group.bench_with_input(BenchmarkId::from_parameter(clients), &clients, |b, _| {
            b.iter_custom(|iters| {
                let start = Instant::now();
                for _ in 0..iters {
                    let delivered = rt.block_on(router.send_to_group("user0", black_box("hello")));
                    black_box(delivered);
                    drain(&mut queues);
                }
                start.elapsed()
            });
        });
    }

    group.finish();
}

/// Benchmark a private message between two users in a busy relay.
fn bench_private_send(c: &mut Criterion) {
    let rt = runtime();
    let router = Router::new();
    let mut queues = rt.block_on(populate(&router, 1000));
    drain(&mut queues);

    c.bench_function("private_send", |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                rt.block_on(router.send_private("user1", black_box("user999"), "psst"));
                drain(&mut queues[999..]);
            }
            start.elapsed()
        });
    });
}

/// Benchmark a connect and disconnect pair, including both roster broadcasts.
fn bench_presence_churn(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("presence_churn");

    for clients in [10usize, 100] {
        let router = Router::new();
        let mut queues = rt.block_on(populate(&router, clients));
        drain(&mut queues);

        group.bench_with_input(BenchmarkId::from_parameter(clients), &clients, |b, _| {
            b.iter_custom(|iters| {
                let start = Instant::now();
                for _ in 0..iters {
                    let (sink, mut rx) = ChannelSink::new(4);
                    rt.block_on(async {
                        router.connect("visitor", Arc::new(sink)).await;
                        router.disconnect("visitor").await;
                    });
                    while rx.try_recv().is_ok() {}
                    drain(&mut queues);
                }
                start.elapsed()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_group_send, bench_private_send, bench_presence_churn);
criterion_main!(benches);
