//! Engine performance benchmarks (Criterion).
//!
//! Run: `cargo bench` or `cargo bench --bench engine`.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use exchange_core::{
    fund_traders, Currency, EnginePolicy, Exchange, FlowConfig, FlowGenerator, InMemoryAuditSink,
    OrderId, SubmitRequest, TradingPair, UserId,
};
use rust_decimal::Decimal;
use std::sync::Arc;

fn bench_exchange() -> Exchange {
    let mut ex = Exchange::new(EnginePolicy::default())
        .with_audit(Arc::new(InMemoryAuditSink::new()));
    ex.add_pair(TradingPair::new(
        "BTC-USD",
        Currency::new("BTC"),
        Currency::new("USD"),
        Decimal::ONE,
        Decimal::from(1000),
        Decimal::new(1, 3),
        Decimal::new(2, 3),
    ))
    .expect("register pair");
    ex
}

fn funded_flow(seed: u64, num_requests: usize) -> (Exchange, Vec<SubmitRequest>) {
    let ex = bench_exchange();
    let config = FlowConfig {
        seed,
        num_requests,
        // Limit-only flow keeps the book deep for steady matching pressure.
        limit_ratio: 1.0,
        stop_ratio: 0.0,
        ..Default::default()
    };
    fund_traders(
        &ex,
        &config,
        &Currency::new("BTC"),
        Decimal::from(1_000_000),
        &Currency::new("USD"),
        Decimal::from(100_000_000),
    )
    .expect("funding");
    let requests = FlowGenerator::new(config).all_requests();
    (ex, requests)
}

fn bench_submit_order_throughput(c: &mut Criterion) {
    const N: usize = 1000;
    let mut group = c.benchmark_group("engine");
    group.throughput(Throughput::Elements(N as u64));
    group.bench_function("submit_order_1000", |b| {
        b.iter_batched(
            || funded_flow(42, N),
            |(ex, requests)| {
                for request in requests {
                    let _ = ex.submit_order(request);
                }
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

fn bench_cancel_order(c: &mut Criterion) {
    const RESTING: usize = 500;
    const CANCELS: usize = 100;
    let mut group = c.benchmark_group("engine");
    group.throughput(Throughput::Elements(CANCELS as u64));
    group.bench_function("cancel_order_100_after_500_resting", |b| {
        b.iter_batched(
            || {
                let (ex, requests) = funded_flow(123, RESTING);
                let mut resting: Vec<(OrderId, UserId)> = Vec::new();
                for request in requests {
                    let user = request.user_id;
                    if let Ok(result) = ex.submit_order(request) {
                        if !result.status.is_terminal() {
                            resting.push((result.order_id, user));
                        }
                    }
                }
                resting.truncate(CANCELS);
                (ex, resting)
            },
            |(ex, cancels)| {
                for (order_id, user) in cancels {
                    let _ = ex.cancel_order(order_id, user);
                }
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_submit_order_throughput, bench_cancel_order);
criterion_main!(benches);
