//! Criterion benchmarks for the matching core.
//!
//! Measures:
//! - Limit order insertion (no match)
//! - Crossing limit order against varying book depth
//! - Cancellation at varying book sizes
//! - Snapshot projection

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use exchange_matching_engine::{
    BookSnapshotter, MatchingEngine, Order, OrderBookState, Side, DEFAULT_SNAPSHOT_DEPTH,
};

fn limit(side: Side, price: u64, quantity: u64) -> Order {
    Order::new_limit("bench".to_string(), "BENCH".to_string(), side, price, quantity)
}

/// Book with `levels` price levels per side around a 100_500 mid.
fn populated_book(levels: u64) -> OrderBookState {
    let mut book = OrderBookState::new("BENCH");
    for i in 0..levels {
        let result = MatchingEngine::execute(&mut book, limit(Side::Buy, 100_000 - i * 10, 100));
        assert!(result.is_ok());
        let result = MatchingEngine::execute(&mut book, limit(Side::Sell, 101_000 + i * 10, 100));
        assert!(result.is_ok());
    }
    book
}

fn bench_insert_no_match(c: &mut Criterion) {
    let mut book = populated_book(50);
    let mut offset = 0u64;

    c.bench_function("insert_no_match", |b| {
        b.iter(|| {
            offset += 1;
            // Deep bid, never crosses.
            let order = limit(Side::Buy, 5_000 - (offset % 1_000), 100);
            black_box(MatchingEngine::execute(&mut book, order).unwrap())
        })
    });
}

fn bench_crossing_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("crossing_match");

    for depth in [1u64, 10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let mut book = OrderBookState::new("BENCH");
            for _ in 0..depth {
                MatchingEngine::execute(&mut book, limit(Side::Sell, 10_000, 100)).unwrap();
            }

            b.iter(|| {
                let result =
                    MatchingEngine::execute(&mut book, limit(Side::Buy, 10_000, 100)).unwrap();
                // Replenish the consumed maker.
                MatchingEngine::execute(&mut book, limit(Side::Sell, 10_000, 100)).unwrap();
                black_box(result)
            })
        });
    }

    group.finish();
}

fn bench_cancel(c: &mut Criterion) {
    let mut group = c.benchmark_group("cancel");

    for levels in [10u64, 100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(levels), &levels, |b, &levels| {
            let mut book = populated_book(levels);

            b.iter(|| {
                let order = limit(Side::Buy, 5_000, 100);
                let order_id = order.id;
                MatchingEngine::execute(&mut book, order).unwrap();
                black_box(book.remove_resting(&order_id))
            })
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for levels in [10u64, 100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(levels), &levels, |b, &levels| {
            let book = populated_book(levels);

            b.iter(|| black_box(BookSnapshotter::snapshot(&book, DEFAULT_SNAPSHOT_DEPTH)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_insert_no_match,
    bench_crossing_match,
    bench_cancel,
    bench_snapshot,
);

criterion_main!(benches);
