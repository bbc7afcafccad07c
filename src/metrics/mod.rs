use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::info;

use crate::engine::types::{BookSnapshot, Trade};

/// Metrics for the matching engine: counters mirrored into atomics for
/// cheap in-process reads, with everything also forwarded through the
/// `metrics` facade for the Prometheus exporter.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    orders_submitted: AtomicU64,
    orders_cancelled: AtomicU64,
    trades_executed: AtomicU64,
    total_volume: AtomicU64,
    total_notional: AtomicU64,

    submit_latency: LatencyTracker,
}

impl EngineMetrics {
    pub fn new() -> Self {
        describe_counter!("engine_orders_total", "Orders processed by the engine");
        describe_counter!("engine_trades_total", "Trades executed");
        describe_counter!("engine_volume_total", "Total traded quantity");
        describe_counter!("engine_notional_total", "Total traded notional");
        describe_histogram!(
            "engine_submit_duration_seconds",
            "Matching duration for one submitted order"
        );
        describe_gauge!("engine_resting_orders", "Resting orders per instrument");
        describe_gauge!("engine_spread", "Bid-ask spread per instrument");

        Self::default()
    }

    pub fn record_submit(&self, duration: Duration) {
        self.orders_submitted.fetch_add(1, Ordering::Relaxed);
        self.submit_latency.record(duration);
        counter!("engine_orders_total", "operation" => "submit").increment(1);
        histogram!("engine_submit_duration_seconds").record(duration.as_secs_f64());
    }

    pub fn record_cancel(&self) {
        self.orders_cancelled.fetch_add(1, Ordering::Relaxed);
        counter!("engine_orders_total", "operation" => "cancel").increment(1);
    }

    pub fn record_trades(&self, trades: &[Trade]) {
        if trades.is_empty() {
            return;
        }
        let volume: u64 = trades.iter().map(|t| t.quantity).sum();
        let notional: u64 = trades.iter().map(|t| t.notional()).sum();

        self.trades_executed
            .fetch_add(trades.len() as u64, Ordering::Relaxed);
        self.total_volume.fetch_add(volume, Ordering::Relaxed);
        self.total_notional.fetch_add(notional, Ordering::Relaxed);

        counter!("engine_trades_total").increment(trades.len() as u64);
        counter!("engine_volume_total").increment(volume);
        counter!("engine_notional_total").increment(notional);
    }

    pub fn record_book(&self, snapshot: &BookSnapshot) {
        let resting: u64 = snapshot
            .bids
            .iter()
            .chain(snapshot.asks.iter())
            .map(|level| level.order_count as u64)
            .sum();
        gauge!("engine_resting_orders", "instrument" => snapshot.instrument_id.clone())
            .set(resting as f64);
        if let Some(spread) = snapshot.spread {
            gauge!("engine_spread", "instrument" => snapshot.instrument_id.clone())
                .set(spread as f64);
        }
    }

    pub fn orders_submitted(&self) -> u64 {
        self.orders_submitted.load(Ordering::Relaxed)
    }

    pub fn orders_cancelled(&self) -> u64 {
        self.orders_cancelled.load(Ordering::Relaxed)
    }

    pub fn trades_executed(&self) -> u64 {
        self.trades_executed.load(Ordering::Relaxed)
    }

    pub fn total_volume(&self) -> u64 {
        self.total_volume.load(Ordering::Relaxed)
    }

    pub fn total_notional(&self) -> u64 {
        self.total_notional.load(Ordering::Relaxed)
    }

    pub fn submit_latency(&self) -> LatencyStats {
        self.submit_latency.stats()
    }
}

/// Min/avg/max latency over the process lifetime.
#[derive(Debug, Default)]
struct LatencyTracker {
    samples: AtomicU64,
    total_nanos: AtomicU64,
    min_nanos: AtomicU64,
    max_nanos: AtomicU64,
}

impl LatencyTracker {
    fn record(&self, duration: Duration) {
        let nanos = duration.as_nanos() as u64;

        if self.samples.fetch_add(1, Ordering::Relaxed) == 0 {
            self.min_nanos.store(nanos, Ordering::Relaxed);
        }
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);

        let mut current_min = self.min_nanos.load(Ordering::Relaxed);
        while nanos < current_min {
            match self.min_nanos.compare_exchange_weak(
                current_min,
                nanos,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current_min = observed,
            }
        }

        let mut current_max = self.max_nanos.load(Ordering::Relaxed);
        while nanos > current_max {
            match self.max_nanos.compare_exchange_weak(
                current_max,
                nanos,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current_max = observed,
            }
        }
    }

    fn stats(&self) -> LatencyStats {
        let samples = self.samples.load(Ordering::Relaxed);
        let total = self.total_nanos.load(Ordering::Relaxed);
        LatencyStats {
            samples,
            avg_nanos: if samples == 0 { 0 } else { total / samples },
            min_nanos: self.min_nanos.load(Ordering::Relaxed),
            max_nanos: self.max_nanos.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyStats {
    pub samples: u64,
    pub avg_nanos: u64,
    pub min_nanos: u64,
    pub max_nanos: u64,
}

/// Periodically logs a throughput/latency summary.
pub struct MetricsReporter {
    metrics: Arc<EngineMetrics>,
    period: Duration,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<EngineMetrics>, period: Duration) -> Self {
        Self { metrics, period }
    }

    pub async fn run(self) {
        let mut ticker = interval(self.period);
        // First tick completes immediately; skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let latency = self.metrics.submit_latency();
            info!(
                orders = self.metrics.orders_submitted(),
                cancels = self.metrics.orders_cancelled(),
                trades = self.metrics.trades_executed(),
                volume = self.metrics.total_volume(),
                avg_submit_us = latency.avg_nanos / 1_000,
                max_submit_us = latency.max_nanos / 1_000,
                "engine throughput"
            );
        }
    }
}
