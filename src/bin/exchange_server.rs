//! Simulated exchange server.
//!
//! Boots the per-instrument matching workers, seeds each listed instrument
//! with an IPO sell ladder, and runs trading bots that submit a realistic
//! mix of limit orders, market orders, and cancellations against them.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

use exchange_matching_engine::ipo::{seed_instrument, DEFAULT_IPO_LEVELS};
use exchange_matching_engine::metrics::MetricsReporter;
use exchange_matching_engine::util::format_price;
use exchange_matching_engine::engine::MarketEvent;
use exchange_matching_engine::{
    EngineError, EngineMetrics, InstrumentSequencer, Order, OrderId, Side,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Starting exchange server...");

    start_metrics_exporter()?;

    let metrics = Arc::new(EngineMetrics::new());
    let sequencer = Arc::new(InstrumentSequencer::new(Arc::clone(&metrics)));

    // Listings: (instrument, IPO offer price in minor units, float).
    let listings = [
        ("ACME", 10_000u64, 100_000u64),
        ("GLOBO", 25_000, 50_000),
        ("INITECH", 4_500, 200_000),
        ("STARK", 80_000, 20_000),
        ("WAYNE", 150_000, 10_000),
    ];

    for (instrument, offer_price, float) in listings {
        seed_instrument(
            &sequencer,
            &instrument.to_string(),
            offer_price,
            float,
            DEFAULT_IPO_LEVELS,
        )
        .await?;
    }

    let reporter = MetricsReporter::new(Arc::clone(&metrics), Duration::from_secs(5));
    tokio::spawn(reporter.run());

    for (instrument, offer_price, _) in listings {
        let sequencer = Arc::clone(&sequencer);
        tokio::spawn(async move {
            simulate_trading(sequencer, instrument.to_string(), offer_price).await;
        });
    }

    // Tape: log every execution from the market-data feed.
    for (instrument, _, _) in listings {
        let feed = sequencer.subscribe(&instrument.to_string());
        tokio::spawn(async move {
            log_trade_tape(instrument, feed).await;
        });
    }

    {
        let sequencer = Arc::clone(&sequencer);
        tokio::spawn(async move {
            report_book_stats(sequencer).await;
        });
    }

    info!("Exchange server is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down exchange server...");
    info!(
        orders = metrics.orders_submitted(),
        cancels = metrics.orders_cancelled(),
        trades = metrics.trades_executed(),
        volume = metrics.total_volume(),
        "final totals"
    );

    Ok(())
}

/// One trading bot per instrument: a counter-driven mix of limit orders
/// around a drifting reference price, market orders, and cancels of its
/// own resting orders.
async fn simulate_trading(
    sequencer: Arc<InstrumentSequencer>,
    instrument: String,
    offer_price: u64,
) {
    let mut ticker = interval(Duration::from_millis(10));
    let mut reference_price = offer_price;
    let mut counter: u64 = 0;
    let mut open_orders: Vec<OrderId> = Vec::new();

    loop {
        ticker.tick().await;
        counter += 1;
        let investor = format!("NPC-{}", counter % 25);

        let result = match counter % 10 {
            // Market orders (20% of activity).
            0 | 1 => {
                let side = if counter % 4 < 2 { Side::Buy } else { Side::Sell };
                let quantity = 10 + counter % 40;
                let order = Order::new_market(investor, instrument.clone(), side, quantity);
                sequencer.submit(order).await.map(|result| {
                    if result.trades.is_empty() {
                        warn!(instrument = %instrument, %side, "market order found no liquidity");
                    }
                })
            }

            // Limit orders around the reference price (60%).
            2..=7 => {
                let side = if counter % 2 == 0 { Side::Buy } else { Side::Sell };
                let offset = (counter % 20) * 5;
                let price = match side {
                    Side::Buy => reference_price.saturating_sub(offset).max(1),
                    Side::Sell => reference_price + offset,
                };
                let quantity = 20 + counter % 80;
                let order = Order::new_limit(investor, instrument.clone(), side, price, quantity);
                let order_id = order.id;
                sequencer.submit(order).await.map(|result| {
                    if !result.taker.is_terminal() {
                        open_orders.push(order_id);
                    }
                })
            }

            // Cancel one of our resting orders (10%).
            8 => match open_orders.pop() {
                Some(order_id) => sequencer
                    .cancel(&instrument, order_id)
                    .await
                    .map(|_| ())
                    // Filled in the meantime is fine.
                    .or_else(|err| match err {
                        EngineError::UnknownOrder(_) => Ok(()),
                        other => Err(other),
                    }),
                None => Ok(()),
            },

            // Drift the reference price (10%).
            9 => {
                if let Some(snapshot) = sequencer.peek_snapshot(&instrument) {
                    if let (Some(bid), Some(ask)) = (snapshot.best_bid, snapshot.best_ask) {
                        reference_price = (bid + ask) / 2;
                    }
                }
                let direction: i64 = if counter % 4 == 0 { 25 } else { -25 };
                reference_price =
                    ((reference_price as i64) + direction).max(100) as u64;
                Ok(())
            }

            _ => unreachable!(),
        };

        match result {
            Ok(()) => {}
            Err(EngineError::Halted(_)) => {
                error!(instrument = %instrument, "instrument halted, stopping bot");
                break;
            }
            Err(err) => {
                warn!(instrument = %instrument, %err, "bot command failed");
            }
        }
    }
}

/// Consumes one instrument's market-data feed, logging executions. The
/// broadcast channel advances a lagged receiver past the gap, so the tape
/// logs the miss and keeps consuming; it is best-effort.
async fn log_trade_tape(
    instrument: &'static str,
    mut feed: tokio::sync::broadcast::Receiver<MarketEvent>,
) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match feed.recv().await {
            Ok(MarketEvent::TradeExecuted { trade }) => {
                info!(
                    "TAPE {} | {} x {} | {} -> {}",
                    instrument,
                    format_price(trade.price),
                    trade.quantity,
                    trade.seller_id,
                    trade.buyer_id,
                );
            }
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => {
                warn!(instrument, missed, "trade tape lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Periodic per-instrument book summary from published snapshots.
async fn report_book_stats(sequencer: Arc<InstrumentSequencer>) {
    let mut ticker = interval(Duration::from_secs(10));
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let mut instruments = sequencer.instruments();
        instruments.sort();

        for instrument in instruments {
            if let Some(snapshot) = sequencer.peek_snapshot(&instrument) {
                info!(
                    "{} | bid {} | ask {} | spread {} | depth {}x{}",
                    instrument,
                    snapshot.best_bid.map_or_else(|| "-".into(), format_price),
                    snapshot.best_ask.map_or_else(|| "-".into(), format_price),
                    snapshot.spread.map_or_else(|| "-".into(), format_price),
                    snapshot.bids.len(),
                    snapshot.asks.len(),
                );
            }
        }
    }
}

fn start_metrics_exporter() -> Result<(), Box<dyn std::error::Error>> {
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::net::SocketAddr;

    let addr: SocketAddr = "0.0.0.0:9090".parse()?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    info!("Prometheus metrics available at http://{}/metrics", addr);
    Ok(())
}
