//! Price-time-priority matching engine for a simulated stock exchange.
//!
//! The [`engine`] module holds the single-threaded core: order book state,
//! the matching loop, and read-only snapshots. [`sequencer`] wraps that
//! core in one tokio task per instrument so submissions are serialized per
//! instrument and parallel across instruments. [`ipo`] seeds fresh books
//! with a system sell ladder.

pub mod engine;
pub mod ipo;
pub mod metrics;
pub mod sequencer;
pub mod util;

pub use engine::{
    BookSnapshot, BookSnapshotter, EngineError, EngineResult, InstrumentId, InvestorId,
    MatchResult, MatchingEngine, Order, OrderBookState, OrderId, OrderKind, OrderStatus, Price,
    Quantity, Side, Trade, TradeId, DEFAULT_SNAPSHOT_DEPTH,
};
pub use metrics::EngineMetrics;
pub use sequencer::{CancelOutcome, InstrumentSequencer};
