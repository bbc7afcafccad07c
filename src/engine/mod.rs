//! Matching core for a single instrument.
//!
//! Order book state machine, price-time-priority matching, and the
//! depth-limited snapshot projection. Nothing here locks or blocks:
//! exclusive access per instrument is the sequencer's job.

pub mod book;
pub mod error;
pub mod matching;
pub mod snapshot;
pub mod types;

// Re-export main types for convenience
pub use book::OrderBookState;
pub use error::{EngineError, EngineResult};
pub use matching::MatchingEngine;
pub use snapshot::{BookSnapshotter, DEFAULT_SNAPSHOT_DEPTH};
pub use types::{
    BookSnapshot, InstrumentId, InvestorId, MarketEvent, MatchResult, Order, OrderId, OrderKind,
    OrderStatus, Price, PriceLevelInfo, Quantity, Side, Trade, TradeId,
};
