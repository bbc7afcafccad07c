use chrono::Utc;

use crate::engine::book::OrderBookState;
use crate::engine::types::{BookSnapshot, Side};

/// Default number of price levels per side in a published snapshot.
pub const DEFAULT_SNAPSHOT_DEPTH: usize = 10;

/// Derives depth-limited, aggregated views of a book for market-data
/// publication and periodic durability writes.
///
/// Snapshots are projections only: crash recovery replays the persisted
/// resting orders, never a snapshot.
pub struct BookSnapshotter;

impl BookSnapshotter {
    /// Aggregate the book into at most `depth` price levels per side,
    /// best price first, with top-of-book and spread attached.
    ///
    /// Pure read: calling this twice without an intervening mutation
    /// yields identical levels.
    pub fn snapshot(book: &OrderBookState, depth: usize) -> BookSnapshot {
        BookSnapshot {
            instrument_id: book.instrument_id().to_string(),
            bids: book.levels(Side::Buy, depth),
            asks: book.levels(Side::Sell, depth),
            best_bid: book.best_bid(),
            best_ask: book.best_ask(),
            spread: book.spread(),
            timestamp: Utc::now(),
        }
    }
}
