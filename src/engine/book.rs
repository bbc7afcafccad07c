use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::debug;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::types::{
    InstrumentId, Order, OrderId, OrderKind, OrderStatus, Price, PriceLevelInfo, Quantity, Side,
};

/// Where a resting order sits, for O(log n) cancellation by id.
#[derive(Debug, Clone, Copy)]
struct OrderLocation {
    price: Price,
    side: Side,
}

/// Per-instrument book of resting limit orders.
///
/// Bids are matched highest price first, asks lowest price first; within a
/// price level orders keep FIFO time priority. The book performs no
/// locking: exactly one sequencer worker owns and mutates a given
/// instrument's book (see `sequencer`), so plain `BTreeMap`/`VecDeque`
/// suffice.
#[derive(Debug)]
pub struct OrderBookState {
    instrument_id: InstrumentId,

    /// Price -> FIFO queue. Best bid = highest key.
    bids: BTreeMap<Price, VecDeque<Order>>,
    /// Price -> FIFO queue. Best ask = lowest key.
    asks: BTreeMap<Price, VecDeque<Order>>,

    index: HashMap<OrderId, OrderLocation>,
}

impl OrderBookState {
    pub fn new(instrument_id: impl Into<InstrumentId>) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    pub fn instrument_id(&self) -> &str {
        &self.instrument_id
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.keys().next().copied()
    }

    pub fn spread(&self) -> Option<Price> {
        match (self.best_ask(), self.best_bid()) {
            (Some(ask), Some(bid)) => Some(ask.saturating_sub(bid)),
            _ => None,
        }
    }

    /// Best price on the side an incoming `taker_side` order would trade
    /// against.
    pub fn best_opposite_price(&self, taker_side: Side) -> Option<Price> {
        match taker_side {
            Side::Buy => self.best_ask(),
            Side::Sell => self.best_bid(),
        }
    }

    /// Best-priced, earliest resting order on the opposite side.
    pub fn peek_best_opposite(&self, taker_side: Side) -> Option<&Order> {
        let price = self.best_opposite_price(taker_side)?;
        let queue = match taker_side {
            Side::Buy => self.asks.get(&price),
            Side::Sell => self.bids.get(&price),
        }?;
        queue.front()
    }

    /// Place a limit order with remaining quantity into the book,
    /// appending after existing orders at the same price (FIFO).
    pub fn insert_resting(&mut self, order: Order) -> EngineResult<()> {
        if order.kind != OrderKind::Limit {
            return Err(EngineError::InvariantViolation(format!(
                "market order {} cannot rest on the book",
                order.id
            )));
        }
        let price = order.limit_price().ok_or(EngineError::InvalidPrice)?;
        if price == 0 {
            return Err(EngineError::InvalidPrice);
        }
        if order.remaining_quantity == 0 || order.is_terminal() {
            return Err(EngineError::InvariantViolation(format!(
                "order {} has nothing to rest (remaining {}, status {})",
                order.id, order.remaining_quantity, order.status
            )));
        }
        if self.index.contains_key(&order.id) {
            return Err(EngineError::InvariantViolation(format!(
                "order {} already resting",
                order.id
            )));
        }

        let side = order.side;
        let id = order.id;
        self.side_mut(side).entry(price).or_default().push_back(order);
        self.index.insert(id, OrderLocation { price, side });

        debug!(order_id = %id, %price, %side, "order resting on book");
        Ok(())
    }

    /// Remove a resting order by id (cancellation). Returns the order as
    /// it was resting, or `None` if the id is not on the book.
    pub fn remove_resting(&mut self, order_id: &OrderId) -> Option<Order> {
        let location = self.index.remove(order_id)?;
        let levels = self.side_mut(location.side);

        let queue = levels.get_mut(&location.price)?;
        let pos = queue.iter().position(|o| &o.id == order_id)?;
        let order = queue.remove(pos);
        if queue.is_empty() {
            levels.remove(&location.price);
        }
        order
    }

    pub fn contains(&self, order_id: &OrderId) -> bool {
        self.index.contains_key(order_id)
    }

    /// Fill the front order at the best opposite level by `quantity`,
    /// removing it (and an emptied level) when fully filled. Returns a copy
    /// of the maker after the fill.
    ///
    /// The caller guarantees `quantity` does not exceed the maker's
    /// remaining quantity; anything else is a book corruption and comes
    /// back as `InvariantViolation`.
    pub fn fill_best_opposite(
        &mut self,
        taker_side: Side,
        quantity: Quantity,
    ) -> EngineResult<Order> {
        let price = self
            .best_opposite_price(taker_side)
            .ok_or_else(|| EngineError::InvariantViolation("fill against empty side".into()))?;

        let levels = self.side_mut(taker_side.opposite());
        let queue = levels
            .get_mut(&price)
            .ok_or_else(|| EngineError::InvariantViolation("best level vanished".into()))?;
        let maker = queue
            .front_mut()
            .ok_or_else(|| EngineError::InvariantViolation("empty level on book".into()))?;

        maker.fill(quantity)?;
        let updated = maker.clone();

        if updated.status == OrderStatus::Filled {
            queue.pop_front();
            self.index.remove(&updated.id);
            if self
                .side_mut(taker_side.opposite())
                .get(&price)
                .is_some_and(|q| q.is_empty())
            {
                self.side_mut(taker_side.opposite()).remove(&price);
            }
        }

        Ok(updated)
    }

    /// Replay resting orders into an empty book (startup recovery, in
    /// persisted submission order).
    pub fn restore(&mut self, orders: Vec<Order>) -> EngineResult<()> {
        for order in orders {
            self.insert_resting(order)?;
        }
        Ok(())
    }

    /// Every resting order, bids then asks, in book priority order. Used
    /// by callers for durability sync.
    pub fn resting_orders(&self) -> Vec<Order> {
        self.bids
            .values()
            .rev()
            .chain(self.asks.values())
            .flat_map(|queue| queue.iter().cloned())
            .collect()
    }

    pub fn total_orders(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn bid_level_count(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_level_count(&self) -> usize {
        self.asks.len()
    }

    /// At most `depth` aggregated levels, best price first.
    pub fn levels(&self, side: Side, depth: usize) -> Vec<PriceLevelInfo> {
        let aggregate = |(price, queue): (&Price, &VecDeque<Order>)| PriceLevelInfo {
            price: *price,
            quantity: queue.iter().map(|o| o.remaining_quantity).sum(),
            order_count: queue.len() as u32,
        };
        match side {
            Side::Buy => self.bids.iter().rev().take(depth).map(aggregate).collect(),
            Side::Sell => self.asks.iter().take(depth).map(aggregate).collect(),
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<Price, VecDeque<Order>> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }
}
