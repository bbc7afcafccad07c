use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::engine::error::{EngineError, EngineResult};

pub type OrderId = Uuid;
pub type TradeId = Uuid;
pub type Price = u64; // Integer currency units (1 = smallest tradable unit)
pub type Quantity = u64;
pub type InstrumentId = String;
pub type InvestorId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::New => write!(f, "NEW"),
            OrderStatus::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            OrderStatus::Filled => write!(f, "FILLED"),
            OrderStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// An order as seen by the matching engine: either the incoming taker or a
/// resting maker on the book. Quantities are tracked as
/// `original_quantity` / `remaining_quantity`; status transitions only go
/// through [`Order::fill`] and [`Order::cancel_remaining`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub investor_id: InvestorId,
    pub instrument_id: InstrumentId,
    pub side: Side,
    pub kind: OrderKind,
    /// Limit price; `None` for market orders.
    pub price: Option<Price>,
    pub original_quantity: Quantity,
    pub remaining_quantity: Quantity,
    pub filled_quantity: Quantity,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new_limit(
        investor_id: InvestorId,
        instrument_id: InstrumentId,
        side: Side,
        price: Price,
        quantity: Quantity,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            investor_id,
            instrument_id,
            side,
            kind: OrderKind::Limit,
            price: Some(price),
            original_quantity: quantity,
            remaining_quantity: quantity,
            filled_quantity: 0,
            status: OrderStatus::New,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn new_market(
        investor_id: InvestorId,
        instrument_id: InstrumentId,
        side: Side,
        quantity: Quantity,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            investor_id,
            instrument_id,
            side,
            kind: OrderKind::Market,
            price: None,
            original_quantity: quantity,
            remaining_quantity: quantity,
            filled_quantity: 0,
            status: OrderStatus::New,
            created_at: now,
            updated_at: now,
        }
    }

    /// Limit price of a resting-capable order. Market orders have none.
    pub fn limit_price(&self) -> Option<Price> {
        self.price
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, OrderStatus::Filled | OrderStatus::Cancelled)
    }

    /// Execute `quantity` against this order.
    ///
    /// Overfilling a live order or filling a terminal one means the book
    /// state is corrupted; both surface as invariant violations.
    pub fn fill(&mut self, quantity: Quantity) -> EngineResult<()> {
        if self.is_terminal() {
            return Err(EngineError::InvariantViolation(format!(
                "fill of {} against terminal order {} ({})",
                quantity, self.id, self.status
            )));
        }
        if quantity == 0 || quantity > self.remaining_quantity {
            return Err(EngineError::InvariantViolation(format!(
                "fill quantity {} out of range for order {} (remaining {})",
                quantity, self.id, self.remaining_quantity
            )));
        }

        self.remaining_quantity -= quantity;
        self.filled_quantity += quantity;
        self.status = if self.remaining_quantity == 0 {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Cancel whatever quantity is left, returning it. Filled quantity is
    /// untouched, so a partially filled then cancelled order still reports
    /// its executions.
    ///
    /// Cancelling an already terminal order is reported via
    /// [`EngineError::AlreadyTerminal`]; callers treat it as a no-op.
    pub fn cancel_remaining(&mut self) -> EngineResult<Quantity> {
        if self.is_terminal() {
            return Err(EngineError::AlreadyTerminal {
                order_id: self.id,
                status: self.status,
            });
        }
        let remaining = self.remaining_quantity;
        self.remaining_quantity = 0;
        self.status = OrderStatus::Cancelled;
        self.updated_at = Utc::now();
        Ok(remaining)
    }
}

/// One atomic match step between a taker and a resting maker.
/// Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buyer_id: InvestorId,
    pub seller_id: InvestorId,
    pub instrument_id: InstrumentId,
    pub price: Price,
    pub quantity: Quantity,
    pub executed_at: DateTime<Utc>,
}

impl Trade {
    /// Build a trade from the taker/maker pair, assigning buyer and seller
    /// from whichever side each order is on.
    pub fn between(taker: &Order, maker: &Order, price: Price, quantity: Quantity) -> Self {
        let (buy, sell) = match taker.side {
            Side::Buy => (taker, maker),
            Side::Sell => (maker, taker),
        };
        Self {
            id: Uuid::new_v4(),
            buy_order_id: buy.id,
            sell_order_id: sell.id,
            buyer_id: buy.investor_id.clone(),
            seller_id: sell.investor_id.clone(),
            instrument_id: taker.instrument_id.clone(),
            price,
            quantity,
            executed_at: Utc::now(),
        }
    }

    pub fn notional(&self) -> u64 {
        self.price * self.quantity
    }
}

/// Everything produced by processing one incoming order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    /// The incoming order after matching: resting (limit remainder),
    /// FILLED, terminal PARTIALLY_FILLED (market remainder discarded),
    /// or CANCELLED (market order with no liquidity).
    pub taker: Order,
    /// Trades in execution order.
    pub trades: Vec<Trade>,
    /// Resting orders whose remaining quantity changed, fully filled makers
    /// included (status FILLED). The caller persists these.
    pub updated_makers: Vec<Order>,
}

impl MatchResult {
    pub fn filled_quantity(&self) -> Quantity {
        self.trades.iter().map(|t| t.quantity).sum()
    }

    pub fn is_fully_filled(&self) -> bool {
        self.taker.status == OrderStatus::Filled
    }
}

/// Aggregated depth at one price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevelInfo {
    pub price: Price,
    pub quantity: Quantity,
    pub order_count: u32,
}

/// Depth-limited, read-only projection of an order book. Never
/// authoritative; the resting orders themselves are the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub instrument_id: InstrumentId,
    /// Best-first: descending prices.
    pub bids: Vec<PriceLevelInfo>,
    /// Best-first: ascending prices.
    pub asks: Vec<PriceLevelInfo>,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub spread: Option<Price>,
    pub timestamp: DateTime<Utc>,
}

/// Notifications derived from a match result, published at-least-once by
/// the caller. Consumers must tolerate duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MarketEvent {
    TradeExecuted {
        trade: Trade,
    },
    OrderCancelled {
        order_id: OrderId,
        investor_id: InvestorId,
        instrument_id: InstrumentId,
        remaining_quantity: Quantity,
    },
    BookUpdated {
        snapshot: BookSnapshot,
    },
}

impl MarketEvent {
    /// Expand a match result plus a fresh snapshot into the event set for
    /// publication: one `TradeExecuted` per trade, `OrderCancelled` for a
    /// zero-fill cancellation, and a trailing `BookUpdated`.
    pub fn from_match(result: &MatchResult, snapshot: BookSnapshot) -> Vec<MarketEvent> {
        let mut events: Vec<MarketEvent> = result
            .trades
            .iter()
            .cloned()
            .map(|trade| MarketEvent::TradeExecuted { trade })
            .collect();

        if result.taker.status == OrderStatus::Cancelled && result.trades.is_empty() {
            events.push(MarketEvent::OrderCancelled {
                order_id: result.taker.id,
                investor_id: result.taker.investor_id.clone(),
                instrument_id: result.taker.instrument_id.clone(),
                remaining_quantity: result.taker.original_quantity,
            });
        }

        events.push(MarketEvent::BookUpdated { snapshot });
        events
    }
}
