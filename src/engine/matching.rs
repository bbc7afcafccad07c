use tracing::debug;

use crate::engine::book::OrderBookState;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::types::{MatchResult, Order, OrderKind, OrderStatus, Price, Side, Trade};

/// Continuous double-auction matcher: one incoming order against the
/// opposite side of a single instrument's book, price-time priority.
///
/// Pure book-in, result-out: no events are published and nothing is
/// persisted here. The caller owns those side effects and must not
/// re-invoke `execute` for the same order (each call consumes book state).
pub struct MatchingEngine;

impl MatchingEngine {
    /// Process `taker` against `book`, mutating the book and returning the
    /// trades plus the taker's terminal/resting state.
    pub fn execute(book: &mut OrderBookState, mut taker: Order) -> EngineResult<MatchResult> {
        Self::validate(&taker)?;

        debug!(
            order_id = %taker.id,
            side = %taker.side,
            kind = ?taker.kind,
            price = ?taker.price,
            quantity = taker.remaining_quantity,
            "matching incoming order"
        );

        let mut trades = Vec::new();
        let mut updated_makers = Vec::new();

        while taker.remaining_quantity > 0 {
            let maker_price = match book.best_opposite_price(taker.side) {
                Some(price) => price,
                None => break,
            };
            if !Self::crosses(&taker, maker_price) {
                break;
            }

            let maker = book.peek_best_opposite(taker.side).ok_or_else(|| {
                EngineError::InvariantViolation("best level exists but holds no order".into())
            })?;
            let quantity = taker.remaining_quantity.min(maker.remaining_quantity);

            // Execution price is the resting order's price: price
            // improvement goes to the maker side.
            let trade = Trade::between(&taker, maker, maker_price, quantity);

            taker.fill(quantity)?;
            let maker_after = book.fill_best_opposite(taker.side, quantity)?;

            trades.push(trade);
            updated_makers.push(maker_after);
        }

        // Termination policy for leftover quantity.
        if taker.remaining_quantity > 0 {
            match taker.kind {
                OrderKind::Limit => {
                    // Remainder rests on its own side, status NEW if
                    // nothing executed, PARTIALLY_FILLED otherwise.
                    book.insert_resting(taker.clone())?;
                }
                OrderKind::Market => {
                    // Market orders never rest. A zero-fill pass is a
                    // cancellation; a partial fill stays PARTIALLY_FILLED
                    // with the remainder discarded.
                    if trades.is_empty() {
                        taker.cancel_remaining()?;
                    }
                }
            }
        }

        debug!(
            order_id = %taker.id,
            status = %taker.status,
            trades = trades.len(),
            "matching complete"
        );

        Ok(MatchResult {
            taker,
            trades,
            updated_makers,
        })
    }

    /// Whether the incoming order accepts the best opposite price.
    fn crosses(taker: &Order, maker_price: Price) -> bool {
        match (taker.kind, taker.limit_price()) {
            (OrderKind::Market, _) => true,
            (OrderKind::Limit, Some(limit)) => match taker.side {
                Side::Buy => maker_price <= limit,
                Side::Sell => maker_price >= limit,
            },
            // Limit without a price is caught by validate().
            (OrderKind::Limit, None) => false,
        }
    }

    fn validate(taker: &Order) -> EngineResult<()> {
        if taker.remaining_quantity == 0 {
            return Err(EngineError::InvalidQuantity(0));
        }
        if taker.status != OrderStatus::New {
            return Err(EngineError::InvariantViolation(format!(
                "order {} resubmitted with status {}",
                taker.id, taker.status
            )));
        }
        match (taker.kind, taker.limit_price()) {
            (OrderKind::Limit, Some(price)) if price > 0 => Ok(()),
            (OrderKind::Market, None) => Ok(()),
            _ => Err(EngineError::InvalidPrice),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::Quantity;
    use proptest::prelude::*;

    fn limit(investor: &str, side: Side, price: Price, quantity: Quantity) -> Order {
        Order::new_limit(investor.into(), "STK-001".into(), side, price, quantity)
    }

    fn market(investor: &str, side: Side, quantity: Quantity) -> Order {
        Order::new_market(investor.into(), "STK-001".into(), side, quantity)
    }

    #[test]
    fn test_empty_book_buy_limit_rests() {
        // Scenario: empty book, BUY LIMIT 10 @ 100 -> no trades, one
        // resting bid.
        let mut book = OrderBookState::new("STK-001");
        let result = MatchingEngine::execute(&mut book, limit("a", Side::Buy, 100, 10)).unwrap();

        assert!(result.trades.is_empty());
        assert_eq!(result.taker.status, OrderStatus::New);
        assert_eq!(book.best_bid(), Some(100));
        assert_eq!(book.total_orders(), 1);
    }

    #[test]
    fn test_partial_fill_then_rest() {
        // Scenario: resting ask 5 @ 100; incoming BUY LIMIT 10 @ 100 ->
        // one trade (100 x 5), taker rests as bid with remaining 5.
        let mut book = OrderBookState::new("STK-001");
        MatchingEngine::execute(&mut book, limit("maker", Side::Sell, 100, 5)).unwrap();

        let result = MatchingEngine::execute(&mut book, limit("taker", Side::Buy, 100, 10)).unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].price, 100);
        assert_eq!(result.trades[0].quantity, 5);
        assert_eq!(result.taker.status, OrderStatus::PartiallyFilled);
        assert_eq!(result.taker.remaining_quantity, 5);
        assert_eq!(book.best_ask(), None);
        assert_eq!(book.best_bid(), Some(100));
    }

    #[test]
    fn test_market_order_walks_fifo_queue() {
        // Scenario: resting asks 3 @ 100 (t1), 4 @ 100 (t2); BUY MARKET 5
        // -> trades 3 @ 100 and 2 @ 100, second maker left with 2.
        let mut book = OrderBookState::new("STK-001");
        MatchingEngine::execute(&mut book, limit("m1", Side::Sell, 100, 3)).unwrap();
        let second = limit("m2", Side::Sell, 100, 4);
        let second_id = second.id;
        MatchingEngine::execute(&mut book, second).unwrap();

        let result = MatchingEngine::execute(&mut book, market("taker", Side::Buy, 5)).unwrap();

        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.trades[0].quantity, 3);
        assert_eq!(result.trades[1].quantity, 2);
        assert!(result.trades.iter().all(|t| t.price == 100));
        assert_eq!(result.taker.status, OrderStatus::Filled);

        let remaining = book.peek_best_opposite(Side::Buy).unwrap();
        assert_eq!(remaining.id, second_id);
        assert_eq!(remaining.remaining_quantity, 2);
    }

    #[test]
    fn test_price_time_priority_same_price() {
        let mut book = OrderBookState::new("STK-001");
        let earlier = limit("m1", Side::Sell, 100, 10);
        let earlier_id = earlier.id;
        MatchingEngine::execute(&mut book, earlier).unwrap();
        MatchingEngine::execute(&mut book, limit("m2", Side::Sell, 100, 10)).unwrap();

        let result = MatchingEngine::execute(&mut book, limit("taker", Side::Buy, 100, 1)).unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].sell_order_id, earlier_id);
    }

    #[test]
    fn test_maker_price_priority() {
        // Taker willing to pay 110 trades at the resting 100.
        let mut book = OrderBookState::new("STK-001");
        MatchingEngine::execute(&mut book, limit("maker", Side::Sell, 100, 10)).unwrap();

        let result = MatchingEngine::execute(&mut book, limit("taker", Side::Buy, 110, 10)).unwrap();

        assert_eq!(result.trades[0].price, 100);
    }

    #[test]
    fn test_limit_does_not_cross_worse_price() {
        let mut book = OrderBookState::new("STK-001");
        MatchingEngine::execute(&mut book, limit("maker", Side::Sell, 105, 10)).unwrap();

        let result = MatchingEngine::execute(&mut book, limit("taker", Side::Buy, 100, 10)).unwrap();

        assert!(result.trades.is_empty());
        assert_eq!(book.best_bid(), Some(100));
        assert_eq!(book.best_ask(), Some(105));
    }

    #[test]
    fn test_sell_limit_sweeps_down_the_bid_ladder() {
        let mut book = OrderBookState::new("STK-001");
        MatchingEngine::execute(&mut book, limit("m1", Side::Buy, 102, 5)).unwrap();
        MatchingEngine::execute(&mut book, limit("m2", Side::Buy, 101, 5)).unwrap();
        MatchingEngine::execute(&mut book, limit("m3", Side::Buy, 100, 5)).unwrap();

        let result = MatchingEngine::execute(&mut book, limit("taker", Side::Sell, 101, 8)).unwrap();

        // Best bid first, each at the maker's own price.
        assert_eq!(result.trades.len(), 2);
        assert_eq!((result.trades[0].price, result.trades[0].quantity), (102, 5));
        assert_eq!((result.trades[1].price, result.trades[1].quantity), (101, 3));
        assert_eq!(result.taker.status, OrderStatus::Filled);
        assert_eq!(book.best_bid(), Some(101));
    }

    #[test]
    fn test_market_with_no_liquidity_is_cancelled() {
        let mut book = OrderBookState::new("STK-001");
        let result = MatchingEngine::execute(&mut book, market("taker", Side::Buy, 10)).unwrap();

        assert!(result.trades.is_empty());
        assert_eq!(result.taker.status, OrderStatus::Cancelled);
        assert_eq!(result.taker.remaining_quantity, 0);
        assert!(book.is_empty());
    }

    #[test]
    fn test_market_partial_fill_never_rests() {
        let mut book = OrderBookState::new("STK-001");
        MatchingEngine::execute(&mut book, limit("maker", Side::Sell, 100, 4)).unwrap();

        let result = MatchingEngine::execute(&mut book, market("taker", Side::Buy, 10)).unwrap();

        assert_eq!(result.filled_quantity(), 4);
        assert_eq!(result.taker.status, OrderStatus::PartiallyFilled);
        // Remainder discarded, not queued.
        assert!(book.is_empty());
        assert!(!book.contains(&result.taker.id));
    }

    #[test]
    fn test_quantity_conservation_per_trade() {
        let mut book = OrderBookState::new("STK-001");
        let maker = limit("maker", Side::Sell, 100, 7);
        let maker_before = maker.remaining_quantity;
        MatchingEngine::execute(&mut book, maker).unwrap();

        let taker = limit("taker", Side::Buy, 100, 5);
        let taker_before = taker.remaining_quantity;
        let result = MatchingEngine::execute(&mut book, taker).unwrap();

        let trade = &result.trades[0];
        let maker_after = result.updated_makers[0].remaining_quantity;
        assert_eq!(taker_before - result.taker.remaining_quantity, trade.quantity);
        assert_eq!(maker_before - maker_after, trade.quantity);
    }

    #[test]
    fn test_self_match_is_not_prevented() {
        // Same investor on both sides trades like anyone else; prevention
        // is an intake concern for callers.
        let mut book = OrderBookState::new("STK-001");
        MatchingEngine::execute(&mut book, limit("inv-1", Side::Sell, 100, 5)).unwrap();

        let result = MatchingEngine::execute(&mut book, limit("inv-1", Side::Buy, 100, 5)).unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].buyer_id, result.trades[0].seller_id);
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let mut book = OrderBookState::new("STK-001");
        let mut order = limit("a", Side::Buy, 100, 10);
        order.remaining_quantity = 0;
        assert!(matches!(
            MatchingEngine::execute(&mut book, order),
            Err(EngineError::InvalidQuantity(0))
        ));
    }

    #[test]
    fn test_limit_without_price_rejected() {
        let mut book = OrderBookState::new("STK-001");
        let mut order = limit("a", Side::Buy, 100, 10);
        order.price = None;
        assert!(matches!(
            MatchingEngine::execute(&mut book, order),
            Err(EngineError::InvalidPrice)
        ));
    }

    proptest! {
        /// After any sequence of limit orders, every resting order has
        /// remaining quantity > 0 and a non-terminal status, and market
        /// orders never appear on the book.
        #[test]
        fn prop_resting_orders_are_live(
            orders in proptest::collection::vec(
                (any::<bool>(), 1u64..=20, 90u64..=110, any::<bool>()),
                1..40,
            )
        ) {
            let mut book = OrderBookState::new("STK-001");
            let mut market_ids = Vec::new();

            for (is_buy, qty, price, is_market) in orders {
                let side = if is_buy { Side::Buy } else { Side::Sell };
                let order = if is_market {
                    market("prop", side, qty)
                } else {
                    limit("prop", side, price, qty)
                };
                if is_market {
                    market_ids.push(order.id);
                }
                MatchingEngine::execute(&mut book, order).unwrap();
            }

            for resting in book.resting_orders() {
                prop_assert!(resting.remaining_quantity > 0);
                prop_assert!(matches!(
                    resting.status,
                    OrderStatus::New | OrderStatus::PartiallyFilled
                ));
                prop_assert_eq!(resting.kind, OrderKind::Limit);
            }
            for id in market_ids {
                prop_assert!(!book.contains(&id));
            }

            // Matched-out book never crosses.
            if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
                prop_assert!(bid < ask);
            }
        }

        /// Every trade executes at the resting side's price and conserves
        /// quantity between both orders.
        #[test]
        fn prop_maker_price_and_conservation(
            maker_price in 95u64..=105,
            maker_qty in 1u64..=50,
            taker_price in 95u64..=105,
            taker_qty in 1u64..=50,
        ) {
            let mut book = OrderBookState::new("STK-001");
            MatchingEngine::execute(&mut book, limit("maker", Side::Sell, maker_price, maker_qty))
                .unwrap();
            let result =
                MatchingEngine::execute(&mut book, limit("taker", Side::Buy, taker_price, taker_qty))
                    .unwrap();

            if taker_price >= maker_price {
                prop_assert_eq!(result.trades.len(), 1);
                prop_assert_eq!(result.trades[0].price, maker_price);
                prop_assert_eq!(
                    result.trades[0].quantity,
                    maker_qty.min(taker_qty)
                );
                prop_assert_eq!(
                    result.taker.filled_quantity + result.taker.remaining_quantity,
                    taker_qty
                );
            } else {
                prop_assert!(result.trades.is_empty());
            }
        }
    }
}
