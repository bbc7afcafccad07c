//! IPO seeding.
//!
//! A newly listed instrument starts with an empty book; seeding places a
//! ladder of system-owned sell orders above the offer price so the first
//! investors have something to buy. The ladder is front-weighted: most of
//! the float sits at the offer price, thinning out toward higher levels.
//! Seeding goes through the ordinary [`InstrumentSequencer`] path, so the
//! seed orders obey the same matching and cancellation rules as any other
//! order.

use tracing::info;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::types::{InstrumentId, Order, OrderId, Price, Quantity, Side};
use crate::sequencer::InstrumentSequencer;
use crate::util::{round_up_to_tick, tick_size};

/// Investor id carried by seed orders.
pub const IPO_INVESTOR: &str = "SYSTEM_IPO";

/// Default ladder depth.
pub const DEFAULT_IPO_LEVELS: usize = 5;

/// One rung of the seed ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpoAllocation {
    pub price: Price,
    pub quantity: Quantity,
}

/// Split `total_quantity` across `levels` ascending price rungs, starting
/// at `offer_price` (rounded up to a valid tick) and stepping by the tick
/// size at each rung, re-rounding after each step so a rung that crosses
/// into a wider tick band still lands on a valid tick. Level `i` carries
/// weight `levels - i`, so the offer price gets the largest share;
/// integer-division remainder also goes to the offer price. Rungs that
/// would round to zero quantity are dropped.
pub fn build_ladder(
    offer_price: Price,
    total_quantity: Quantity,
    levels: usize,
) -> EngineResult<Vec<IpoAllocation>> {
    if offer_price == 0 {
        return Err(EngineError::InvalidPrice);
    }
    if total_quantity == 0 || levels == 0 {
        return Err(EngineError::InvalidQuantity(total_quantity));
    }

    let weight_sum: u64 = (1..=levels as u64).sum();
    let mut allocations = Vec::with_capacity(levels);
    let mut price = round_up_to_tick(offer_price);
    let mut allocated: Quantity = 0;

    for i in 0..levels {
        let weight = (levels - i) as u64;
        let quantity = total_quantity * weight / weight_sum;
        if quantity > 0 {
            allocations.push(IpoAllocation { price, quantity });
            allocated += quantity;
        }
        price = round_up_to_tick(price + tick_size(price));
    }

    // Rounding remainder tops up the offer-price rung.
    let remainder = total_quantity - allocated;
    if remainder > 0 {
        if let Some(first) = allocations.first_mut() {
            first.quantity += remainder;
        } else {
            allocations.push(IpoAllocation {
                price: round_up_to_tick(offer_price),
                quantity: remainder,
            });
        }
    }

    Ok(allocations)
}

/// Seed an instrument's book with the IPO ladder. Returns the ids of the
/// placed seed orders so the caller can cancel unsold float later.
pub async fn seed_instrument(
    sequencer: &InstrumentSequencer,
    instrument_id: &InstrumentId,
    offer_price: Price,
    total_quantity: Quantity,
    levels: usize,
) -> EngineResult<Vec<OrderId>> {
    let ladder = build_ladder(offer_price, total_quantity, levels)?;

    let mut order_ids = Vec::with_capacity(ladder.len());
    for rung in &ladder {
        let order = Order::new_limit(
            IPO_INVESTOR.to_string(),
            instrument_id.clone(),
            Side::Sell,
            rung.price,
            rung.quantity,
        );
        order_ids.push(order.id);
        sequencer.submit(order).await?;
    }

    info!(
        instrument = %instrument_id,
        offer_price,
        total_quantity,
        levels = ladder.len(),
        "seeded IPO ladder"
    );
    Ok(order_ids)
}
