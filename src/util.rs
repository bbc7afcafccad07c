//! Price helpers shared by the engine and the IPO seeder.

use crate::engine::types::Price;

/// Minimum price increment for a given price. Bands widen as prices grow,
/// the usual exchange convention for keeping order books from fragmenting
/// across thousands of near-identical levels.
pub fn tick_size(price: Price) -> Price {
    match price {
        0..=1_000 => 1,
        1_001..=5_000 => 5,
        5_001..=10_000 => 10,
        10_001..=50_000 => 50,
        50_001..=100_000 => 100,
        100_001..=500_000 => 500,
        _ => 1_000,
    }
}

/// Round down to the nearest valid tick for the price's band.
pub fn round_down_to_tick(price: Price) -> Price {
    let tick = tick_size(price);
    (price / tick) * tick
}

/// Round up to the nearest valid tick for the price's band.
pub fn round_up_to_tick(price: Price) -> Price {
    let tick = tick_size(price);
    price.div_ceil(tick) * tick
}

pub fn is_valid_tick(price: Price) -> bool {
    price > 0 && price % tick_size(price) == 0
}

/// Format a raw integer price (minor units, 2 decimal places) for logs.
pub fn format_price(price: Price) -> String {
    format!("{}.{:02}", price / 100, price % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_size_bands() {
        assert_eq!(tick_size(1), 1);
        assert_eq!(tick_size(1_000), 1);
        assert_eq!(tick_size(1_001), 5);
        assert_eq!(tick_size(5_000), 5);
        assert_eq!(tick_size(5_001), 10);
        assert_eq!(tick_size(10_001), 50);
        assert_eq!(tick_size(50_001), 100);
        assert_eq!(tick_size(100_001), 500);
        assert_eq!(tick_size(500_001), 1_000);
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round_down_to_tick(1_003), 1_000);
        assert_eq!(round_up_to_tick(1_003), 1_005);
        assert_eq!(round_down_to_tick(5_000), 5_000);
        assert_eq!(round_up_to_tick(5_000), 5_000);
        assert_eq!(round_down_to_tick(52_345), 52_300);
        assert_eq!(round_up_to_tick(52_345), 52_350);
    }

    #[test]
    fn test_is_valid_tick() {
        assert!(!is_valid_tick(0));
        assert!(is_valid_tick(999));
        assert!(is_valid_tick(1_005));
        assert!(!is_valid_tick(1_003));
        assert!(is_valid_tick(600_000));
        assert!(!is_valid_tick(600_500));
    }

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(12_345), "123.45");
        assert_eq!(format_price(100), "1.00");
        assert_eq!(format_price(7), "0.07");
    }
}
