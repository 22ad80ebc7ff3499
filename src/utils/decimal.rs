//! Decimal arithmetic utilities for prices and quantities.

use rust_decimal::Decimal;

/// Round to tick size (e.g., 0.01 for most prices).
pub fn round_to_tick(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size == Decimal::ZERO {
        return value;
    }
    ((value / tick_size).round() * tick_size).normalize()
}

/// Round down to lot size (quantity precision).
pub fn round_down_to_lot(value: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size == Decimal::ZERO {
        return value;
    }
    ((value / lot_size).floor() * lot_size).normalize()
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Calculate weighted average.
pub fn weighted_average(values: &[(Decimal, Decimal)]) -> Decimal {
    let (sum, weight_sum) = values.iter().fold(
        (Decimal::ZERO, Decimal::ZERO),
        |(sum, weight_sum), (val, weight)| (sum + val * weight, weight_sum + weight),
    );

    safe_div(sum, weight_sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_to_tick() {
        assert_eq!(round_to_tick(dec!(50123.456), dec!(0.01)), dec!(50123.46));
        assert_eq!(round_to_tick(dec!(0.123456), dec!(0.0005)), dec!(0.1235));
        assert_eq!(round_to_tick(dec!(7), Decimal::ZERO), dec!(7));
    }

    #[test]
    fn test_round_down_to_lot() {
        assert_eq!(round_down_to_lot(dec!(1.23456), dec!(0.001)), dec!(1.234));
        assert_eq!(round_down_to_lot(dec!(0.0009), dec!(0.001)), Decimal::ZERO);
        assert_eq!(round_down_to_lot(dec!(57), dec!(10)), dec!(50));
    }

    #[test]
    fn test_weighted_average() {
        let values = vec![(dec!(100), dec!(1)), (dec!(130), dec!(2))];
        assert_eq!(weighted_average(&values), dec!(120));
        assert_eq!(weighted_average(&[]), Decimal::ZERO);
    }
}
