//! Short-horizon moving averages over candle highs and lows.

use crate::exchange::Candle;
use rust_decimal::Decimal;
use serde::Serialize;

/// Candles needed to compute every average.
pub const MIN_CANDLES: usize = 6;

/// Simple moving averages of the last 3 and 6 candle highs and lows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MovingAverages {
    pub ma3_high: Decimal,
    pub ma3_low: Decimal,
    pub ma6_high: Decimal,
    pub ma6_low: Decimal,
}

impl MovingAverages {
    /// Compute from candles ordered oldest first. `None` with fewer than six.
    pub fn from_candles(candles: &[Candle]) -> Option<Self> {
        if candles.len() < MIN_CANDLES {
            return None;
        }

        let last = |n: usize| &candles[candles.len() - n..];
        let mean = |window: &[Candle], pick: fn(&Candle) -> Decimal| {
            window.iter().map(pick).sum::<Decimal>() / Decimal::from(window.len())
        };

        Some(Self {
            ma3_high: mean(last(3), |c| c.high),
            ma3_low: mean(last(3), |c| c.low),
            ma6_high: mean(last(6), |c| c.high),
            ma6_low: mean(last(6), |c| c.low),
        })
    }

    /// Width of the six-candle band; the take-profit distance.
    pub fn ma6_spread(&self) -> Decimal {
        (self.ma6_high - self.ma6_low).max(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(high: Decimal, low: Decimal) -> Candle {
        Candle {
            open_time: 0,
            open: low,
            high,
            low,
            close: high,
            volume: dec!(1),
        }
    }

    #[test]
    fn test_requires_six_candles() {
        let candles: Vec<Candle> = (0..5).map(|_| candle(dec!(2), dec!(1))).collect();
        assert!(MovingAverages::from_candles(&candles).is_none());
    }

    #[test]
    fn test_uses_most_recent_windows() {
        let candles = vec![
            candle(dec!(100), dec!(0)), // outside every window
            candle(dec!(10), dec!(4)),
            candle(dec!(10), dec!(4)),
            candle(dec!(10), dec!(4)),
            candle(dec!(13), dec!(7)),
            candle(dec!(13), dec!(7)),
            candle(dec!(13), dec!(7)),
        ];

        let ma = MovingAverages::from_candles(&candles).unwrap();
        assert_eq!(ma.ma3_high, dec!(13));
        assert_eq!(ma.ma3_low, dec!(7));
        assert_eq!(ma.ma6_high, dec!(11.5));
        assert_eq!(ma.ma6_low, dec!(5.5));
        assert_eq!(ma.ma6_spread(), dec!(6));
    }
}
