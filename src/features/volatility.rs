//! True range, rolling ATR and the bar-level volatility ratio

use super::moving_average::sma;
use crate::{OHLCVExt, Period, OHLCV};

/// True range per bar. The first bar has no previous close and uses high - low.
pub fn true_ranges<T: OHLCV>(bars: &[T]) -> Vec<f64> {
    let mut prev_close = None;
    bars.iter()
        .map(|bar| {
            let tr = bar.true_range(prev_close);
            prev_close = Some(bar.close());
            tr
        })
        .collect()
}

/// Average true range: simple rolling mean of true range over `period` bars.
#[inline]
pub fn average_true_range(true_ranges: &[f64], period: Period) -> Vec<Option<f64>> {
    sma(true_ranges, period)
}

/// true_range / ATR per bar. Undefined while ATR warms up or when ATR is zero.
pub fn volatility_ratios(true_ranges: &[f64], atr: &[Option<f64>]) -> Vec<Option<f64>> {
    true_ranges
        .iter()
        .zip(atr)
        .map(|(&tr, atr)| match *atr {
            Some(a) if a > f64::EPSILON => Some(tr / a),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bar;

    #[test]
    fn test_true_ranges_use_previous_close() {
        let bars = [
            Bar::new(0, 10.0, 11.0, 9.0, 10.0, 1.0),
            Bar::new(1, 13.0, 14.0, 12.5, 13.5, 1.0), // gap up: |14 - 10| = 4
            Bar::new(2, 13.5, 14.0, 13.0, 13.2, 1.0),
        ];
        assert_eq!(true_ranges(&bars), vec![2.0, 4.0, 1.0]);
    }

    #[test]
    fn test_volatility_ratio() {
        let tr = [2.0, 2.0, 2.0, 6.0];
        let atr = average_true_range(&tr, Period::new(2).unwrap());
        let ratio = volatility_ratios(&tr, &atr);
        assert_eq!(ratio[0], None);
        assert_eq!(ratio[1], Some(1.0));
        assert_eq!(ratio[3], Some(1.5));
    }

    #[test]
    fn test_zero_atr_is_undefined() {
        let tr = [0.0, 0.0, 0.0];
        let atr = average_true_range(&tr, Period::new(2).unwrap());
        assert!(volatility_ratios(&tr, &atr).iter().all(Option::is_none));
    }
}
