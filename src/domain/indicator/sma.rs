//! Simple Moving Average.
//!
//! SMA(n)[i] = mean(X[i-n+1..=i]) over the chosen price field.
//! Warmup: first (n-1) bars are undefined.

use crate::domain::ohlcv::{Bar, PriceField};

pub fn calculate_sma(bars: &[Bar], period: usize, source: PriceField) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; bars.len()];
    }

    let mut values = Vec::with_capacity(bars.len());
    let mut sum = 0.0;

    for (i, bar) in bars.iter().enumerate() {
        sum += bar.field(source);
        if i >= period {
            sum -= bars[i - period].field(source);
        }
        if i + 1 < period {
            values.push(None);
        } else {
            values.push(Some(sum / period as f64));
        }
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bars(prices: &[f64]) -> Vec<Bar> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                timestamp: i as i64 * 86_400_000,
                open: close,
                high: close,
                low: close,
                close,
                volume: close * 10.0,
            })
            .collect()
    }

    #[test]
    fn sma_warmup() {
        let bars = make_bars(&[10.0, 20.0, 30.0, 40.0]);
        let values = calculate_sma(&bars, 3, PriceField::Close);
        assert_eq!(values.len(), 4);
        assert!(values[0].is_none());
        assert!(values[1].is_none());
        assert!(values[2].is_some());
        assert!(values[3].is_some());
    }

    #[test]
    fn sma_matches_window_mean() {
        let prices = [3.0, 7.0, 1.0, 9.0, 4.0, 6.0, 2.0, 8.0];
        let bars = make_bars(&prices);
        let values = calculate_sma(&bars, 4, PriceField::Close);

        for i in 3..prices.len() {
            let expected = prices[i - 3..=i].iter().sum::<f64>() / 4.0;
            let got = values[i].unwrap();
            assert!((got - expected).abs() < 1e-12, "index {i}: {got} vs {expected}");
        }
    }

    #[test]
    fn sma_over_volume() {
        let bars = make_bars(&[1.0, 2.0, 3.0]);
        let values = calculate_sma(&bars, 3, PriceField::Volume);
        assert!((values[2].unwrap() - 20.0).abs() < 1e-12);
    }

    #[test]
    fn sma_period_1_is_identity() {
        let bars = make_bars(&[5.0, 6.0]);
        let values = calculate_sma(&bars, 1, PriceField::Close);
        assert_eq!(values, vec![Some(5.0), Some(6.0)]);
    }

    #[test]
    fn sma_shorter_than_period() {
        let bars = make_bars(&[5.0, 6.0]);
        let values = calculate_sma(&bars, 5, PriceField::Close);
        assert_eq!(values, vec![None, None]);
    }

    #[test]
    fn sma_empty_bars() {
        assert!(calculate_sma(&[], 3, PriceField::Close).is_empty());
    }
}
