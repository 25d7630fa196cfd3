//! Exponential Moving Average.
//!
//! k = 2/(n+1), seed with first SMA, then EMA[i] = X[i]*k + EMA[i-1]*(1-k).
//! Warmup: first (n-1) bars are undefined.

use crate::domain::ohlcv::{Bar, PriceField};

pub fn calculate_ema(bars: &[Bar], period: usize, source: PriceField) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; bars.len()];
    }

    let mut values = Vec::with_capacity(bars.len());
    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = 0.0;
    let mut sum = 0.0;

    for (i, bar) in bars.iter().enumerate() {
        let x = bar.field(source);
        if i < period - 1 {
            sum += x;
            values.push(None);
        } else if i == period - 1 {
            sum += x;
            ema = sum / period as f64;
            values.push(Some(ema));
        } else {
            ema = x * k + ema * (1.0 - k);
            values.push(Some(ema));
        }
    }

    values
}
