//! Bollinger Bands over closing prices.
//!
//! Bollinger Bands consist of:
//! - Middle: Simple Moving Average (SMA) over n periods
//! - Upper: Middle + (multiplier × StdDev)
//! - Lower: Middle - (multiplier × StdDev)
//! - Width: (Upper - Lower) / Middle
//!
//! Where StdDev is population standard deviation (divides by N, not N-1).
//! Each band is cached as its own series.
//!
//! Warmup: first (period-1) bars are undefined.

use crate::domain::indicator::BollingerBand;
use crate::domain::ohlcv::Bar;

pub fn calculate_bollinger(
    bars: &[Bar],
    band: BollingerBand,
    period: usize,
    stddev_mult_x100: u32,
) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; bars.len()];
    }

    let mult = stddev_mult_x100 as f64 / 100.0;
    let mut values = Vec::with_capacity(bars.len());

    for i in 0..bars.len() {
        if i + 1 < period {
            values.push(None);
            continue;
        }

        let window = &bars[i + 1 - period..=i];
        let middle: f64 = window.iter().map(|b| b.close).sum::<f64>() / period as f64;
        let variance: f64 = window
            .iter()
            .map(|b| {
                let diff = b.close - middle;
                diff * diff
            })
            .sum::<f64>()
            / period as f64;
        let stddev = variance.sqrt();
        let upper = middle + mult * stddev;
        let lower = middle - mult * stddev;

        let value = match band {
            BollingerBand::Upper => Some(upper),
            BollingerBand::Middle => Some(middle),
            BollingerBand::Lower => Some(lower),
            BollingerBand::Width if middle != 0.0 => Some((upper - lower) / middle),
            BollingerBand::Width => None,
        };
        values.push(value);
    }

    values
}
