//! Single-position trade lifecycle.

use crate::domain::ohlcv::Bar;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
}

/// One long trade. Exit fields are `None` while the trade is open; a closed
/// trade is never modified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub entry_index: usize,
    pub entry_timestamp: i64,
    pub entry_price: f64,
    pub exit_index: Option<usize>,
    pub exit_timestamp: Option<i64>,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    /// Exit minus entry, per unit.
    pub pnl_absolute: Option<f64>,
    /// Percent of entry price, e.g. `20.0` for +20%.
    pub pnl_percent: Option<f64>,
}

impl Trade {
    /// Enter at the bar's close.
    pub fn open(index: usize, bar: &Bar) -> Self {
        Self {
            entry_index: index,
            entry_timestamp: bar.timestamp,
            entry_price: bar.close,
            exit_index: None,
            exit_timestamp: None,
            exit_price: None,
            exit_reason: None,
            pnl_absolute: None,
            pnl_percent: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.exit_index.is_none()
    }

    /// Fractional return if the trade were closed at `price`.
    pub fn return_at(&self, price: f64) -> f64 {
        (price - self.entry_price) / self.entry_price
    }

    /// Exit at the bar's close.
    pub fn close(self, index: usize, bar: &Bar, reason: ExitReason) -> Self {
        let exit_price = bar.close;
        let pnl_absolute = exit_price - self.entry_price;
        Self {
            exit_index: Some(index),
            exit_timestamp: Some(bar.timestamp),
            exit_price: Some(exit_price),
            exit_reason: Some(reason),
            pnl_absolute: Some(pnl_absolute),
            pnl_percent: Some(pnl_absolute / self.entry_price * 100.0),
            ..self
        }
    }

    pub fn bars_held(&self) -> Option<usize> {
        self.exit_index.map(|exit| exit - self.entry_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn bar(timestamp: i64, close: f64) -> Bar {
        Bar {
            timestamp,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000.0,
        }
    }

    #[test]
    fn open_trade_has_no_exit() {
        let t = Trade::open(3, &bar(3_000, 50.0));
        assert!(t.is_open());
        assert_eq!(t.entry_index, 3);
        assert_eq!(t.entry_timestamp, 3_000);
        assert_eq!(t.entry_price, 50.0);
        assert_eq!(t.pnl_percent, None);
        assert_eq!(t.bars_held(), None);
    }

    #[test]
    fn return_at_price() {
        let t = Trade::open(0, &bar(0, 50.0));
        assert_relative_eq!(t.return_at(60.0), 0.2);
        assert_relative_eq!(t.return_at(45.0), -0.1);
    }

    #[test]
    fn close_fills_exit_fields() {
        let t = Trade::open(2, &bar(2_000, 100.0)).close(7, &bar(7_000, 120.0), ExitReason::TakeProfit);
        assert!(!t.is_open());
        assert_eq!(t.exit_index, Some(7));
        assert_eq!(t.exit_timestamp, Some(7_000));
        assert_eq!(t.exit_price, Some(120.0));
        assert_eq!(t.exit_reason, Some(ExitReason::TakeProfit));
        assert_relative_eq!(t.pnl_absolute.unwrap(), 20.0);
        assert_relative_eq!(t.pnl_percent.unwrap(), 20.0);
        assert_eq!(t.bars_held(), Some(5));
    }

    #[test]
    fn losing_trade() {
        let t = Trade::open(0, &bar(0, 100.0)).close(1, &bar(1, 95.0), ExitReason::StopLoss);
        assert_relative_eq!(t.pnl_absolute.unwrap(), -5.0);
        assert_relative_eq!(t.pnl_percent.unwrap(), -5.0);
    }
}
