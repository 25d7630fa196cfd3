//! Performance metrics over closed trades.
//!
//! All percentages are in percent units (`20.0` is +20%), except `win_rate`,
//! which is a fraction in `[0, 1]`. Open trades never contribute.

use crate::domain::trade::Trade;
use serde::Serialize;

const MS_PER_YEAR: f64 = 365.25 * 24.0 * 60.0 * 60.0 * 1000.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    /// Gross gains over gross losses; infinite with gains and no losses.
    pub profit_factor: f64,
    pub avg_profit: f64,
    /// Mean of losing trades; zero or negative.
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub total_return: f64,
    pub max_drawdown: f64,
    pub cagr: f64,
    pub avg_bars_held: f64,
}

impl Metrics {
    /// `period_start`/`period_end` are the first and last bar timestamps
    /// (epoch ms) of the run, used for annualising.
    pub fn compute(trades: &[Trade], period_start: i64, period_end: i64) -> Self {
        let closed: Vec<(f64, usize)> = trades
            .iter()
            .filter_map(|t| Some((t.pnl_percent?, t.bars_held()?)))
            .collect();

        let mut wins = 0usize;
        let mut losses = 0usize;
        let mut total_gains = 0.0_f64;
        let mut total_losses = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;
        let mut total_bars_held = 0usize;

        for &(pnl, held) in &closed {
            if pnl > 0.0 {
                wins += 1;
                total_gains += pnl;
                largest_win = largest_win.max(pnl);
            } else if pnl < 0.0 {
                losses += 1;
                total_losses += pnl;
                largest_loss = largest_loss.min(pnl);
            }
            total_bars_held += held;
        }

        let total_trades = closed.len();
        let win_rate = if total_trades > 0 {
            wins as f64 / total_trades as f64
        } else {
            0.0
        };

        let profit_factor = if total_losses < 0.0 {
            total_gains / total_losses.abs()
        } else if total_gains > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_profit = if wins > 0 {
            total_gains / wins as f64
        } else {
            0.0
        };

        let avg_loss = if losses > 0 {
            total_losses / losses as f64
        } else {
            0.0
        };

        let avg_bars_held = if total_trades > 0 {
            total_bars_held as f64 / total_trades as f64
        } else {
            0.0
        };

        let (final_equity, max_drawdown) =
            compute_equity(closed.iter().map(|&(pnl, _)| pnl));
        let total_return = (final_equity - 1.0) * 100.0;
        let cagr = compute_cagr(final_equity, period_start, period_end);

        Metrics {
            total_trades,
            wins,
            losses,
            win_rate,
            profit_factor,
            avg_profit,
            avg_loss,
            largest_win,
            largest_loss,
            total_return,
            max_drawdown,
            cagr,
            avg_bars_held,
        }
    }

    pub fn empty() -> Self {
        Self::compute(&[], 0, 0)
    }
}

/// Compound `1 + pnl/100` from an equity of 1.0; returns final equity and
/// the largest peak-to-trough drop in percent.
fn compute_equity(pnl_percents: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut equity = 1.0_f64;
    let mut peak = 1.0_f64;
    let mut max_dd = 0.0_f64;

    for pnl in pnl_percents {
        equity *= 1.0 + pnl / 100.0;
        if equity > peak {
            peak = equity;
        } else if peak > 0.0 {
            let dd = (peak - equity) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }

    (equity, max_dd * 100.0)
}

fn compute_cagr(final_equity: f64, period_start: i64, period_end: i64) -> f64 {
    let years = (period_end - period_start) as f64 / MS_PER_YEAR;
    if years <= 0.0 || final_equity <= 0.0 {
        return 0.0;
    }
    let cagr = (final_equity.powf(1.0 / years) - 1.0) * 100.0;
    if cagr.is_finite() { cagr } else { 0.0 }
}
