//! Backtest simulator.
//!
//! Walks the bars once with a FLAT / IN_POSITION state machine:
//! - FLAT: evaluate the rule tree; on `true`, enter at the close
//! - IN_POSITION: on each later bar, exit at the close when the return
//!   reaches the stop loss or take profit
//!
//! A bar that closes a trade does not also open one. A trade still open at
//! the last bar is reported as `open_trade` and left out of the metrics.

use crate::domain::error::StratlabError;
use crate::domain::indicator_helpers::IndicatorCache;
use crate::domain::metrics::Metrics;
use crate::domain::ohlcv::{Bar, validate_bars};
use crate::domain::rule::LogicGroup;
use crate::domain::rule_eval::evaluate_group;
use crate::domain::trade::{ExitReason, Trade};
use serde::Serialize;
use tracing::{debug, info, warn};

pub const DEFAULT_STOP_LOSS_PCT: f64 = -0.05;
pub const DEFAULT_TAKE_PROFIT_PCT: f64 = 0.20;

/// What to do when the series is too short to get past the rule's warm-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupPolicy {
    /// Start at bar 0; entries needing undefined indicators cannot fire.
    #[default]
    StartAtZero,
    /// Fail with `InsufficientData`.
    Reject,
}

impl WarmupPolicy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "start_at_zero" => Some(WarmupPolicy::StartAtZero),
            "reject" => Some(WarmupPolicy::Reject),
            _ => None,
        }
    }
}

/// Exit thresholds are fractional returns: `-0.05` exits at -5%.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub warmup_policy: WarmupPolicy,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: DEFAULT_STOP_LOSS_PCT,
            take_profit_pct: DEFAULT_TAKE_PROFIT_PCT,
            warmup_policy: WarmupPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestResult {
    /// First bar timestamp (epoch ms), 0 for an empty series.
    pub period_start: i64,
    /// Last bar timestamp (epoch ms), 0 for an empty series.
    pub period_end: i64,
    #[serde(flatten)]
    pub metrics: Metrics,
    pub trades: Vec<Trade>,
    pub open_trade: Option<Trade>,
    /// First index at which every operand of the rule is defined.
    pub warmup_index: usize,
    /// Index the simulation actually started from.
    pub start_index: usize,
}

impl BacktestResult {
    fn empty(warmup_index: usize) -> Self {
        Self {
            period_start: 0,
            period_end: 0,
            metrics: Metrics::empty(),
            trades: Vec::new(),
            open_trade: None,
            warmup_index,
            start_index: 0,
        }
    }
}

/// Run `tree` over `bars`, building the indicator cache first.
pub fn run_backtest(
    tree: &LogicGroup,
    bars: &[Bar],
    config: &BacktestConfig,
) -> Result<BacktestResult, StratlabError> {
    validate_bars(bars)?;
    let cache = IndicatorCache::build(bars, &tree.extract_indicators());
    run_backtest_with_cache(tree, bars, &cache, config)
}

/// Run against a prebuilt cache. The cache must cover `bars` and may hold
/// indicators for other trees as well. Bars are assumed validated.
pub fn run_backtest_with_cache(
    tree: &LogicGroup,
    bars: &[Bar],
    cache: &IndicatorCache,
    config: &BacktestConfig,
) -> Result<BacktestResult, StratlabError> {
    let warmup_index = tree.warmup_index();
    let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
        return Ok(BacktestResult::empty(warmup_index));
    };
    if cache.len() != bars.len() {
        return Err(StratlabError::Data {
            reason: format!(
                "indicator cache covers {} bars, series has {}",
                cache.len(),
                bars.len()
            ),
        });
    }

    let start_index = if bars.len() > warmup_index {
        warmup_index
    } else {
        match config.warmup_policy {
            WarmupPolicy::StartAtZero => {
                warn!(
                    rule = %tree.id,
                    bars = bars.len(),
                    warmup = warmup_index,
                    "series shorter than warm-up, starting at bar 0"
                );
                0
            }
            WarmupPolicy::Reject => {
                return Err(StratlabError::InsufficientData {
                    bars: bars.len(),
                    required: warmup_index.saturating_add(1),
                });
            }
        }
    };

    let mut trades = Vec::new();
    let mut position: Option<Trade> = None;

    for (i, bar) in bars.iter().enumerate().skip(start_index) {
        if let Some(trade) = position.take() {
            let r = trade.return_at(bar.close);
            let reason = if r <= config.stop_loss_pct {
                Some(ExitReason::StopLoss)
            } else if r >= config.take_profit_pct {
                Some(ExitReason::TakeProfit)
            } else {
                None
            };
            match reason {
                Some(reason) => {
                    let closed = trade.close(i, bar, reason);
                    debug!(
                        index = i,
                        price = bar.close,
                        pnl_percent = closed.pnl_percent,
                        ?reason,
                        "exit"
                    );
                    trades.push(closed);
                }
                None => position = Some(trade),
            }
            continue;
        }

        if evaluate_group(tree, i, bars, cache) {
            debug!(index = i, price = bar.close, "entry");
            position = Some(Trade::open(i, bar));
        }
    }

    let metrics = Metrics::compute(&trades, first.timestamp, last.timestamp);
    info!(
        rule = %tree.id,
        bars = bars.len(),
        start_index,
        trades = metrics.total_trades,
        win_rate = metrics.win_rate,
        total_return = metrics.total_return,
        open = position.is_some(),
        "backtest complete"
    );

    Ok(BacktestResult {
        period_start: first.timestamp,
        period_end: last.timestamp,
        metrics,
        trades,
        open_trade: position,
        warmup_index,
        start_index,
    })
}
