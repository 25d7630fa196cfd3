//! Live signal evaluation.
//!
//! Answers "does the rule fire on the most recent bar?" from the same
//! evaluator the simulator uses, so a live signal and a backtest entry at the
//! same bar can never disagree.

use crate::domain::error::StratlabError;
use crate::domain::indicator_helpers::IndicatorCache;
use crate::domain::ohlcv::{Bar, validate_bars};
use crate::domain::rule::LogicGroup;
use crate::domain::rule_eval::evaluate_group;
use tracing::{debug, warn};

/// Evaluate `tree` at the last bar. An empty series yields `false`.
pub fn evaluate_latest(tree: &LogicGroup, bars: &[Bar]) -> Result<bool, StratlabError> {
    let Some(last) = bars.len().checked_sub(1) else {
        return Ok(false);
    };
    validate_bars(bars)?;
    let cache = IndicatorCache::build(bars, &tree.extract_indicators());
    let signal = evaluate_group(tree, last, bars, &cache);
    debug!(rule = %tree.id, index = last, signal, "evaluated latest bar");
    Ok(signal)
}

/// The shortest suffix of `bars` whose last-bar evaluation matches full
/// history. Trees that use EMA or RSI get the whole series.
pub fn trailing_window<'a>(tree: &LogicGroup, bars: &'a [Bar]) -> &'a [Bar] {
    if !tree.is_window_local() {
        return bars;
    }
    let needed = tree.required_history();
    &bars[bars.len().saturating_sub(needed)..]
}

/// Keep at most `max_bars` trailing bars, widened to the trailing window so
/// the latest signal still matches full history.
pub fn limit_history<'a>(tree: &LogicGroup, bars: &'a [Bar], max_bars: usize) -> &'a [Bar] {
    let window = trailing_window(tree, bars);
    if window.len() <= max_bars {
        return &bars[bars.len().saturating_sub(max_bars)..];
    }
    warn!(
        rule = %tree.id,
        requested = max_bars,
        used = window.len(),
        "history limit widened to keep the signal exact"
    );
    window
}

/// `evaluate_latest` over only the trailing window.
pub fn evaluate_latest_windowed(tree: &LogicGroup, bars: &[Bar]) -> Result<bool, StratlabError> {
    evaluate_latest(tree, trailing_window(tree, bars))
}
