//! Parallel fan-out over rules and symbols.
//!
//! Each run stays single-threaded and side-effect free; parallelism is only
//! across independent runs.

use crate::domain::backtest::{BacktestConfig, BacktestResult, run_backtest_with_cache};
use crate::domain::error::StratlabError;
use crate::domain::indicator::IndicatorType;
use crate::domain::indicator_helpers::IndicatorCache;
use crate::domain::live::evaluate_latest;
use crate::domain::ohlcv::{Bar, validate_bars};
use crate::domain::rule::LogicGroup;
use rayon::prelude::*;
use tracing::{info, warn};

/// Backtest several rules over the same bars. Indicators are computed once
/// for the union of all trees and shared read-only across workers. Results
/// are in the order of `trees`.
pub fn backtest_rules(
    trees: &[LogicGroup],
    bars: &[Bar],
    config: &BacktestConfig,
) -> Result<Vec<BacktestResult>, StratlabError> {
    validate_bars(bars)?;

    let mut types: Vec<IndicatorType> = Vec::new();
    for tree in trees {
        for t in tree.extract_indicators() {
            if !types.contains(&t) {
                types.push(t);
            }
        }
    }
    let cache = IndicatorCache::build(bars, &types);

    let results = trees
        .par_iter()
        .map(|tree| run_backtest_with_cache(tree, bars, &cache, config))
        .collect::<Result<Vec<_>, _>>()?;

    info!(rules = trees.len(), bars = bars.len(), "rule batch complete");
    Ok(results)
}

/// First candidate, in input order, whose latest bar fires `tree`.
/// Candidates whose bars fail validation are skipped.
pub fn first_matching<'a>(tree: &LogicGroup, candidates: &'a [(String, Vec<Bar>)]) -> Option<&'a str> {
    candidates
        .par_iter()
        .find_map_first(|(symbol, bars)| match evaluate_latest(tree, bars) {
            Ok(true) => Some(symbol.as_str()),
            Ok(false) => None,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "skipping candidate");
                None
            }
        })
}
