//! Indicator cache shared by the evaluator, simulator, and live signal path.

use crate::domain::indicator::{IndicatorSeries, IndicatorType};
use crate::domain::ohlcv::Bar;
use std::collections::HashMap;

/// Precomputed series for every indicator a run needs, index-aligned with
/// the bars they were built from. Read-only once built, so one cache can back
/// many evaluations (including parallel ones) over the same bars.
#[derive(Debug, Clone, Default)]
pub struct IndicatorCache {
    series: HashMap<IndicatorType, IndicatorSeries>,
    len: usize,
}

impl IndicatorCache {
    pub fn build(bars: &[Bar], types: &[IndicatorType]) -> Self {
        let mut series = HashMap::with_capacity(types.len());
        for indicator_type in types {
            series
                .entry(*indicator_type)
                .or_insert_with(|| indicator_type.calculate(bars));
        }
        tracing::debug!(
            indicators = series.len(),
            bars = bars.len(),
            "built indicator cache"
        );
        Self {
            series,
            len: bars.len(),
        }
    }

    /// `None` when the indicator is undefined at `index`, was never
    /// computed, or `index` is past the end of the series.
    pub fn value_at(&self, indicator_type: &IndicatorType, index: usize) -> Option<f64> {
        self.series.get(indicator_type)?.get(index)
    }

    pub fn series(&self, indicator_type: &IndicatorType) -> Option<&IndicatorSeries> {
        self.series.get(indicator_type)
    }

    pub fn contains(&self, indicator_type: &IndicatorType) -> bool {
        self.series.contains_key(indicator_type)
    }

    /// Number of bars the cache was built over.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
