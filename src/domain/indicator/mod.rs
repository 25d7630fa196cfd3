//! Technical indicator implementations.
//!
//! - `IndicatorType`: indicator identity + parameters (serves as cache key)
//! - `IndicatorSeries`: one value per bar, `None` where history is insufficient
//!
//! Supported: SMA and EMA over any price field, RSI over close, and the
//! Bollinger band family over close. Any other name fails with
//! `StratlabError::UnknownIndicator`.

pub mod bollinger;
pub mod ema;
pub mod rsi;
pub mod sma;

use crate::domain::error::StratlabError;
use crate::domain::ohlcv::{Bar, PriceField};
use crate::domain::rule::MAX_HISTORY;
use serde::Serialize;
use std::fmt;

pub const DEFAULT_BOLLINGER_MULT: f64 = 2.0;

/// Multipliers are keyed in hundredths, up to this bound.
const MAX_BOLLINGER_MULT: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BollingerBand {
    Upper,
    Middle,
    Lower,
    /// (upper - lower) / middle
    Width,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IndicatorType {
    Sma {
        period: usize,
        source: PriceField,
    },
    Ema {
        period: usize,
        source: PriceField,
    },
    Rsi(usize),
    Bollinger {
        band: BollingerBand,
        period: usize,
        stddev_mult_x100: u32,
    },
}

impl IndicatorType {
    /// Resolve an indicator by name.
    ///
    /// `source` is the optional leading price field (`SMA(Volume, 20)`),
    /// `args` the numeric parameters in order. Names are case-insensitive and
    /// underscores are ignored, so `BOLLINGER_UPPER` and `BollingerBandUpper`
    /// name the same indicator.
    pub fn from_name(
        name: &str,
        source: Option<PriceField>,
        args: &[f64],
    ) -> Result<Self, StratlabError> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();

        let indicator = match normalized.as_str() {
            "SMA" | "MA" => IndicatorType::Sma {
                period: period_arg(name, args)?,
                source: source.unwrap_or(PriceField::Close),
            },
            "EMA" => IndicatorType::Ema {
                period: period_arg(name, args)?,
                source: source.unwrap_or(PriceField::Close),
            },
            "RSI" => {
                reject_source(name, source, PriceField::Close)?;
                IndicatorType::Rsi(period_arg(name, args)?)
            }
            other => {
                let band = match other {
                    "BOLLINGERUPPER" | "BOLLINGERBANDUPPER" | "BBUPPER" => BollingerBand::Upper,
                    "BOLLINGERMIDDLE" | "BOLLINGERBANDMIDDLE" | "BBMIDDLE" => {
                        BollingerBand::Middle
                    }
                    "BOLLINGERLOWER" | "BOLLINGERBANDLOWER" | "BBLOWER" => BollingerBand::Lower,
                    "BOLLINGERWIDTH" | "BOLLINGERBANDWIDTH" | "BBWIDTH" => BollingerBand::Width,
                    _ => {
                        return Err(StratlabError::UnknownIndicator {
                            name: name.to_string(),
                        });
                    }
                };
                reject_source(name, source, PriceField::Close)?;
                let mult = args.get(1).copied().unwrap_or(DEFAULT_BOLLINGER_MULT);
                IndicatorType::Bollinger {
                    band,
                    period: period_arg(name, args)?,
                    stddev_mult_x100: mult_x100(name, mult)?,
                }
            }
        };
        Ok(indicator)
    }

    pub fn period(&self) -> usize {
        match self {
            IndicatorType::Sma { period, .. }
            | IndicatorType::Ema { period, .. }
            | IndicatorType::Rsi(period)
            | IndicatorType::Bollinger { period, .. } => *period,
        }
    }

    /// True when the value at a bar depends only on the last `period` bars.
    /// EMA and RSI are seeded from the start of the series.
    pub fn is_window_local(&self) -> bool {
        matches!(
            self,
            IndicatorType::Sma { .. } | IndicatorType::Bollinger { .. }
        )
    }

    /// Number of leading bars whose value is undefined.
    pub fn lookback(&self) -> usize {
        match self {
            // RSI needs `period` price changes, i.e. period + 1 closes.
            IndicatorType::Rsi(period) => *period,
            _ => self.period().saturating_sub(1),
        }
    }

    pub fn calculate(&self, bars: &[Bar]) -> IndicatorSeries {
        let values = match *self {
            IndicatorType::Sma { period, source } => sma::calculate_sma(bars, period, source),
            IndicatorType::Ema { period, source } => ema::calculate_ema(bars, period, source),
            IndicatorType::Rsi(period) => rsi::calculate_rsi(bars, period),
            IndicatorType::Bollinger {
                band,
                period,
                stddev_mult_x100,
            } => bollinger::calculate_bollinger(bars, band, period, stddev_mult_x100),
        };
        IndicatorSeries {
            indicator_type: *self,
            values,
        }
    }
}

fn period_arg(name: &str, args: &[f64]) -> Result<usize, StratlabError> {
    let Some(&raw) = args.first() else {
        return Err(StratlabError::invalid_tree(name, "missing period"));
    };
    if !(raw.is_finite() && raw >= 1.0 && raw.fract() == 0.0) {
        return Err(StratlabError::invalid_tree(
            name,
            format!("period must be a positive integer, got {raw}"),
        ));
    }
    if raw > MAX_HISTORY as f64 {
        return Err(StratlabError::invalid_tree(
            name,
            format!("period {raw} exceeds {MAX_HISTORY}"),
        ));
    }
    Ok(raw as usize)
}

fn mult_x100(name: &str, mult: f64) -> Result<u32, StratlabError> {
    if !(mult.is_finite() && mult > 0.0 && mult <= MAX_BOLLINGER_MULT) {
        return Err(StratlabError::invalid_tree(
            name,
            format!("band multiplier must be in (0, {MAX_BOLLINGER_MULT}], got {mult}"),
        ));
    }
    let hundredths = mult * 100.0;
    if (hundredths - hundredths.round()).abs() > 1e-6 {
        return Err(StratlabError::invalid_tree(
            name,
            format!("band multiplier {mult} has more than two decimals"),
        ));
    }
    Ok(hundredths.round() as u32)
}

fn reject_source(
    name: &str,
    source: Option<PriceField>,
    allowed: PriceField,
) -> Result<(), StratlabError> {
    match source {
        Some(field) if field != allowed => Err(StratlabError::invalid_tree(
            name,
            format!("{name} is only defined over {allowed}, not {field}"),
        )),
        _ => Ok(()),
    }
}

/// One value per bar; `None` marks insufficient history.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSeries {
    pub indicator_type: IndicatorType,
    pub values: Vec<Option<f64>>,
}

impl IndicatorSeries {
    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied().flatten()
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorType::Sma {
                period,
                source: PriceField::Close,
            } => write!(f, "SMA({})", period),
            IndicatorType::Sma { period, source } => write!(f, "SMA({},{})", source, period),
            IndicatorType::Ema {
                period,
                source: PriceField::Close,
            } => write!(f, "EMA({})", period),
            IndicatorType::Ema { period, source } => write!(f, "EMA({},{})", source, period),
            IndicatorType::Rsi(period) => write!(f, "RSI({})", period),
            IndicatorType::Bollinger {
                band,
                period,
                stddev_mult_x100,
            } => {
                let name = match band {
                    BollingerBand::Upper => "BOLLINGER_UPPER",
                    BollingerBand::Middle => "BOLLINGER_MIDDLE",
                    BollingerBand::Lower => "BOLLINGER_LOWER",
                    BollingerBand::Width => "BOLLINGER_WIDTH",
                };
                let mult = *stddev_mult_x100 as f64 / 100.0;
                write!(f, "{}({},{})", name, period, mult)
            }
        }
    }
}
