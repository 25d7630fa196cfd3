//! OHLCV bar representation.

use crate::domain::error::StratlabError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One OHLCV observation. `timestamp` is epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// high - low
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn field(&self, field: PriceField) -> f64 {
        match field {
            PriceField::Open => self.open,
            PriceField::High => self.high,
            PriceField::Low => self.low,
            PriceField::Close => self.close,
            PriceField::Volume => self.volume,
            PriceField::Range => self.range(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceField {
    Open,
    High,
    Low,
    Close,
    Volume,
    Range,
}

impl PriceField {
    /// Case-insensitive lookup used by the rule parser and document loader.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "OPEN" => Some(PriceField::Open),
            "HIGH" => Some(PriceField::High),
            "LOW" => Some(PriceField::Low),
            "CLOSE" | "PRICE" => Some(PriceField::Close),
            "VOLUME" => Some(PriceField::Volume),
            "RANGE" => Some(PriceField::Range),
            _ => None,
        }
    }
}

impl fmt::Display for PriceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PriceField::Open => "OPEN",
            PriceField::High => "HIGH",
            PriceField::Low => "LOW",
            PriceField::Close => "CLOSE",
            PriceField::Volume => "VOLUME",
            PriceField::Range => "RANGE",
        };
        f.write_str(name)
    }
}

/// Reject non-positive or non-finite prices, negative volume, and duplicate
/// or out-of-order timestamps.
pub fn validate_bars(bars: &[Bar]) -> Result<(), StratlabError> {
    for (index, bar) in bars.iter().enumerate() {
        for (name, price) in [
            ("open", bar.open),
            ("high", bar.high),
            ("low", bar.low),
            ("close", bar.close),
        ] {
            if !(price.is_finite() && price > 0.0) {
                return Err(StratlabError::InvalidBars {
                    index,
                    reason: format!("{name} must be a positive number, got {price}"),
                });
            }
        }
        if !(bar.volume.is_finite() && bar.volume >= 0.0) {
            return Err(StratlabError::InvalidBars {
                index,
                reason: format!("volume must be non-negative, got {}", bar.volume),
            });
        }
    }
    for (i, pair) in bars.windows(2).enumerate() {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(StratlabError::InvalidBars {
                index: i + 1,
                reason: format!(
                    "timestamp {} does not follow {}",
                    pair[1].timestamp, pair[0].timestamp
                ),
            });
        }
    }
    Ok(())
}
