#![allow(dead_code)]

use stratlab::domain::error::StratlabError;
pub use stratlab::domain::ohlcv::Bar;
use stratlab::domain::rule::{GroupOp, LogicGroup, Node};
use stratlab::domain::rule_parser::parse_condition;
use stratlab::ports::data_port::DataPort;
use std::collections::HashMap;
use std::process::ExitCode;

/// 2020-01-01T00:00:00Z
pub const START_MS: i64 = 1_577_836_800_000;
pub const DAY_MS: i64 = 86_400_000;

pub struct MockDataPort {
    pub data: HashMap<String, Vec<Bar>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_bars(&self, symbol: &str) -> Result<Vec<Bar>, StratlabError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(StratlabError::Data {
                reason: reason.clone(),
            });
        }
        self.data
            .get(symbol)
            .cloned()
            .ok_or_else(|| StratlabError::NoData {
                symbol: symbol.to_string(),
            })
    }

    fn list_symbols(&self) -> Result<Vec<String>, StratlabError> {
        let mut symbols: Vec<String> = self
            .data
            .keys()
            .chain(self.errors.keys())
            .cloned()
            .collect();
        symbols.sort();
        Ok(symbols)
    }
}

/// Daily bars with open/high/low bracketing the close.
pub fn make_bars(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Bar {
            timestamp: START_MS + i as i64 * DAY_MS,
            open: close,
            high: close * 1.01,
            low: close * 0.99,
            close,
            volume: 100_000.0,
        })
        .collect()
}

/// Flat at 100 up to `cross_at`, then rising 0.5 per bar from 101. SMA(5)
/// crosses above SMA(20) exactly once, at `cross_at`.
pub fn crossover_closes(len: usize, cross_at: usize) -> Vec<f64> {
    (0..len)
        .map(|i| {
            if i < cross_at {
                100.0
            } else {
                101.0 + (i - cross_at) as f64 * 0.5
            }
        })
        .collect()
}

/// AND group over the comparisons in `text`.
pub fn rule(text: &str) -> LogicGroup {
    let children = parse_condition(text, "c")
        .unwrap()
        .into_iter()
        .map(Node::Comparison)
        .collect();
    LogicGroup::new("root", GroupOp::And, children)
}

pub fn same_exit_code(actual: ExitCode, expected: ExitCode) -> bool {
    format!("{actual:?}") == format!("{expected:?}")
}

pub fn csv_text(bars: &[Bar]) -> String {
    let mut out = String::from("timestamp,open,high,low,close,volume\n");
    for b in bars {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            b.timestamp, b.open, b.high, b.low, b.close, b.volume
        ));
    }
    out
}
