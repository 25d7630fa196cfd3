//! CSV file data adapter.
//!
//! One file per symbol, `<base>/<symbol>.csv`, with a header row and columns
//! `timestamp,open,high,low,close,volume`. The timestamp is either epoch
//! milliseconds or a `YYYY-MM-DD` date taken as UTC midnight.

use crate::domain::error::StratlabError;
use crate::domain::ohlcv::Bar;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{symbol}.csv"))
    }
}

/// Parse CSV text into bars sorted by timestamp.
pub fn parse_bars(content: &str) -> Result<Vec<Bar>, StratlabError> {
    let mut rdr = csv::Reader::from_reader(content.as_bytes());
    let mut bars = Vec::new();

    for (row, result) in rdr.records().enumerate() {
        let record = result.map_err(|e| StratlabError::Data {
            reason: format!("CSV parse error: {e}"),
        })?;
        let column = |idx: usize, name: &str| {
            record.get(idx).map(str::trim).ok_or_else(|| StratlabError::Data {
                reason: format!("row {}: missing {name} column", row + 1),
            })
        };
        let number = |idx: usize, name: &str| -> Result<f64, StratlabError> {
            column(idx, name)?
                .parse()
                .map_err(|e| StratlabError::Data {
                    reason: format!("row {}: invalid {name} value: {e}", row + 1),
                })
        };

        bars.push(Bar {
            timestamp: parse_timestamp(column(0, "timestamp")?).ok_or_else(|| {
                StratlabError::Data {
                    reason: format!("row {}: invalid timestamp", row + 1),
                }
            })?,
            open: number(1, "open")?,
            high: number(2, "high")?,
            low: number(3, "low")?,
            close: number(4, "close")?,
            volume: number(5, "volume")?,
        });
    }

    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}

fn parse_timestamp(raw: &str) -> Option<i64> {
    if let Ok(ms) = raw.parse::<i64>() {
        return Some(ms);
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
}

impl DataPort for CsvAdapter {
    fn fetch_bars(&self, symbol: &str) -> Result<Vec<Bar>, StratlabError> {
        let path = self.csv_path(symbol);
        let content = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StratlabError::NoData {
                    symbol: symbol.to_string(),
                }
            } else {
                StratlabError::Data {
                    reason: format!("failed to read {}: {e}", path.display()),
                }
            }
        })?;
        let bars = parse_bars(&content)?;
        debug!(symbol, bars = bars.len(), "loaded bars");
        Ok(bars)
    }

    fn list_symbols(&self) -> Result<Vec<String>, StratlabError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| StratlabError::Data {
            reason: format!(
                "failed to read directory {}: {e}",
                self.base_path.display()
            ),
        })?;

        let mut symbols = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StratlabError::Data {
                reason: format!("directory entry error: {e}"),
            })?;
            let name = entry.file_name();
            if let Some(symbol) = name.to_string_lossy().strip_suffix(".csv") {
                symbols.push(symbol.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }
}
