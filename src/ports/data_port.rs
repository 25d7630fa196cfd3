//! Bar data access port.

use crate::domain::error::StratlabError;
use crate::domain::ohlcv::Bar;

pub trait DataPort {
    /// All bars for `symbol`, oldest first.
    fn fetch_bars(&self, symbol: &str) -> Result<Vec<Bar>, StratlabError>;

    /// Symbols this source can serve, sorted.
    fn list_symbols(&self) -> Result<Vec<String>, StratlabError>;
}
