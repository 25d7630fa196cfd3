//! Core domain types and logic.

pub mod ohlcv;
pub mod error;
pub mod indicator;
pub mod indicator_helpers;
pub mod rule;
pub mod rule_parser;
pub mod rule_document;
pub mod rule_eval;
pub mod trade;
pub mod backtest;
pub mod metrics;
pub mod live;
pub mod scan;
pub mod config_validation;
