//! Configuration validation.
//!
//! Checks the `[risk]` and `[engine]` sections before any run and turns them
//! into a `BacktestConfig`. Missing keys fall back to the defaults.

use crate::domain::backtest::{
    BacktestConfig, DEFAULT_STOP_LOSS_PCT, DEFAULT_TAKE_PROFIT_PCT, WarmupPolicy,
};
use crate::domain::error::StratlabError;
use crate::ports::config_port::ConfigPort;

/// Check `[risk]` and `[engine]` without building anything.
pub fn validate_config(config: &dyn ConfigPort) -> Result<(), StratlabError> {
    validate_stop_loss(config)?;
    validate_take_profit(config)?;
    validate_warmup_policy(config)?;
    Ok(())
}

/// Validate, then build the simulator configuration.
pub fn backtest_config_from(config: &dyn ConfigPort) -> Result<BacktestConfig, StratlabError> {
    Ok(BacktestConfig {
        stop_loss_pct: validate_stop_loss(config)?,
        take_profit_pct: validate_take_profit(config)?,
        warmup_policy: validate_warmup_policy(config)?,
    })
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> StratlabError {
    StratlabError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn read_double(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<f64, StratlabError> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| invalid(section, key, format!("'{raw}' is not a number"))),
    }
}

fn validate_stop_loss(config: &dyn ConfigPort) -> Result<f64, StratlabError> {
    let value = read_double(config, "risk", "stop_loss_pct", DEFAULT_STOP_LOSS_PCT)?;
    if value >= 0.0 {
        return Err(invalid(
            "risk",
            "stop_loss_pct",
            "stop_loss_pct must be negative",
        ));
    }
    Ok(value)
}

fn validate_take_profit(config: &dyn ConfigPort) -> Result<f64, StratlabError> {
    let value = read_double(config, "risk", "take_profit_pct", DEFAULT_TAKE_PROFIT_PCT)?;
    if value <= 0.0 {
        return Err(invalid(
            "risk",
            "take_profit_pct",
            "take_profit_pct must be positive",
        ));
    }
    Ok(value)
}

fn validate_warmup_policy(config: &dyn ConfigPort) -> Result<WarmupPolicy, StratlabError> {
    match config.get_string("engine", "warmup_policy") {
        None => Ok(WarmupPolicy::default()),
        Some(name) => WarmupPolicy::from_name(&name).ok_or_else(|| {
            invalid(
                "engine",
                "warmup_policy",
                format!("'{name}' is not one of start_at_zero, reject"),
            )
        }),
    }
}
