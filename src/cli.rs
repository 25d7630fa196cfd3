//! CLI definition and dispatch.
//!
//! Human-readable progress and summaries go to stderr; machine-readable
//! output (JSON, matched symbols) goes to stdout.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::adapters::csv_adapter::{CsvAdapter, parse_bars};
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::{BacktestConfig, BacktestResult, run_backtest};
use crate::domain::config_validation::{backtest_config_from, validate_config};
use crate::domain::error::StratlabError;
use crate::domain::live::{evaluate_latest, limit_history};
use crate::domain::ohlcv::Bar;
use crate::domain::rule::LogicGroup;
use crate::domain::rule_document::read_rule_document;
use crate::domain::scan::first_matching;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;

#[derive(Parser, Debug)]
#[command(name = "stratlab", about = "Strategy rule evaluator and backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Backtest a rule over a bar series
    Backtest {
        #[arg(short, long)]
        rule: PathBuf,
        /// CSV file; defaults to [data] directory/symbol from the config
        #[arg(short, long)]
        bars: Option<PathBuf>,
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        symbol: Option<String>,
        /// Print the full result as JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// Evaluate a rule on the latest bar
    Signal {
        #[arg(short, long)]
        rule: PathBuf,
        #[arg(short, long)]
        bars: PathBuf,
        /// Only use the last N bars, widened when the rule needs more to
        /// match full history (always all bars for EMA/RSI rules)
        #[arg(short, long)]
        window: Option<usize>,
    },
    /// Parse a rule document and describe it
    Validate {
        #[arg(short, long)]
        rule: PathBuf,
        /// Also check the [risk] and [engine] sections of this config
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the first symbol in a directory whose latest bar fires the rule
    Scan {
        #[arg(short, long)]
        rule: PathBuf,
        #[arg(short, long)]
        dir: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    init_logging();
    match cli.command {
        Command::Backtest {
            rule,
            bars,
            config,
            symbol,
            json,
        } => run_backtest_command(
            &rule,
            bars.as_deref(),
            config.as_deref(),
            symbol.as_deref(),
            json,
        ),
        Command::Signal { rule, bars, window } => run_signal(&rule, &bars, window),
        Command::Validate { rule, config } => run_validate(&rule, config.as_deref()),
        Command::Scan { rule, dir } => run_scan(&rule, &dir),
    }
}

/// Install a stderr fmt subscriber filtered by `RUST_LOG` (default `warn`).
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // A second call (tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn fail(err: &StratlabError) -> ExitCode {
    eprintln!("error: {err}");
    if let Some(diagnostic) = err.diagnostic() {
        eprintln!("\n{diagnostic}");
    }
    ExitCode::from(err)
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| fail(&e))
}

pub fn load_rule(path: &Path) -> Result<LogicGroup, StratlabError> {
    read_rule_document(path)
}

pub fn load_bars(path: &Path) -> Result<Vec<Bar>, StratlabError> {
    let content = fs::read_to_string(path)?;
    parse_bars(&content)
}

/// Bars from an explicit CSV path, or from `[data] directory` plus the symbol
/// (`symbol_override` first, then `[data] symbol`).
pub fn resolve_bars(
    bars_path: Option<&Path>,
    symbol_override: Option<&str>,
    config: Option<&dyn ConfigPort>,
) -> Result<Vec<Bar>, StratlabError> {
    if let Some(path) = bars_path {
        return load_bars(path);
    }
    let directory = config
        .and_then(|c| c.get_string("data", "directory"))
        .ok_or_else(|| StratlabError::ConfigMissing {
            section: "data".to_string(),
            key: "directory".to_string(),
        })?;
    let symbol = symbol_override
        .map(str::to_string)
        .or_else(|| config.and_then(|c| c.get_string("data", "symbol")))
        .ok_or_else(|| StratlabError::ConfigMissing {
            section: "data".to_string(),
            key: "symbol".to_string(),
        })?;
    CsvAdapter::new(PathBuf::from(directory)).fetch_bars(&symbol)
}

pub fn build_backtest_config(config: Option<&dyn ConfigPort>) -> Result<BacktestConfig, StratlabError> {
    match config {
        Some(c) => backtest_config_from(c),
        None => Ok(BacktestConfig::default()),
    }
}

pub fn run_backtest_command(
    rule_path: &Path,
    bars_path: Option<&Path>,
    config_path: Option<&Path>,
    symbol: Option<&str>,
    json: bool,
) -> ExitCode {
    let adapter = match config_path {
        Some(path) => {
            eprintln!("Loading config from {}", path.display());
            match load_config(path) {
                Ok(a) => Some(a),
                Err(code) => return code,
            }
        }
        None => None,
    };
    let config_port = adapter.as_ref().map(|a| a as &dyn ConfigPort);

    let config = match build_backtest_config(config_port) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };

    eprintln!("Loading rule from {}", rule_path.display());
    let tree = match load_rule(rule_path) {
        Ok(t) => t,
        Err(e) => return fail(&e),
    };

    let bars = match resolve_bars(bars_path, symbol, config_port) {
        Ok(b) => b,
        Err(e) => return fail(&e),
    };
    eprintln!("Loaded {} bars", bars.len());

    match run_backtest(&tree, &bars, &config) {
        Ok(result) => {
            print_summary(&result);
            if json {
                match serde_json::to_string_pretty(&result) {
                    Ok(s) => println!("{s}"),
                    Err(e) => return fail(&StratlabError::from(e)),
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn print_summary(result: &BacktestResult) {
    let m = &result.metrics;
    eprintln!("\n=== Backtest Results ===");
    eprintln!("Start Index:      {}", result.start_index);
    eprintln!("Total Trades:     {}", m.total_trades);
    eprintln!("Win Rate:         {:.1}%", m.win_rate * 100.0);
    eprintln!("Profit Factor:    {:.2}", m.profit_factor);
    eprintln!("Avg Profit:       {:.2}%", m.avg_profit);
    eprintln!("Avg Loss:         {:.2}%", m.avg_loss);
    eprintln!("Total Return:     {:.2}%", m.total_return);
    eprintln!("Max Drawdown:     -{:.1}%", m.max_drawdown);
    eprintln!("CAGR:             {:.2}%", m.cagr);
    eprintln!("Avg Bars Held:    {:.1}", m.avg_bars_held);
    if let Some(open) = &result.open_trade {
        eprintln!(
            "Open Trade:       entered bar {} at {:.2}",
            open.entry_index, open.entry_price
        );
    }
}

pub fn run_signal(rule_path: &Path, bars_path: &Path, window: Option<usize>) -> ExitCode {
    let tree = match load_rule(rule_path) {
        Ok(t) => t,
        Err(e) => return fail(&e),
    };
    let bars = match load_bars(bars_path) {
        Ok(b) => b,
        Err(e) => return fail(&e),
    };
    let bars = match window {
        Some(n) => limit_history(&tree, &bars, n),
        None => &bars[..],
    };

    match evaluate_latest(&tree, bars) {
        Ok(signal) => {
            let output = serde_json::json!({
                "rule": tree.id,
                "signal": signal,
                "timestamp": bars.last().map(|b| b.timestamp),
            });
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

pub fn run_validate(rule_path: &Path, config_path: Option<&Path>) -> ExitCode {
    if let Some(path) = config_path {
        eprintln!("Validating config: {}", path.display());
        let adapter = match load_config(path) {
            Ok(a) => a,
            Err(code) => return code,
        };
        if let Err(e) = validate_config(&adapter) {
            return fail(&e);
        }
    }

    eprintln!("Validating rule: {}", rule_path.display());
    let tree = match load_rule(rule_path) {
        Ok(t) => t,
        Err(e) => return fail(&e),
    };

    eprintln!("\nParsed: {tree}");
    eprintln!("\nIndicators to compute:");
    for indicator in tree.extract_indicators() {
        eprintln!("  {indicator}");
    }
    eprintln!("\nWarm-up index:    {}", tree.warmup_index());
    eprintln!("Required history: {}", tree.required_history());
    eprintln!("\nRule is valid");
    ExitCode::SUCCESS
}

/// Load every symbol from `data` and return the first (in listing order)
/// whose latest bar fires `tree`. Symbols that fail to load are skipped.
pub fn run_scan_pipeline(
    tree: &LogicGroup,
    data: &dyn DataPort,
) -> Result<Option<String>, StratlabError> {
    let symbols = data.list_symbols()?;
    let mut candidates = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        match data.fetch_bars(&symbol) {
            Ok(bars) => candidates.push((symbol, bars)),
            Err(e) => warn!(symbol = %symbol, error = %e, "skipping symbol"),
        }
    }
    eprintln!("Scanning {} symbols", candidates.len());
    Ok(first_matching(tree, &candidates).map(str::to_string))
}

fn run_scan(rule_path: &Path, dir: &Path) -> ExitCode {
    let tree = match load_rule(rule_path) {
        Ok(t) => t,
        Err(e) => return fail(&e),
    };
    let adapter = CsvAdapter::new(dir.to_path_buf());
    match run_scan_pipeline(&tree, &adapter) {
        Ok(Some(symbol)) => {
            println!("{symbol}");
            ExitCode::SUCCESS
        }
        Ok(None) => {
            eprintln!("No symbol matched");
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}
