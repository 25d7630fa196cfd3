use clap::Parser;
use stratlab::cli::{Cli, run};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
