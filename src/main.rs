mod args;
mod backup;
mod cli;
mod client;
mod config;
mod contract;
mod error;
mod format;
mod help;
mod request;
mod subscribe;

use std::io::IsTerminal;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

const LOG_ENV: &str = "KOOR_LOG";

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .without_time()
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    init_logging();

    // `--pretty` is a presentation toggle accepted anywhere on the line,
    // so it is stripped before clap sees the arguments.
    let mut args: Vec<String> = std::env::args().collect();
    let pretty = format::take_pretty_flag(&mut args);

    if args.len() < 2 {
        eprint!("{}", help::USAGE);
        return ExitCode::FAILURE;
    }

    let cli = match Cli::parse_args(&args) {
        Ok(c) => c,
        Err(e) => {
            e.print().ok();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match cli::handle(cli.command, pretty) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
