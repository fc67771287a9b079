//! Minion entry point.

use std::process::ExitCode;

use clap::Parser;
use minion::{daemon, logging, Args};
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("minion: {e:#}");
            return ExitCode::from(2);
        }
    };
    logging::init(&config.log_level);

    match daemon::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Minion failed");
            ExitCode::FAILURE
        }
    }
}
