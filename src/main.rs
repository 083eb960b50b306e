//! Runner backend test harness CLI
//!
//! Starts backend instances (process or container), runs declarative
//! YAML scenarios against them, and offers small probes for a backend
//! that is already running.

use clap::Parser;
use harness::commands::{self, Commands};
use harness::common::logging;

#[derive(Parser)]
#[command(name = "runner-harness", about = "Test harness for the runner backend")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    logging::init();

    let cli = Cli::parse();

    if let Err(e) = commands::dispatch(cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
