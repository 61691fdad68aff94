mod cli;
mod companion;
mod config;
mod dialogs;
mod error;
mod installer;
mod logging;
mod model;
mod orchestrator;
mod paths;
mod supervisor;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    if args.is_interactive() {
        // The control panel owns the terminal; keep logs out of it.
        logging::init_file()?;
    } else {
        logging::init_stderr();
    }

    cli::run(args).await
}
