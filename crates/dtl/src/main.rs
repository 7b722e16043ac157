//! dtl - A CLI to manage Azure DevTest Labs

use clap::{CommandFactory, Parser};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod banner;
mod cli;
mod commands;
mod output;

use cli::Cli;

#[tokio::main]
async fn main() {
    // Handle dynamic shell completions (when invoked via COMPLETE=<shell> dtl)
    clap_complete::CompleteEnv::with_factory(Cli::command).complete();

    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose > 0 {
        match cli.verbose {
            1 => "dtl=debug,dtl_client=debug,dtl_core=debug",
            _ => "dtl=trace,dtl_client=trace,dtl_core=trace",
        }
    } else if cli.quiet {
        "error"
    } else {
        "dtl=info"
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(EnvFilter::new(filter))
        .init();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let printer = cli.printer();
    if let Err(e) = cli.run().await {
        printer.error(&format!("{e:#}"));
        std::process::exit(1);
    }
}
