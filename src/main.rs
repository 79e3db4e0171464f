//! CLI entry point for the dataset fetcher.

use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error};

mod app;
mod cli;

use cli::Args;

/// Process outcome mapped to the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// The run finished, even if individual files failed or it was interrupted.
    Success,
    /// Startup failed before any transfer could run.
    Failure,
}

impl From<ProcessExit> for ExitCode {
    fn from(value: ProcessExit) -> Self {
        match value {
            ProcessExit::Success => ExitCode::SUCCESS,
            ProcessExit::Failure => ExitCode::from(1),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // The runtime initializes tracing on every path before returning.
    let outcome = match app::runtime::run(&args).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("{e:#}");
            ProcessExit::Failure
        }
    };
    debug!(?outcome, "exiting");
    outcome.into()
}
