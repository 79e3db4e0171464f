//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use fetcher_core::catalog::MAX_RETRIES;

/// Default catalog path.
pub const DEFAULT_CATALOG: &str = "download_catalog.json";

/// Fetch the files of a dataset catalog, resuming where the last run stopped.
///
/// Files are grouped by priority in a JSON, TOML or YAML catalog. Completed files are
/// recorded in `download_status.json` inside the download directory and are
/// skipped on the next run.
#[derive(Parser, Debug)]
#[command(name = "fetcher")]
#[command(author, version, about)]
pub struct Args {
    /// Catalog file (JSON, or TOML/YAML by extension: .toml, .yaml, .yml)
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CATALOG)]
    pub config: PathBuf,

    /// Write a starter catalog to --config and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Overwrite an existing catalog with --generate-config
    #[arg(long, requires = "generate_config")]
    pub force: bool,

    /// Print the pending task list in dispatch order and exit
    #[arg(long, conflicts_with = "generate_config")]
    pub dry_run: bool,

    /// Download directory (overrides the catalog's download_dir)
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Maximum concurrent transfers (1-100, overrides the catalog)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub max_concurrent: Option<u8>,

    /// Maximum attempts per file (1-100, overrides the catalog)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_RETRIES)))]
    pub max_retries: Option<u32>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Log level used when `RUST_LOG` is not set.
    #[must_use]
    pub fn default_log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
