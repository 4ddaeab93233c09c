//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// tmplsync - template reconciler
#[derive(Parser, Debug)]
#[command(name = "tmplsync")]
#[command(version)]
#[command(about = "Keeps declared workflow templates in sync with a provisioning backend")]
#[command(
    long_about = "tmplsync loads Template records from YAML manifests and runs a level-triggered controller that creates, adopts, updates and finalizes their backend objects."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller until Ctrl+C
    Run {
        /// Controller config file (TOML); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Manifest file or directory of *.yaml / *.yml files
        #[arg(short, long)]
        manifests: PathBuf,

        /// Number of reconcile workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Log filter used when RUST_LOG is unset
        #[arg(long)]
        log_level: Option<String>,
    },

    /// Validate a config file and print the effective config
    CheckConfig {
        /// Controller config file (TOML)
        #[arg(short, long)]
        config: PathBuf,
    },
}
