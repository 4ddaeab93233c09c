//! # tmplsync
//!
//! Entry point for the template reconciler.
//!
//! ## Startup Sequence
//!
//! 1. **Config** - defaults, then the TOML file, `TMPLSYNC_*` variables and flags
//! 2. **Tracing** - `RUST_LOG` if set, otherwise the configured log level
//! 3. **Store** - seeded from the YAML manifests
//! 4. **Controller** - workers reconcile every record against the backend
//!
//! ## Shutdown
//!
//! Ctrl+C stops the feeders, lets in-flight runs finish and joins all tasks.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tmplsync::cli::{Cli, Commands};
use tmplsync::runtime::{self, Overrides};
use tmplsync_reconciler::InMemoryTemplateClient;

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command {
        Commands::Run {
            config,
            manifests,
            workers,
            log_level,
        } => {
            let config =
                runtime::effective_config(config.as_deref(), Overrides { workers, log_level })?;
            init_tracing(&config.log_level);
            run(config, &manifests).await
        }
        Commands::CheckConfig { config } => {
            let config = runtime::effective_config(Some(&config), Overrides::default())?;
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render effective config")?;
            println!("{rendered}");
            Ok(())
        }
    }
}

async fn run(
    config: tmplsync_reconciler::ControllerConfig,
    manifests: &std::path::Path,
) -> Result<()> {
    let start_time = Instant::now();
    info!("tmplsync starting...");

    let templates = runtime::load_manifests(manifests)?;
    info!(count = templates.len(), path = %manifests.display(), "Manifests loaded");

    let store = runtime::seed_store(templates, config.watch_capacity).await?;
    let client = Arc::new(InMemoryTemplateClient::new());
    let handle = runtime::start_controller(store, client, config)?;

    info!(
        "tmplsync started in {:?}. Press Ctrl+C to stop.",
        start_time.elapsed()
    );
    wait_for_shutdown().await;

    handle.shutdown().await;
    info!("tmplsync stopped gracefully");
    Ok(())
}

/// Initialize tracing subscriber, preferring `RUST_LOG` over `default_level`.
fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
