//! pfx-daemon entry point.
//!
//! Tracing, config, the store connector and the routing engine are built
//! here and handed to the supervisor.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use pfx_config::secrets::resolve_store_credentials;
use pfx_daemon::cli::{self, Args};
use pfx_daemon::signals::ShutdownSignals;
use pfx_daemon::supervisor::{ExitReason, Supervisor};
use pfx_rib_local::LocalRib;
use pfx_source::MySqlSource;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Load .env.local if present (dev convenience).
    let _ = dotenvy::from_filename(".env.local");

    let args = Args::parse();
    init_tracing(args.log_filter());

    let code = match run(args).await {
        Ok(reason) => {
            info!(op = "supervisor", ?reason, "exiting");
            reason.exit_code()
        }
        Err(e) => {
            error!(op = "supervisor", error = %format!("{e:#}"), "fatal");
            1
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> Result<ExitReason> {
    let loaded = cli::load_config(&args)?;
    let cfg = loaded.config;
    info!(
        op = "config",
        config_hash = %loaded.config_hash,
        dsn = %cfg.source.data_source_name(),
        "configuration loaded"
    );

    let creds = resolve_store_credentials(&cfg.source)?;
    let source = Arc::new(MySqlSource::new(&cfg.source, &creds)?);
    let engine = Arc::new(LocalRib::new());
    let signals = ShutdownSignals::install()?;

    Supervisor::new(cfg, loaded.config_hash, source, engine)
        .run(signals.recv())
        .await
}

fn init_tracing(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}
