//! gridmgrd — the GridMgr daemon.
//!
//! Single binary that assembles the control plane:
//! - State store (redb)
//! - Remote console client
//! - Placement manager
//! - Job orchestrator (with the bundled file-backed account directory)
//! - REST API
//!
//! # Usage
//!
//! ```text
//! gridmgrd serve --config /etc/gridmgr/gridmgr.toml
//! ```

mod accounts;
mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use gridmgr_api::{ApiState, build_router};
use gridmgr_console::{ConsoleCredentials, RestConsole};
use gridmgr_jobs::{JobOrchestrator, ResetTokenSigner};
use gridmgr_placement::PlacementManager;
use gridmgr_state::StateStore;

use crate::accounts::{FileAccounts, LogNotifier};
use crate::config::GridConfig;

#[derive(Parser)]
#[command(name = "gridmgrd", about = "GridMgr daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane API server.
    Serve {
        /// Path to the configuration file.
        #[arg(long, default_value = "/etc/gridmgr/gridmgr.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gridmgrd=debug,gridmgr=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => serve(config).await,
    }
}

async fn serve(config_path: PathBuf) -> anyhow::Result<()> {
    let config = GridConfig::from_file(&config_path)?;
    info!(path = ?config_path, "configuration loaded");

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("gridmgr.redb");

    // ── Assemble subsystems ────────────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let console = Arc::new(RestConsole::new(Duration::from_secs(
        config.console.timeout_secs,
    )));
    let credentials = ConsoleCredentials {
        username: config.console.username.clone(),
        password: config.console.password.clone(),
    };

    let placement = Arc::new(PlacementManager::new(
        store.clone(),
        console,
        credentials,
    ));
    info!("placement manager initialized");

    let accounts_path = config
        .reset
        .accounts_file
        .clone()
        .unwrap_or_else(|| config.server.data_dir.join("accounts.json"));
    let accounts = Arc::new(FileAccounts::load(&accounts_path)?);
    info!(path = ?accounts_path, "account directory loaded");

    let jobs = Arc::new(JobOrchestrator::new(
        store.clone(),
        placement.clone(),
        accounts,
        Arc::new(LogNotifier),
        ResetTokenSigner::new(
            config.reset.secret.clone(),
            Duration::from_secs(config.reset.ttl_secs),
        ),
    ));
    info!("job orchestrator initialized");

    let router = build_router(ApiState {
        store,
        placement,
        jobs,
    });

    // ── Serve ──────────────────────────────────────────────────────

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.listen_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
