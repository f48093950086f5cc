//! Engagement Ledger Daemon
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults
//! engagement-ledger
//!
//! # Custom config, port and reference data
//! engagement-ledger --config /path/to/config.toml --http-port 8093 --seed seed.json
//!
//! # Throwaway in-memory database
//! engagement-ledger --in-memory --seed seed.json
//! ```
//!
//! ## HTTP API
//!
//! - `GET /health` - Health check with row counts
//! - `PUT /engagement/{kind}/on|off` - Toggle an action
//! - `GET /engagement/state` - Viewer state for a target
//! - `GET /engagement/counters/{id}` - Target counters
//! - `GET /engagement/history/{id}` - Ledger history for a target
//! - `POST /engagement/reconcile/{id}` - Recompute counters from the ledger
//! - `GET /statistics` - Grouped rollup over a scope

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use engagement_ledger::services::events::spawn_logging_listener;
use engagement_ledger::{seed, Config, EngagementDb, HttpServer, Services};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "engagement-ledger")]
#[command(about = "Engagement ledger and statistics service")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "ENGAGEMENT_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "ENGAGEMENT_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "ENGAGEMENT_HTTP_PORT")]
    http_port: Option<u16>,

    /// Reference data seed document (JSON)
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Use an in-memory database (nothing is persisted)
    #[arg(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("engagement_ledger=info".parse()?),
        )
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)
            .with_context(|| format!("loading config {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if let Some(seed) = args.seed {
        config.seed_file = Some(seed);
    }

    info!(
        storage_dir = %config.storage_dir.display(),
        http_port = config.http_port,
        in_memory = args.in_memory,
        "Starting engagement-ledger"
    );

    let db = if args.in_memory {
        EngagementDb::open_in_memory()?
    } else {
        tokio::fs::create_dir_all(&config.storage_dir)
            .await
            .with_context(|| format!("creating {}", config.storage_dir.display()))?;

        // Save default config if it doesn't exist
        let config_path = config.config_path();
        if !config_path.exists() {
            config.save(&config_path)?;
            info!(path = %config_path.display(), "Created default config");
        }

        EngagementDb::open_with_readers(
            &config.database_path(),
            Duration::from_millis(config.busy_timeout_ms),
            config.reader_pool_size,
        )
        .context("opening database")?
    };
    let db = Arc::new(db);

    let services = Arc::new(Services::new(db.clone(), &config));
    let _listener = spawn_logging_listener(services.events.clone());

    if let Some(seed_path) = &config.seed_file {
        seed::apply_seed_file(&db, &services.events, seed_path)
            .with_context(|| format!("applying seed {}", seed_path.display()))?;
    }

    let stats = db.stats()?;
    info!(
        projects = stats.project_count,
        users = stats.user_count,
        ledger_rows = stats.ledger_rows,
        "Database ready"
    );

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let http_server = Arc::new(HttpServer::new(services, http_addr));

    info!("HTTP API available at http://{}", http_addr);
    info!("Press Ctrl+C to stop.");

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    tokio::select! {
        result = http_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    info!("Shutdown complete");
    Ok(())
}
