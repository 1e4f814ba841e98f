//! `fetchlock-server` binary.
//!
//! Loads configuration, builds in-memory engines, optionally seeds tasks and
//! serves HTTP until ctrl-c.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use fetchlock_core::app::EngineRegistry;
use fetchlock_core::config::FetchLockConfig;
use fetchlock_core::observability::{LogFormat, init_logging};
use fetchlock_server::seed::{apply_seed, parse_seed};

#[derive(Debug, Parser)]
#[command(name = "fetchlock-server", about = "External task fetch-and-lock server")]
struct Args {
    /// TOML config file.
    #[arg(long, env = "FETCHLOCK_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "FETCHLOCK_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// `pretty` or `json`.
    #[arg(long, env = "FETCHLOCK_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,

    /// JSON file with tasks to create at startup.
    #[arg(long, env = "FETCHLOCK_SEED")]
    seed: Option<PathBuf>,

    #[arg(long, env = "FETCHLOCK_MIN_TIMEOUT_MS")]
    min_timeout_ms: Option<i64>,

    #[arg(long, env = "FETCHLOCK_MAX_TIMEOUT_MS")]
    max_timeout_ms: Option<i64>,
}

fn load_config(args: &Args) -> Result<FetchLockConfig> {
    let mut config = match &args.config {
        Some(path) => FetchLockConfig::load(path)?,
        None => FetchLockConfig::default(),
    };
    if let Some(min) = args.min_timeout_ms {
        config.min_timeout_ms = min;
    }
    if let Some(max) = args.max_timeout_ms {
        config.max_timeout_ms = max;
    }
    config.validate()?;
    Ok(config)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_format);

    let config = load_config(&args)?;
    let registry = Arc::new(EngineRegistry::from_config(&config)?);
    if config.users.is_empty() {
        tracing::warn!("no users configured; every request will be rejected");
    }

    if let Some(path) = &args.seed {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read seed file {}", path.display()))?;
        let created = apply_seed(&registry, parse_seed(&text)?).await?;
        tracing::info!(created, path = %path.display(), "seeded tasks");
    }

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind to {}", args.bind))?;
    tracing::info!(
        addr = %args.bind,
        engines = ?registry.names().collect::<Vec<_>>(),
        min_timeout_ms = config.min_timeout_ms,
        max_timeout_ms = config.max_timeout_ms,
        "starting fetchlock server"
    );

    axum::serve(listener, fetchlock_server::router(registry))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}
