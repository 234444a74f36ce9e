pub mod db;
pub mod errors;
pub mod filter;
pub mod geofence;
pub mod lifecycle;
pub mod models;
pub mod places;
pub mod planner;
pub mod repository;
pub mod validation;

pub use crate::errors::{AppError, AppResult};
pub use crate::filter::{apply_filter, LiveFilter, LocationsView, NotesView, Searchable};
pub use crate::planner::Planner;
pub use crate::repository::Repository;

use anyhow::Context;
use std::path::Path;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

const RETENTION_INTERVAL: Duration = Duration::from_secs(3600);

/// Prepares the data directory, logging and store, then starts background
/// maintenance. Must be called inside a Tokio runtime.
pub fn start(data_dir: &Path) -> anyhow::Result<Planner> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;
    init_tracing(data_dir)?;

    let planner = Planner::open(data_dir).context("opening planner store")?;
    spawn_maintenance(planner.clone());
    tracing::info!(data_dir = %data_dir.display(), "planner started");
    Ok(planner)
}

/// Hourly notification-log retention. The first pass runs immediately.
pub fn spawn_maintenance(planner: Planner) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RETENTION_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(error) = planner.run_retention().await {
                tracing::warn!(error = %error, "retention maintenance failed");
            }
        }
    })
}

/// JSON logs under `<data_dir>/logs`, rotated daily. Level comes from
/// `RUST_LOG`, defaulting to `info`. Only the first call installs a subscriber.
pub fn init_tracing(data_dir: &Path) -> anyhow::Result<()> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).with_context(|| format!("creating log directory {}", log_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "soft_planning.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    if LOG_GUARD.set(guard).is_err() {
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| anyhow::anyhow!(error.to_string()))
}
