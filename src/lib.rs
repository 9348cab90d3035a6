pub mod analytics;
pub mod app;
pub mod cache;
pub mod dates;
pub mod dispatch;
pub mod errors;
pub mod models;
pub mod persist;
pub mod settings;
pub mod store;
pub mod tray;

pub use crate::app::{Clock, DashboardView, EventLoop, ExpenseApp, Page};
pub use crate::dates::MonthKey;
pub use crate::dispatch::{CommandQueue, CommandSender, DrainReport};
pub use crate::errors::{AppError, AppResult};
pub use crate::models::{AggregateKind, AggregateValue, ExpenseRecord, MonthAggregates, MonthPartition};
pub use crate::settings::SettingsStore;
pub use crate::store::{PartitionFiles, RecordStore};
pub use crate::tray::{TrayAction, TraySignal};

use crate::settings::keys;
use anyhow::Context;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

pub const HOME_ENV: &str = "LEDGERPAD_HOME";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub settings_file: PathBuf,
    pub log_dir: PathBuf,
}

impl AppPaths {
    pub fn resolve() -> AppResult<Self> {
        let root = match std::env::var_os(HOME_ENV) {
            Some(value) if !value.is_empty() => PathBuf::from(value),
            _ => std::env::current_dir()?,
        };
        Ok(Self::at(&root))
    }

    pub fn at(root: &Path) -> Self {
        Self {
            data_dir: root.to_path_buf(),
            settings_file: root.join("settings.json"),
            log_dir: root.join("logs"),
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    let paths = AppPaths::resolve().context("resolve data directory")?;
    std::fs::create_dir_all(&paths.data_dir)
        .with_context(|| format!("create data directory {}", paths.data_dir.display()))?;
    let settings = Arc::new(SettingsStore::open(&paths.settings_file).context("open settings")?);
    init_tracing(&paths.log_dir, settings.get(keys::LOGGING, keys::DEBUG_MODE, false))
        .map_err(anyhow::Error::msg)?;
    tracing::info!(data_dir = %paths.data_dir.to_string_lossy(), "starting ledgerpad");

    let records = RecordStore::open(&paths.data_dir);
    let mut event_loop = EventLoop::new(ExpenseApp::new(records, Arc::clone(&settings), Clock::System));

    if settings.get(keys::TRAY, keys::ENABLED, true) {
        tray::spawn_line_host(event_loop.tray(), BufReader::new(io::stdin())).context("start tray host")?;
    } else {
        tracing::info!("tray disabled; the loop runs until the process is stopped");
    }

    event_loop.run().context("event loop")?;
    tracing::info!("ledgerpad stopped");
    Ok(())
}

fn init_tracing(log_dir: &Path, debug: bool) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "ledgerpad.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let fallback = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback)),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_hang_off_the_data_root() {
        let paths = AppPaths::at(Path::new("/tmp/ledger"));
        assert_eq!(paths.settings_file, PathBuf::from("/tmp/ledger/settings.json"));
        assert_eq!(paths.log_dir, PathBuf::from("/tmp/ledger/logs"));
    }
}
