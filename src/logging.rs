//! Log setup for the command-line binary.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `dq_admin=debug`.
pub const LOG_ENV: &str = "DQ_ADMIN_LOG";
const DEFAULT_FILTER: &str = "dq_admin=info";
const LOG_FILE: &str = "dq-admin.log";

/// Filter from `DQ_ADMIN_LOG`, falling back to `dq_admin=info`.
pub fn filter() -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Write logs to `<log_dir>/dq-admin.log`, leaving stdout to command output.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes pending lines.
pub fn init(log_dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(filter())
    .with_writer(writer)
    .with_ansi(false)
    .try_init()
    .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

  Ok(guard)
}
