//! Tracing subscriber setup for the CLI.

use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LogConfig;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level; `--verbose` raises the
/// default to debug. The returned guard must live until exit so buffered
/// file output gets flushed.
pub fn init(config: &LogConfig, verbose: bool) -> Result<Option<WorkerGuard>> {
  let default_level = match (&config.level, verbose) {
    (_, true) => "remotable=debug,info".to_string(),
    (Some(level), false) => level.clone(),
    (None, false) => "info".to_string(),
  };
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&default_level))
    .map_err(|e| eyre!("Invalid log level '{}': {}", default_level, e))?;

  let (file_layer, guard) = match &config.directory {
    Some(directory) => {
      std::fs::create_dir_all(directory)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", directory.display(), e))?;
      let (writer, guard) = tracing_appender::non_blocking(rolling::daily(directory, "remotable.log"));
      let layer = fmt::layer().with_writer(writer).with_ansi(false);
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(file_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

  Ok(guard)
}
