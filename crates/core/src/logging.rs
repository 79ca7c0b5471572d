//! Tracing bootstrap driven by the monitor config.

use std::path::Path;

pub use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::MonitorConfig;

/// Initialize tracing from the monitor config.
///
/// With `debug` unset this installs an INFO-level console subscriber; with
/// `debug` set the default level drops to DEBUG, and with `debug_file` set
/// output goes to that file instead of stderr (no ANSI). `RUST_LOG` always
/// overrides the default level.
///
/// Returns the file writer guard, which must be kept alive for the duration
/// of the program when a debug file is in use. Calling this when a global
/// subscriber is already installed is a no-op.
pub fn init(config: &MonitorConfig) -> Option<WorkerGuard> {
  let level = if config.debug {
    tracing::Level::DEBUG
  } else {
    tracing::Level::INFO
  };

  // Build env filter (allows RUST_LOG override)
  let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

  match &config.debug_file {
    Some(path) => {
      let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
      let file_name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "fsmon.log".to_string());

      if std::fs::create_dir_all(dir).is_err() {
        // Fall back to console-only logging
        let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
        return None;
      }

      let file_appender = tracing_appender::rolling::never(dir, file_name);
      let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

      let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(file_writer)
        .try_init();

      Some(guard)
    }
    None => {
      let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init();
      None
    }
  }
}
