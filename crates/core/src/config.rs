//! Configuration system for fsmon with per-root overrides.
//!
//! Config priority: root-relative (.fsmon.toml) > user (~/.config/fsmon/config.toml)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Monitor Configuration
// ============================================================================

/// Monitor configuration.
///
/// Installed globally via `SessionRegistry::setup`; sessions snapshot it at
/// creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
  /// Event intake debounce window in milliseconds (default: 300)
  pub debounce_ms: u64,

  /// Per-file read ceiling in bytes (default: 2 MiB)
  /// Files over this size are never read or cached.
  pub max_file_size: u64,

  /// Maximum number of files the prepopulation walk will visit (default: 2000)
  pub max_prepopulate_files: usize,

  /// Maximum directory descent depth during prepopulation (default: 6)
  pub max_depth: usize,

  /// LRU content cache ceiling per watch, in bytes (default: 50 MiB)
  pub max_cache_bytes: usize,

  /// Additional drop patterns (regex, matched against the root-relative
  /// path with a leading `/`)
  pub ignore_patterns: Vec<String>,

  /// Consult the ignore file at the watch root (default: true)
  pub respect_gitignore: bool,

  /// Patterns that override both the ignore file and `ignore_patterns`
  pub never_ignore: Vec<String>,

  /// Enable debug-level diagnostic logging (default: false)
  pub debug: bool,

  /// Write diagnostics to this file instead of stderr
  #[serde(skip_serializing_if = "Option::is_none")]
  pub debug_file: Option<PathBuf>,
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      debounce_ms: 300,
      max_file_size: 2 * 1024 * 1024, // 2MB
      max_prepopulate_files: 2000,
      max_depth: 6,
      max_cache_bytes: 50 * 1024 * 1024, // 50MB
      ignore_patterns: Vec::new(),
      respect_gitignore: true,
      never_ignore: Vec::new(),
      debug: false,
      debug_file: None,
    }
  }
}

impl MonitorConfig {
  /// Load config for a watch root, with fallback to user config.
  pub fn load_for_root(root: &Path) -> Self {
    // Try root-relative first
    let root_config = Self::root_config_path(root);
    if root_config.exists()
      && let Ok(content) = std::fs::read_to_string(&root_config)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    // Fall back to user config
    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
      && let Ok(content) = std::fs::read_to_string(&user_config_path)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    // Default
    Self::default()
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("FSMON_CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }

    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
      return Some(PathBuf::from(path).join("fsmon").join("config.toml"));
    }

    dirs::config_dir().map(|p: PathBuf| p.join("fsmon").join("config.toml"))
  }

  /// Get the root-relative config path
  pub fn root_config_path(root: &Path) -> PathBuf {
    root.join(".fsmon.toml")
  }

  /// Debounce window as a `Duration`.
  pub fn debounce(&self) -> std::time::Duration {
    std::time::Duration::from_millis(self.debounce_ms)
  }
}
