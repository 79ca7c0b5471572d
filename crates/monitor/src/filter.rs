//! Ignore filter deciding which paths the monitor tracks.
//!
//! Combines four pattern sources, checked in a fixed order:
//! never-ignore overrides, built-in drops (VCS metadata, dependency
//! directories, editor temp files, OS metadata), the ignore file at the
//! watch root (gitignore semantics via the `ignore` crate), and user
//! regexes from the config. The filter is pure: building it may touch the
//! filesystem (to load the ignore file), matching never does.

use std::path::Path;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use regex::Regex;
use tracing::{debug, warn};

use fsmon_core::MonitorConfig;

/// Patterns dropped regardless of ignore-file contents, matched against the
/// root-relative path with a leading `/`.
const BUILTIN_PATTERNS: &[&str] = &[
  // VCS metadata
  r"/\.git(/|$)",
  r"/\.svn(/|$)",
  r"/\.hg(/|$)",
  r"/\.jj(/|$)",
  // Dependency and build directories commonly found at repo roots
  r"/node_modules(/|$)",
  r"/target(/|$)",
  r"/__pycache__(/|$)",
  r"/\.venv(/|$)",
  r"/venv(/|$)",
  r"/vendor(/|$)",
  r"/\.cache(/|$)",
  // Editor swap/backup/temp files
  r"\.sw[po]$",
  r"~$",
  r"\.bak$",
  r"\.tmp$",
  r"/4913$",
  r"/\.#[^/]*$",
  r"/#[^/]*#$",
  // OS metadata
  r"/\.DS_Store$",
  r"/Thumbs\.db$",
  r"/desktop\.ini$",
];

/// Decides whether a root-relative path is tracked.
pub struct IgnoreFilter {
  builtin: Vec<Regex>,
  user: Vec<Regex>,
  never: Vec<Regex>,
  gitignore: Option<Gitignore>,
}

impl IgnoreFilter {
  /// Build the filter for a watch root.
  ///
  /// Invalid user regexes are skipped with a warning rather than failing
  /// the watch. The ignore file is consulted only when `respect_gitignore`
  /// is set and the file exists.
  pub fn new(root: &Path, config: &MonitorConfig) -> Self {
    let builtin = BUILTIN_PATTERNS
      .iter()
      .filter_map(|p| Regex::new(p).ok())
      .collect();

    let user = compile_patterns(&config.ignore_patterns, "ignore_patterns");
    let never = compile_patterns(&config.never_ignore, "never_ignore");

    let gitignore = if config.respect_gitignore {
      build_gitignore(root)
    } else {
      None
    };

    Self {
      builtin,
      user,
      never,
      gitignore,
    }
  }

  /// An empty filter that tracks everything (used by tests).
  #[cfg(test)]
  pub fn allow_all() -> Self {
    Self {
      builtin: Vec::new(),
      user: Vec::new(),
      never: Vec::new(),
      gitignore: None,
    }
  }

  /// Whether a root-relative file path should be dropped.
  pub fn should_ignore(&self, relative: &str) -> bool {
    self.decide(relative, false)
  }

  /// Whether a root-relative directory should be skipped during descent.
  pub fn should_ignore_dir(&self, relative: &str) -> bool {
    self.decide(relative, true)
  }

  fn decide(&self, relative: &str, is_dir: bool) -> bool {
    // Matching always sees a leading slash so anchored patterns behave the
    // same for top-level and nested paths.
    let matchable = if relative.starts_with('/') {
      relative.to_string()
    } else {
      format!("/{relative}")
    };

    // 1. Never-ignore overrides everything
    if self.never.iter().any(|re| re.is_match(&matchable)) {
      return false;
    }

    // 2. Built-in drops
    if self.builtin.iter().any(|re| re.is_match(&matchable)) {
      return true;
    }

    // 3. Ignore-file patterns, gitignore semantics (later patterns win,
    //    negations re-include)
    if let Some(ref gitignore) = self.gitignore
      && gitignore.matched(relative, is_dir).is_ignore()
    {
      return true;
    }

    // 4. User patterns
    if self.user.iter().any(|re| re.is_match(&matchable)) {
      return true;
    }

    false
  }
}

fn compile_patterns(patterns: &[String], what: &str) -> Vec<Regex> {
  patterns
    .iter()
    .filter_map(|p| match Regex::new(p) {
      Ok(re) => Some(re),
      Err(e) => {
        warn!(pattern = %p, error = %e, "Skipping invalid {what} regex");
        None
      }
    })
    .collect()
}

/// Build a gitignore matcher for the given root directory.
fn build_gitignore(root: &Path) -> Option<Gitignore> {
  let gitignore_path = root.join(".gitignore");

  if !gitignore_path.exists() {
    debug!(root = %root.display(), "No .gitignore found");
    return None;
  }

  let mut builder = GitignoreBuilder::new(root);
  if let Some(err) = builder.add(&gitignore_path) {
    warn!(error = %err, "Error parsing .gitignore, continuing with partial rules");
  }

  match builder.build() {
    Ok(gitignore) => {
      debug!(root = %root.display(), "Gitignore matcher built");
      Some(gitignore)
    }
    Err(e) => {
      warn!(error = %e, "Failed to build gitignore matcher");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn filter_with(config: MonitorConfig) -> (TempDir, IgnoreFilter) {
    let temp = TempDir::new().unwrap();
    let filter = IgnoreFilter::new(temp.path(), &config);
    (temp, filter)
  }

  #[test]
  fn test_builtin_drops() {
    let (_temp, filter) = filter_with(MonitorConfig::default());

    assert!(filter.should_ignore(".git/HEAD"));
    assert!(filter.should_ignore("sub/node_modules/pkg/index.js"));
    assert!(filter.should_ignore("target/debug/app"));
    assert!(filter.should_ignore("src/main.rs.swp"));
    assert!(filter.should_ignore("notes.txt~"));
    assert!(filter.should_ignore(".DS_Store"));
    assert!(filter.should_ignore("docs/Thumbs.db"));

    assert!(!filter.should_ignore("src/main.rs"));
    assert!(!filter.should_ignore("README.md"));
    // Names that merely contain a builtin token are kept
    assert!(!filter.should_ignore("src/targets.rs"));
  }

  #[test]
  fn test_user_patterns_drop() {
    let (_temp, filter) = filter_with(MonitorConfig {
      ignore_patterns: vec![r"\.log$".to_string(), r"/generated/".to_string()],
      ..Default::default()
    });

    assert!(filter.should_ignore("build.log"));
    assert!(filter.should_ignore("src/generated/schema.rs"));
    assert!(!filter.should_ignore("src/schema.rs"));
  }

  #[test]
  fn test_never_ignore_overrides_everything() {
    let (_temp, filter) = filter_with(MonitorConfig {
      ignore_patterns: vec![r"\.log$".to_string()],
      never_ignore: vec![r"important\.log$".to_string(), r"/\.git/config$".to_string()],
      ..Default::default()
    });

    assert!(filter.should_ignore("build.log"));
    assert!(!filter.should_ignore("important.log"));
    // Even builtins lose to never-ignore
    assert!(!filter.should_ignore(".git/config"));
  }

  #[test]
  fn test_gitignore_patterns_apply() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join(".gitignore"), "*.tmp2\ndist/\n!keep.tmp2\n").unwrap();
    let filter = IgnoreFilter::new(temp.path(), &MonitorConfig::default());

    assert!(filter.should_ignore("scratch.tmp2"));
    assert!(filter.should_ignore_dir("dist"));
    // Negated pattern re-includes
    assert!(!filter.should_ignore("keep.tmp2"));
    assert!(!filter.should_ignore("src/lib.rs"));
  }

  #[test]
  fn test_gitignore_disabled() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join(".gitignore"), "*.tmp2\n").unwrap();
    let filter = IgnoreFilter::new(
      temp.path(),
      &MonitorConfig {
        respect_gitignore: false,
        ..Default::default()
      },
    );

    assert!(!filter.should_ignore("scratch.tmp2"));
  }

  #[test]
  fn test_invalid_user_regex_is_skipped() {
    let (_temp, filter) = filter_with(MonitorConfig {
      ignore_patterns: vec!["[unclosed".to_string(), r"\.log$".to_string()],
      ..Default::default()
    });

    // The valid pattern still applies
    assert!(filter.should_ignore("a.log"));
    assert!(!filter.should_ignore("a.txt"));
  }

  #[test]
  fn test_pure_and_deterministic() {
    let (_temp, filter) = filter_with(MonitorConfig::default());
    for _ in 0..3 {
      assert!(filter.should_ignore(".git/HEAD"));
      assert!(!filter.should_ignore("src/lib.rs"));
    }
  }
}
