//! Revert engine: apply stored `old_content` back to disk and truncate the
//! log.
//!
//! For a linear per-file history, the earliest post-target change captures
//! the target-time state in its `old_content`; later changes for the same
//! path are overwrites and never need replaying. The engine therefore
//! builds one restore action per file from the first change after the
//! target, applies them all (failures do not abort the batch), then
//! truncates the log and checkpoint list and rebuilds the cache.

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
};

use tracing::{debug, warn};

use fsmon_core::{Change, ChangeKind, RevertResult};

use crate::{
  cache::{CacheEntry, ContentCache},
  log::ChangeLog,
};

/// Suffix for write-then-rename restores.
const TMP_SUFFIX: &str = ".fsmon.tmp";

/// A revert plus the paths whose on-disk state it touched (for host
/// buffer-refresh integration).
#[derive(Debug)]
pub struct RevertOutcome {
  pub result: RevertResult,
  pub touched: Vec<String>,
}

/// Per-file restore action derived from the first post-target change.
#[derive(Debug)]
enum RestoreAction {
  /// The file did not exist at target time.
  Delete,
  /// The file existed with this content at target time.
  Write { content: String },
  /// The file lived at `original` with this content; the current path must
  /// go away.
  RenameBack { original: String, content: String },
}

/// Revert to the state captured at a checkpoint.
///
/// `index` is 1-based. Reverting to the final checkpoint, or with nothing
/// after the target, is a no-op returning `None`.
pub async fn revert_to_checkpoint(
  root: &Path,
  log: &mut ChangeLog,
  cache: &mut ContentCache,
  index: usize,
) -> Option<RevertOutcome> {
  let checkpoints = log.checkpoints();
  if index < 1 || index >= checkpoints.len() {
    return None;
  }
  let target = checkpoints[index - 1].timestamp;
  revert_to_target(root, log, cache, Some(target), index, false).await
}

/// Revert to the original pre-session state: empty log, empty checkpoints.
pub async fn revert_to_original(root: &Path, log: &mut ChangeLog, cache: &mut ContentCache) -> Option<RevertOutcome> {
  revert_to_target(root, log, cache, None, 0, true).await
}

async fn revert_to_target(
  root: &Path,
  log: &mut ChangeLog,
  cache: &mut ContentCache,
  target_ns: Option<u64>,
  keep_checkpoints: usize,
  is_full_revert: bool,
) -> Option<RevertOutcome> {
  // Partition the log at the target timestamp
  let (keep, revert): (Vec<Change>, Vec<Change>) = log
    .snapshot()
    .into_iter()
    .partition(|c| target_ns.map(|t| c.timestamp <= t).unwrap_or(false));

  if revert.is_empty() {
    return None;
  }

  // Earliest post-target change per path determines the restore action;
  // later changes for the same path are implied.
  let mut actions: Vec<(String, RestoreAction)> = Vec::new();
  let mut records_per_path: HashMap<String, usize> = HashMap::new();

  for change in &revert {
    *records_per_path.entry(change.path.clone()).or_insert(0) += 1;

    if actions.iter().any(|(p, _)| p == &change.path) {
      continue;
    }

    let action = match change.kind {
      ChangeKind::Created => RestoreAction::Delete,
      ChangeKind::Modified | ChangeKind::Deleted => RestoreAction::Write {
        content: change.old_content.clone().unwrap_or_default(),
      },
      ChangeKind::Renamed => RestoreAction::RenameBack {
        original: change.meta.old_path().unwrap_or(&change.path).to_string(),
        content: change.old_content.clone().unwrap_or_default(),
      },
    };
    actions.push((change.path.clone(), action));
  }

  let mut reverted_count = 0;
  let mut error_count = 0;
  let mut touched: Vec<String> = Vec::new();
  let mut removed_files: Vec<String> = Vec::new();

  for (path, action) in &actions {
    match apply_action(root, path, action).await {
      Ok(()) => {
        reverted_count += records_per_path.get(path).copied().unwrap_or(1);
        match action {
          RestoreAction::Delete => {
            cache.remove(path);
            removed_files.push(path.clone());
            touched.push(path.clone());
          }
          RestoreAction::Write { content } => {
            refresh_cache_entry(root, cache, path, content).await;
            touched.push(path.clone());
          }
          RestoreAction::RenameBack { original, content } => {
            cache.remove(path);
            removed_files.push(path.clone());
            refresh_cache_entry(root, cache, original, content).await;
            touched.push(path.clone());
            touched.push(original.clone());
          }
        }
      }
      Err(e) => {
        warn!(path = %path, error = %e, "Revert action failed");
        error_count += 1;
      }
    }
  }

  // Try to remove now-empty ancestor directories of deleted files
  for path in &removed_files {
    cleanup_empty_ancestors(root, path).await;
  }

  // Truncate the log and drop cache entries for paths with no surviving
  // history
  log.truncate_for_revert(keep.clone(), keep_checkpoints);
  let keep_paths: std::collections::HashSet<&str> = keep.iter().map(|c| c.path.as_str()).collect();
  cache.retain(|p| keep_paths.contains(p) || touched.iter().any(|t| t.as_str() == p));
  for path in &removed_files {
    cache.remove(path);
  }

  let new_checkpoints = log.checkpoints().to_vec();
  debug!(
    reverted = reverted_count,
    errors = error_count,
    remaining = keep.len(),
    full = is_full_revert,
    "Revert applied"
  );

  Some(RevertOutcome {
    result: RevertResult {
      new_changes: keep,
      new_checkpoints,
      reverted_count,
      error_count,
      is_full_revert,
    },
    touched,
  })
}

/// Apply one restore action. All-or-nothing at single-file granularity.
async fn apply_action(root: &Path, path: &str, action: &RestoreAction) -> std::io::Result<()> {
  match action {
    RestoreAction::Delete => remove_if_present(&root.join(path)).await,
    RestoreAction::Write { content } => write_restored(&root.join(path), content).await,
    RestoreAction::RenameBack { original, content } => {
      write_restored(&root.join(original), content).await?;
      remove_if_present(&root.join(path)).await
    }
  }
}

/// Delete a file, treating an already-missing file as success.
async fn remove_if_present(absolute: &Path) -> std::io::Result<()> {
  match tokio::fs::remove_file(absolute).await {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e),
  }
}

/// Write restored content via a temp file and rename.
async fn write_restored(absolute: &Path, content: &str) -> std::io::Result<()> {
  if let Some(parent) = absolute.parent() {
    tokio::fs::create_dir_all(parent).await?;
  }

  let mut tmp = absolute.as_os_str().to_owned();
  tmp.push(TMP_SUFFIX);
  let tmp = PathBuf::from(tmp);

  tokio::fs::write(&tmp, content).await?;
  if let Err(e) = tokio::fs::rename(&tmp, absolute).await {
    let _ = tokio::fs::remove_file(&tmp).await;
    return Err(e);
  }
  Ok(())
}

/// Refresh the cache's belief about a restored file, re-statting for the
/// new inode identity.
async fn refresh_cache_entry(root: &Path, cache: &mut ContentCache, path: &str, content: &str) {
  let (device, inode) = match tokio::fs::metadata(root.join(path)).await {
    Ok(metadata) => stat_identity(&metadata),
    Err(_) => (0, 0),
  };
  cache.set(path, CacheEntry::new(content, device, inode));
}

#[cfg(unix)]
fn stat_identity(metadata: &std::fs::Metadata) -> (u64, u64) {
  use std::os::unix::fs::MetadataExt;
  (metadata.dev(), metadata.ino())
}

#[cfg(not(unix))]
fn stat_identity(_metadata: &std::fs::Metadata) -> (u64, u64) {
  (0, 0)
}

/// Remove now-empty ancestor directories of a deleted file, stopping at the
/// session root. Non-empty directories end the ascent.
async fn cleanup_empty_ancestors(root: &Path, path: &str) {
  let mut current = match root.join(path).parent().map(Path::to_path_buf) {
    Some(p) => p,
    None => return,
  };

  while current != root && current.starts_with(root) {
    match tokio::fs::remove_dir(&current).await {
      Ok(()) => {}
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      // Not empty (or not removable): the ancestor chain ends here
      Err(_) => break,
    }
    match current.parent() {
      Some(parent) => current = parent.to_path_buf(),
      None => break,
    }
  }
}
