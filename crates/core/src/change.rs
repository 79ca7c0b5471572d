//! Change records, checkpoints, and revert results.
//!
//! A [`Change`] is one observed transition of one file. The monitor appends
//! them to a per-session log in strictly monotonic timestamp order; viewers
//! and the revert engine consume them as values (paths by value, never by
//! pointer, so the log can be snapshotted defensively).

use serde::{Deserialize, Serialize};

// ============================================================================
// Change Kinds
// ============================================================================

/// What happened to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
  Created,
  Modified,
  Deleted,
  Renamed,
}

impl std::fmt::Display for ChangeKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      ChangeKind::Created => "created",
      ChangeKind::Modified => "modified",
      ChangeKind::Deleted => "deleted",
      ChangeKind::Renamed => "renamed",
    };
    f.write_str(s)
  }
}

// ============================================================================
// Per-Kind Metadata
// ============================================================================

/// Metadata carried by a change record, tagged per kind.
///
/// The `(device, inode)` pair is what rename inference matches on; it is
/// `(0, 0)` on platforms where stat does not expose it, in which case the
/// content fingerprint carries inference alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChangeMeta {
  Created {
    device: u64,
    inode: u64,
    size: u64,
  },
  Modified {
    device: u64,
    inode: u64,
    old_size: u64,
    new_size: u64,
  },
  Deleted {
    device: u64,
    inode: u64,
    size: u64,
  },
  Renamed {
    /// The path this file lived at before the rename (root-relative).
    old_path: String,
    device: u64,
    inode: u64,
  },
}

impl ChangeMeta {
  /// The `(device, inode)` pair recorded with this change.
  pub fn device_inode(&self) -> (u64, u64) {
    match *self {
      ChangeMeta::Created { device, inode, .. }
      | ChangeMeta::Modified { device, inode, .. }
      | ChangeMeta::Deleted { device, inode, .. }
      | ChangeMeta::Renamed { device, inode, .. } => (device, inode),
    }
  }

  /// The pre-rename path, for `Renamed` records only.
  pub fn old_path(&self) -> Option<&str> {
    match self {
      ChangeMeta::Renamed { old_path, .. } => Some(old_path),
      _ => None,
    }
  }
}

// ============================================================================
// Attribution
// ============================================================================

/// How confident tagging is that the named tool actually produced a change.
///
/// `Confirmed` means the tool declared the path it touched (or declared no
/// path at all); `Ambiguous` means the change fell inside the tool's time
/// range but on a path the tool never claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Attribution {
  Confirmed,
  Ambiguous,
}

// ============================================================================
// Change Record
// ============================================================================

/// One observed transition of one file.
///
/// Paths are root-relative with forward-slash separators. For renames,
/// `path` is the new location and `meta` carries the old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
  /// Root-relative path (the new path for renames).
  pub path: String,
  pub kind: ChangeKind,
  /// Content before the change; absent for `Created`.
  pub old_content: Option<String>,
  /// Content after the change; absent for `Deleted`.
  pub new_content: Option<String>,
  /// Monotonic nanoseconds since the session epoch, strictly increasing
  /// across all records in a session.
  pub timestamp: u64,
  /// The logical origin of the change (defaults to the session's workspace
  /// label).
  pub tool_name: String,
  /// Additional attributions applied by range tagging.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub tools: Vec<String>,
  /// Set by the first tagging pass that touches this record.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub attribution: Option<Attribution>,
  /// The original `tool_name`, preserved by the first tagging pass.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub original_tool: Option<String>,
  pub meta: ChangeMeta,
}

impl Change {
  /// Byte length of `new_content`, if any.
  pub fn new_size(&self) -> Option<usize> {
    self.new_content.as_ref().map(String::len)
  }

  /// Byte length of `old_content`, if any.
  pub fn old_size(&self) -> Option<usize> {
    self.old_content.as_ref().map(String::len)
  }
}

// ============================================================================
// Checkpoints
// ============================================================================

/// A timestamp marker delimiting a turn or batch of work.
///
/// `timestamp` is the authoritative boundary for filtering and revert;
/// `change_count` is informational (the log length when the checkpoint was
/// stamped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
  /// Monotonic nanoseconds since the session epoch.
  pub timestamp: u64,
  /// Log length at stamp time.
  pub change_count: usize,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub label: Option<String>,
  /// Agent turn cycle, when the host tracks one.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cycle: Option<u32>,
}

// ============================================================================
// Revert Results
// ============================================================================

/// Outcome of reverting a session to a checkpoint or to its original state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevertResult {
  /// The log after truncation (records at or before the target).
  pub new_changes: Vec<Change>,
  /// The checkpoint list after truncation.
  pub new_checkpoints: Vec<Checkpoint>,
  /// Number of change records whose effect was undone.
  pub reverted_count: usize,
  /// Number of per-file restore actions that failed. Failures do not abort
  /// the batch.
  pub error_count: usize,
  /// True for revert-to-original, false for checkpoint reverts.
  pub is_full_revert: bool,
}

// ============================================================================
// Statistics
// ============================================================================

/// Aggregate counters over a session's change log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
  pub created: usize,
  pub modified: usize,
  pub deleted: usize,
  pub renamed: usize,
  /// Paths that were created and later deleted within the session.
  /// Derived from the log, never stored on records.
  pub transient: usize,
  /// Reader errors absorbed by the processor and prepopulator.
  pub errors: usize,
  /// Distinct tool names seen across the log, sorted.
  pub tools: Vec<String>,
  /// Active OS watches (0 or 1 per session).
  pub active_watches: usize,
}

/// Summary of the initial cache load performed when a watch starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepopulateStats {
  pub files_scanned: usize,
  pub files_cached: usize,
  pub bytes_cached: usize,
  pub errors: usize,
  pub directories_scanned: usize,
  pub elapsed_ms: u64,
}
