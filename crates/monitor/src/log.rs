//! Change log and checkpoint bookkeeping.
//!
//! The log is an ordered, append-only sequence of [`Change`] records with
//! two sanctioned mutations: rename inference (a matched `deleted` record is
//! displaced by a `renamed` one) and revert (truncation). Checkpoints are
//! timestamp markers into the same monotonic clock, so partitioning the log
//! by a checkpoint's timestamp is exact.

use std::time::Instant;

use fsmon_core::{Attribution, Change, ChangeKind, Checkpoint, SessionStats};

/// Two records of the same path and kind within this window collapse to one.
const DUPLICATE_WINDOW_NS: u64 = 1_000_000_000;

/// Duplicate scanning stops once it sees a record older than this.
const DUPLICATE_SCAN_STOP_NS: u64 = 5_000_000_000;

/// A `created` record pairs with a `deleted` record at most this far back.
const RENAME_WINDOW_NS: u64 = 2_000_000_000;

/// Head and tail window compared by the content fingerprint.
const FINGERPRINT_WINDOW: usize = 1024;

/// Ordered change records plus checkpoint markers for one session.
pub struct ChangeLog {
  changes: Vec<Change>,
  checkpoints: Vec<Checkpoint>,
  epoch: Instant,
  last_ns: u64,
}

impl ChangeLog {
  pub fn new() -> Self {
    Self {
      changes: Vec::new(),
      checkpoints: Vec::new(),
      epoch: Instant::now(),
      last_ns: 0,
    }
  }

  /// Next timestamp on the session clock, strictly greater than every
  /// timestamp handed out before (clock ties are bumped).
  pub fn next_timestamp(&mut self) -> u64 {
    let now = self.epoch.elapsed().as_nanos() as u64;
    self.last_ns = if now > self.last_ns { now } else { self.last_ns + 1 };
    self.last_ns
  }

  pub fn changes(&self) -> &[Change] {
    &self.changes
  }

  /// Defensive copy of the full log.
  pub fn snapshot(&self) -> Vec<Change> {
    self.changes.clone()
  }

  pub fn checkpoints(&self) -> &[Checkpoint] {
    &self.checkpoints
  }

  pub fn len(&self) -> usize {
    self.changes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.changes.is_empty()
  }

  /// Append a record. The caller must have stamped it with
  /// [`ChangeLog::next_timestamp`].
  pub fn push(&mut self, change: Change) {
    debug_assert!(
      self.changes.last().map(|c| c.timestamp < change.timestamp).unwrap_or(true),
      "change timestamps must be strictly monotonic"
    );
    self.changes.push(change);
  }

  /// Whether a record of this path and kind landed within the duplicate
  /// window. Scanning walks the tail and stops at the first record older
  /// than the scan cutoff.
  pub fn is_duplicate(&self, path: &str, kind: ChangeKind, now_ns: u64) -> bool {
    for change in self.changes.iter().rev() {
      let age = now_ns.saturating_sub(change.timestamp);
      if age > DUPLICATE_SCAN_STOP_NS {
        break;
      }
      if change.path == path && change.kind == kind && age <= DUPLICATE_WINDOW_NS {
        return true;
      }
    }
    false
  }

  /// Find the `deleted` record a new `created` observation displaces, by
  /// inode identity first and content fingerprint second. Returns its index.
  ///
  /// Walking stops once records fall outside the rename window.
  pub fn find_rename_source(&self, device: u64, inode: u64, content: &str, now_ns: u64) -> Option<usize> {
    for (idx, change) in self.changes.iter().enumerate().rev() {
      if now_ns.saturating_sub(change.timestamp) > RENAME_WINDOW_NS {
        break;
      }
      if change.kind != ChangeKind::Deleted {
        continue;
      }

      let (dev, ino) = change.meta.device_inode();
      let inode_match = device != 0 && inode != 0 && dev == device && ino == inode;

      let fingerprint_match = || {
        change
          .old_content
          .as_deref()
          .map(|old| fingerprints_equal(old, content))
          .unwrap_or(false)
      };

      if inode_match || fingerprint_match() {
        return Some(idx);
      }
    }
    None
  }

  /// Remove the record at `index` (rename inference displacing a `deleted`).
  pub fn remove(&mut self, index: usize) -> Change {
    self.changes.remove(index)
  }

  /// Stamp a checkpoint at the current clock.
  pub fn create_checkpoint(&mut self, label: Option<String>, cycle: Option<u32>) -> Checkpoint {
    let checkpoint = Checkpoint {
      timestamp: self.next_timestamp(),
      change_count: self.changes.len(),
      label,
      cycle,
    };
    self.checkpoints.push(checkpoint.clone());
    checkpoint
  }

  /// Records strictly after a checkpoint's timestamp.
  pub fn changes_since(&self, checkpoint: &Checkpoint) -> Vec<Change> {
    self.changes_after_ns(checkpoint.timestamp)
  }

  /// Records strictly after a clock value.
  pub fn changes_after_ns(&self, ns: u64) -> Vec<Change> {
    let start = self.changes.partition_point(|c| c.timestamp <= ns);
    self.changes[start..].to_vec()
  }

  /// Records for one path, in log order.
  pub fn changes_for_file(&self, path: &str) -> Vec<Change> {
    self.changes.iter().filter(|c| c.path == path).cloned().collect()
  }

  /// Apply a tool attribution to every record with
  /// `start_ns <= timestamp <= end_ns`. Returns the number tagged.
  ///
  /// Attribution is `Confirmed` when the record's path equals the declared
  /// filepath or sits under it, or when the tool declared no path at all;
  /// otherwise `Ambiguous`. The first tagging pass preserves the record's
  /// original `tool_name`.
  pub fn tag_range(&mut self, start_ns: u64, end_ns: u64, tool: &str, filepath: Option<&str>) -> usize {
    let mut tagged = 0;
    for change in &mut self.changes {
      if change.timestamp < start_ns || change.timestamp > end_ns {
        continue;
      }

      if !change.tools.iter().any(|t| t == tool) {
        change.tools.push(tool.to_string());
      }

      change.attribution = Some(match filepath {
        None => Attribution::Confirmed,
        Some(fp) => {
          let fp = fp.trim_end_matches('/');
          if change.path == fp || change.path.starts_with(&format!("{fp}/")) {
            Attribution::Confirmed
          } else {
            Attribution::Ambiguous
          }
        }
      });

      if change.original_tool.is_none() {
        change.original_tool = Some(change.tool_name.clone());
      }

      tagged += 1;
    }
    tagged
  }

  /// Aggregate counters over the log. `errors` and `active_watches` are
  /// session-level and left zero here.
  pub fn stats(&self) -> SessionStats {
    let mut stats = SessionStats::default();
    let mut tools: Vec<String> = Vec::new();

    for change in &self.changes {
      match change.kind {
        ChangeKind::Created => stats.created += 1,
        ChangeKind::Modified => stats.modified += 1,
        ChangeKind::Deleted => stats.deleted += 1,
        ChangeKind::Renamed => stats.renamed += 1,
      }
      if !tools.contains(&change.tool_name) {
        tools.push(change.tool_name.clone());
      }
      for tool in &change.tools {
        if !tools.contains(tool) {
          tools.push(tool.clone());
        }
      }
    }

    stats.transient = self.transient_count();
    tools.sort();
    stats.tools = tools;
    stats
  }

  /// Paths created within the session whose most recent record is a
  /// deletion.
  fn transient_count(&self) -> usize {
    use std::collections::{HashMap, HashSet};

    let mut born: HashSet<&str> = HashSet::new();
    let mut last_kind: HashMap<&str, ChangeKind> = HashMap::new();

    for change in &self.changes {
      if change.kind == ChangeKind::Created {
        born.insert(change.path.as_str());
      }
      last_kind.insert(change.path.as_str(), change.kind);
    }

    born
      .iter()
      .filter(|path| last_kind.get(*path) == Some(&ChangeKind::Deleted))
      .count()
  }

  /// Replace the log and checkpoint list after a revert.
  pub fn truncate_for_revert(&mut self, keep: Vec<Change>, keep_checkpoints: usize) {
    self.changes = keep;
    self.checkpoints.truncate(keep_checkpoints);
  }
}

impl Default for ChangeLog {
  fn default() -> Self {
    Self::new()
  }
}

/// Cheap content equality: byte length plus fixed head and tail windows.
fn fingerprints_equal(a: &str, b: &str) -> bool {
  let (a, b) = (a.as_bytes(), b.as_bytes());
  if a.len() != b.len() {
    return false;
  }
  let head = a.len().min(FINGERPRINT_WINDOW);
  if a[..head] != b[..head] {
    return false;
  }
  let tail = a.len().saturating_sub(FINGERPRINT_WINDOW);
  a[tail..] == b[tail..]
}

#[cfg(test)]
mod tests {
  use super::*;
  use fsmon_core::ChangeMeta;

  fn make_change(log: &mut ChangeLog, path: &str, kind: ChangeKind) -> Change {
    let timestamp = log.next_timestamp();
    Change {
      path: path.to_string(),
      kind,
      old_content: match kind {
        ChangeKind::Created => None,
        _ => Some("old".to_string()),
      },
      new_content: match kind {
        ChangeKind::Deleted => None,
        _ => Some("new".to_string()),
      },
      timestamp,
      tool_name: "workspace".to_string(),
      tools: Vec::new(),
      attribution: None,
      original_tool: None,
      meta: ChangeMeta::Created {
        device: 0,
        inode: 0,
        size: 3,
      },
    }
  }

  #[test]
  fn test_timestamps_strictly_monotonic() {
    let mut log = ChangeLog::new();
    let mut last = 0;
    for _ in 0..1000 {
      let ts = log.next_timestamp();
      assert!(ts > last);
      last = ts;
    }
  }

  #[test]
  fn test_duplicate_detection_same_kind_only() {
    let mut log = ChangeLog::new();
    let c = make_change(&mut log, "a.txt", ChangeKind::Created);
    let now = c.timestamp + 1;
    log.push(c);

    assert!(log.is_duplicate("a.txt", ChangeKind::Created, now));
    assert!(!log.is_duplicate("a.txt", ChangeKind::Modified, now));
    assert!(!log.is_duplicate("b.txt", ChangeKind::Created, now));
  }

  #[test]
  fn test_duplicate_window_expires() {
    let mut log = ChangeLog::new();
    let c = make_change(&mut log, "a.txt", ChangeKind::Created);
    let ts = c.timestamp;
    log.push(c);

    assert!(log.is_duplicate("a.txt", ChangeKind::Created, ts + DUPLICATE_WINDOW_NS));
    assert!(!log.is_duplicate("a.txt", ChangeKind::Created, ts + DUPLICATE_WINDOW_NS + 1));
  }

  #[test]
  fn test_rename_source_by_inode() {
    let mut log = ChangeLog::new();
    let mut deleted = make_change(&mut log, "x.txt", ChangeKind::Deleted);
    deleted.meta = ChangeMeta::Deleted {
      device: 10,
      inode: 42,
      size: 1,
    };
    deleted.old_content = Some("X".to_string());
    let now = deleted.timestamp + 1;
    log.push(deleted);

    assert_eq!(log.find_rename_source(10, 42, "completely different", now), Some(0));
    assert_eq!(log.find_rename_source(10, 43, "completely different", now), None);
  }

  #[test]
  fn test_rename_source_by_fingerprint() {
    let mut log = ChangeLog::new();
    let mut deleted = make_change(&mut log, "x.txt", ChangeKind::Deleted);
    deleted.old_content = Some("same content".to_string());
    let now = deleted.timestamp + 1;
    log.push(deleted);

    // No inode info: fall back to the fingerprint
    assert_eq!(log.find_rename_source(0, 0, "same content", now), Some(0));
    assert_eq!(log.find_rename_source(0, 0, "other content", now), None);
  }

  #[test]
  fn test_rename_window_expires() {
    let mut log = ChangeLog::new();
    let mut deleted = make_change(&mut log, "x.txt", ChangeKind::Deleted);
    deleted.meta = ChangeMeta::Deleted {
      device: 1,
      inode: 2,
      size: 1,
    };
    let ts = deleted.timestamp;
    log.push(deleted);

    assert!(log.find_rename_source(1, 2, "", ts + RENAME_WINDOW_NS).is_some());
    assert!(log.find_rename_source(1, 2, "", ts + RENAME_WINDOW_NS + 1).is_none());
  }

  #[test]
  fn test_fingerprint_head_tail() {
    // Equal head and tail windows but a differing middle: the fingerprint
    // deliberately treats these as equal
    let head = "h".repeat(FINGERPRINT_WINDOW);
    let tail = "t".repeat(FINGERPRINT_WINDOW);
    let a = format!("{head}AAAA{tail}");
    let b = format!("{head}BBBB{tail}");
    assert!(fingerprints_equal(&a, &b));

    assert!(!fingerprints_equal("short", "differ"));
    assert!(!fingerprints_equal("abc", "abcd"));
    assert!(fingerprints_equal("same", "same"));
  }

  #[test]
  fn test_checkpoint_partitions_log() {
    let mut log = ChangeLog::new();
    let a = make_change(&mut log, "a.txt", ChangeKind::Created);
    log.push(a);
    let cp = log.create_checkpoint(Some("cp1".to_string()), None);
    let b = make_change(&mut log, "b.txt", ChangeKind::Created);
    log.push(b);

    assert_eq!(cp.change_count, 1);
    let since = log.changes_since(&cp);
    assert_eq!(since.len(), 1);
    assert_eq!(since[0].path, "b.txt");
  }

  #[test]
  fn test_changes_for_file() {
    let mut log = ChangeLog::new();
    let a = make_change(&mut log, "a.txt", ChangeKind::Created);
    log.push(a);
    let b = make_change(&mut log, "b.txt", ChangeKind::Created);
    log.push(b);
    let a2 = make_change(&mut log, "a.txt", ChangeKind::Modified);
    log.push(a2);

    let for_a = log.changes_for_file("a.txt");
    assert_eq!(for_a.len(), 2);
    assert_eq!(for_a[0].kind, ChangeKind::Created);
    assert_eq!(for_a[1].kind, ChangeKind::Modified);
  }

  #[test]
  fn test_tag_range_attribution() {
    let mut log = ChangeLog::new();
    let a = make_change(&mut log, "src/a.rs", ChangeKind::Created);
    log.push(a);
    let b = make_change(&mut log, "docs/b.md", ChangeKind::Created);
    let end = b.timestamp;
    log.push(b);

    let tagged = log.tag_range(0, end, "edit_tool", Some("src"));
    assert_eq!(tagged, 2);

    let changes = log.snapshot();
    assert_eq!(changes[0].attribution, Some(Attribution::Confirmed));
    assert_eq!(changes[1].attribution, Some(Attribution::Ambiguous));
    assert_eq!(changes[0].tools, vec!["edit_tool".to_string()]);
    assert_eq!(changes[0].original_tool.as_deref(), Some("workspace"));
  }

  #[test]
  fn test_tag_range_no_filepath_confirms() {
    let mut log = ChangeLog::new();
    let a = make_change(&mut log, "a.txt", ChangeKind::Created);
    let end = a.timestamp;
    log.push(a);

    log.tag_range(0, end, "shell", None);
    assert_eq!(log.changes()[0].attribution, Some(Attribution::Confirmed));
  }

  #[test]
  fn test_tag_range_idempotent_tools() {
    let mut log = ChangeLog::new();
    let a = make_change(&mut log, "a.txt", ChangeKind::Created);
    let end = a.timestamp;
    log.push(a);

    log.tag_range(0, end, "edit_tool", None);
    log.tag_range(0, end, "edit_tool", None);
    assert_eq!(log.changes()[0].tools.len(), 1);
    // original_tool is preserved from the first pass
    assert_eq!(log.changes()[0].original_tool.as_deref(), Some("workspace"));
  }

  #[test]
  fn test_stats_counts_and_transient() {
    let mut log = ChangeLog::new();
    let a = make_change(&mut log, "t.txt", ChangeKind::Created);
    log.push(a);
    let b = make_change(&mut log, "t.txt", ChangeKind::Deleted);
    log.push(b);
    let c = make_change(&mut log, "keep.txt", ChangeKind::Created);
    log.push(c);
    let d = make_change(&mut log, "pre.txt", ChangeKind::Deleted);
    log.push(d);

    let stats = log.stats();
    assert_eq!(stats.created, 2);
    assert_eq!(stats.deleted, 2);
    assert_eq!(stats.modified, 0);
    // Only t.txt was born and died in-session
    assert_eq!(stats.transient, 1);
    assert_eq!(stats.tools, vec!["workspace".to_string()]);
  }
}
