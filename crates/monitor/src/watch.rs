//! OS event intake for a watched root.
//!
//! Bridges notify's sync callback onto a tokio channel (`blocking_send`
//! from notify's thread) and keeps the debounce state: a pending-paths
//! *set*, so repeated events for one path within the window collapse to a
//! single processor invocation. The kind reported by the OS is discarded;
//! the processor re-derives it by reading the file and diffing the cache.

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  time::{Duration, Instant},
};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Errors establishing an OS watch.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
  #[error("Failed to initialize watcher: {0}")]
  Init(#[source] notify::Error),

  #[error("Failed to watch path: {0}")]
  Watch(#[source] notify::Error),
}

/// One OS-level watch: the notify handle, its event channel, and the
/// debounce state.
pub struct FsWatch {
  root: PathBuf,
  // The notify watcher must be held to keep the subscription alive
  _watcher: RecommendedWatcher,
  /// Channel receiving events from notify's sync callback.
  pub event_rx: mpsc::Receiver<Result<Event, notify::Error>>,
  /// Paths awaiting a settled debounce window, keyed to their latest event.
  pending: HashMap<PathBuf, Instant>,
}

impl FsWatch {
  /// Establish an OS watch under `root`.
  pub fn new(root: PathBuf, recursive: bool) -> Result<Self, WatchError> {
    // The sync callback runs on notify's thread; blocking_send forwards
    // into the async world. A full or closed channel drops the event.
    let (event_tx, event_rx) = mpsc::channel::<Result<Event, notify::Error>>(256);

    let mut watcher = RecommendedWatcher::new(
      move |res| {
        let _ = event_tx.blocking_send(res);
      },
      Config::default(),
    )
    .map_err(WatchError::Init)?;

    let mode = if recursive {
      RecursiveMode::Recursive
    } else {
      RecursiveMode::NonRecursive
    };
    watcher.watch(&root, mode).map_err(WatchError::Watch)?;

    debug!(root = %root.display(), recursive, "OS watch established");

    Ok(Self {
      root,
      _watcher: watcher,
      event_rx,
      pending: HashMap::new(),
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Fold a notify event into the pending set.
  pub fn note_event(&mut self, event: Event) {
    match event.kind {
      EventKind::Access(_) => return,
      EventKind::Any | EventKind::Other => {
        trace!(kind = ?event.kind, "Ignoring uninformative event kind");
        return;
      }
      _ => {}
    }

    let now = Instant::now();
    for path in event.paths {
      // Directory events carry no content to diff; files that no longer
      // exist fail the is_dir probe and flow through.
      if path.is_dir() {
        trace!(path = %path.display(), "Skipping directory event");
        continue;
      }
      self.pending.insert(path, now);
    }
  }

  /// Drain the paths whose debounce window has elapsed.
  pub fn take_settled(&mut self, debounce: Duration) -> Vec<PathBuf> {
    let now = Instant::now();
    let settled: Vec<PathBuf> = self
      .pending
      .iter()
      .filter(|(_, last_event)| now.duration_since(**last_event) >= debounce)
      .map(|(path, _)| path.clone())
      .collect();

    for path in &settled {
      self.pending.remove(path);
    }
    settled
  }

  /// Drain every pending path regardless of settle time (flush, pause).
  pub fn take_all(&mut self) -> Vec<PathBuf> {
    self.pending.drain().map(|(path, _)| path).collect()
  }

  pub fn pending_len(&self) -> usize {
    self.pending.len()
  }
}

/// Normalize an absolute path to root-relative form with forward slashes.
///
/// Returns `None` for paths outside the root (stale events after a watch
/// target change, or the root itself).
pub fn relative_path(root: &Path, absolute: &Path) -> Option<String> {
  let stripped = absolute.strip_prefix(root).ok()?;
  let mut parts = Vec::new();
  for component in stripped.components() {
    match component {
      std::path::Component::Normal(part) => parts.push(part.to_string_lossy()),
      _ => return None,
    }
  }
  if parts.is_empty() {
    return None;
  }
  Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_relative_path_forward_slashes() {
    let root = Path::new("/work/project");
    assert_eq!(
      relative_path(root, Path::new("/work/project/src/lib.rs")),
      Some("src/lib.rs".to_string())
    );
    assert_eq!(relative_path(root, Path::new("/work/project/a.txt")), Some("a.txt".to_string()));
  }

  #[test]
  fn test_relative_path_outside_root() {
    let root = Path::new("/work/project");
    assert_eq!(relative_path(root, Path::new("/other/place/a.txt")), None);
    assert_eq!(relative_path(root, root), None);
  }

  #[tokio::test]
  async fn test_pending_set_collapses_duplicates() {
    let temp = tempfile::TempDir::new().unwrap();
    let mut watch = FsWatch::new(temp.path().to_path_buf(), true).expect("watch");

    let path = temp.path().join("f.txt");
    let event = Event::new(EventKind::Modify(notify::event::ModifyKind::Any)).add_path(path.clone());
    watch.note_event(event.clone());
    watch.note_event(event.clone());
    watch.note_event(event);

    assert_eq!(watch.pending_len(), 1);
    assert_eq!(watch.take_all(), vec![path]);
    assert_eq!(watch.pending_len(), 0);
  }

  #[tokio::test]
  async fn test_settle_respects_debounce() {
    let temp = tempfile::TempDir::new().unwrap();
    let mut watch = FsWatch::new(temp.path().to_path_buf(), true).expect("watch");

    let event =
      Event::new(EventKind::Create(notify::event::CreateKind::File)).add_path(temp.path().join("f.txt"));
    watch.note_event(event);

    // Window has not elapsed yet
    assert!(watch.take_settled(Duration::from_secs(60)).is_empty());
    assert_eq!(watch.pending_len(), 1);

    // Zero window settles immediately
    assert_eq!(watch.take_settled(Duration::ZERO).len(), 1);
    assert_eq!(watch.pending_len(), 0);
  }

  #[tokio::test]
  async fn test_access_events_ignored() {
    let temp = tempfile::TempDir::new().unwrap();
    let mut watch = FsWatch::new(temp.path().to_path_buf(), true).expect("watch");

    let event = Event::new(EventKind::Access(notify::event::AccessKind::Read)).add_path(temp.path().join("f.txt"));
    watch.note_event(event);
    assert_eq!(watch.pending_len(), 0);
  }
}
