//! Session actor: the unit of observation.
//!
//! Each session runs as a long-lived task owning its change log, content
//! cache, pending-event set, and OS watch handle. Every operation
//! (lifecycle transitions, queries, reverts) arrives through the mailbox,
//! so log appends and cache updates are serialized without locks, and a
//! debounce batch that fired earlier is fully drained before a later batch
//! (or a query) runs.
//!
//! # Lifecycle
//!
//! ```text
//!            create           start          pause
//! [nonexistent] ───→ [idle] ────→ [watching] ───→ [idle]
//!                      │             │  ↑               │
//!                      │          resume             destroy
//!                      └── destroy / stop ──→ [terminal] ┘
//! ```

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use fsmon_core::{
  Change, ChangeKind, ChangeMeta, Checkpoint, MonitorConfig, PrepopulateStats, RevertResult, SessionStats,
};

use crate::{
  cache::{CacheEntry, ContentCache},
  filter::IgnoreFilter,
  log::ChangeLog,
  prepopulate::{self, PrepopulateMsg},
  reader::{self, ReadError},
  revert,
  watch::{self, FsWatch, WatchError},
};

/// Event channel capacity per session.
const EVENT_CAPACITY: usize = 256;

// ============================================================================
// Public Types
// ============================================================================

/// Identity of one OS watch interval within a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchHandle {
  pub id: String,
  pub root: PathBuf,
}

/// Errors surfaced by session operations.
///
/// The registry flattens these to empty results per the external API; the
/// typed variants exist for callers that hold a [`SessionHandle`] directly.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
  #[error("Session has shut down")]
  Gone,

  #[error("Session is already watching {root}")]
  AlreadyWatching { root: PathBuf },

  #[error("Session is not watching")]
  NotWatching,

  #[error("Failed to establish watch: {0}")]
  WatchStart(#[from] WatchError),
}

/// Events delivered to subscribers, synchronously with the operation that
/// produced them.
#[derive(Debug, Clone)]
pub enum SessionEvent {
  Started { session_id: String, root: PathBuf },
  Stopped { session_id: String },
  Checkpoint { session_id: String, checkpoint: Checkpoint },
  FileChanged { session_id: String, change: Change },
}

/// Options for `start` / `resume`.
pub struct StartOptions {
  /// Walk the root and warm the cache (default: true).
  pub prepopulate: bool,
  /// Watch subdirectories recursively (default: true).
  pub recursive: bool,
  /// Fired once prepopulation completes; the point after which
  /// modifications to prepopulated files are diffable.
  pub on_ready: Option<oneshot::Sender<PrepopulateStats>>,
}

impl Default for StartOptions {
  fn default() -> Self {
    Self {
      prepopulate: true,
      recursive: true,
      on_ready: None,
    }
  }
}

impl std::fmt::Debug for StartOptions {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StartOptions")
      .field("prepopulate", &self.prepopulate)
      .field("recursive", &self.recursive)
      .field("on_ready", &self.on_ready.is_some())
      .finish()
  }
}

/// Options for `stop`.
///
/// With a non-empty log and no `force`, the `confirm` decision function is
/// consulted with the change count; stopping is refused when it is absent
/// or returns false. The core never couples to a specific UI.
#[derive(Default)]
pub struct StopOptions {
  pub force: bool,
  pub confirm: Option<Box<dyn FnOnce(usize) -> bool + Send>>,
}

impl StopOptions {
  pub fn force() -> Self {
    Self {
      force: true,
      confirm: None,
    }
  }
}

// ============================================================================
// Messages
// ============================================================================

/// Mailbox messages for the session actor.
pub(crate) enum SessionMessage {
  Start {
    target: Option<PathBuf>,
    opts: StartOptions,
    reply: oneshot::Sender<Result<WatchHandle, SessionError>>,
  },
  Pause {
    reply: oneshot::Sender<Result<Vec<Change>, SessionError>>,
  },
  Stop {
    opts: StopOptions,
    reply: oneshot::Sender<bool>,
  },
  Destroy {
    reply: oneshot::Sender<()>,
  },
  CreateCheckpoint {
    label: Option<String>,
    cycle: Option<u32>,
    reply: oneshot::Sender<Checkpoint>,
  },
  GetCheckpoints {
    reply: oneshot::Sender<Vec<Checkpoint>>,
  },
  GetChanges {
    reply: oneshot::Sender<Vec<Change>>,
  },
  GetChangesForFile {
    path: String,
    reply: oneshot::Sender<Vec<Change>>,
  },
  GetChangesSince {
    timestamp_ns: u64,
    reply: oneshot::Sender<Vec<Change>>,
  },
  Flush {
    reply: oneshot::Sender<Vec<Change>>,
  },
  RevertToCheckpoint {
    index: usize,
    reply: oneshot::Sender<Option<RevertResult>>,
  },
  RevertToOriginal {
    reply: oneshot::Sender<Option<RevertResult>>,
  },
  TagChanges {
    start_ns: u64,
    end_ns: u64,
    tool: String,
    filepath: Option<String>,
    reply: oneshot::Sender<usize>,
  },
  GetStats {
    reply: oneshot::Sender<SessionStats>,
  },
  Subscribe {
    reply: oneshot::Sender<broadcast::Receiver<SessionEvent>>,
  },
}

// ============================================================================
// Session Handle
// ============================================================================

/// Handle to communicate with a session actor.
///
/// Cheap to clone; all methods are thin request/reply wrappers over the
/// mailbox.
#[derive(Clone)]
pub struct SessionHandle {
  id: String,
  tx: mpsc::Sender<SessionMessage>,
}

impl SessionHandle {
  pub fn id(&self) -> &str {
    &self.id
  }

  async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> SessionMessage) -> Result<T, SessionError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    self.tx.send(build(reply_tx)).await.map_err(|_| SessionError::Gone)?;
    reply_rx.await.map_err(|_| SessionError::Gone)
  }

  /// Start watching `target` (the current directory when absent).
  pub async fn start(&self, target: Option<PathBuf>, opts: StartOptions) -> Result<WatchHandle, SessionError> {
    self.request(|reply| SessionMessage::Start { target, opts, reply }).await?
  }

  /// Halt intake, flush pending paths through the processor, and return the
  /// changes produced during this watch interval. Log and checkpoints are
  /// preserved.
  pub async fn pause(&self) -> Result<Vec<Change>, SessionError> {
    self.request(|reply| SessionMessage::Pause { reply }).await?
  }

  /// Equivalent to [`SessionHandle::start`] on a paused session.
  pub async fn resume(&self, target: Option<PathBuf>, opts: StartOptions) -> Result<WatchHandle, SessionError> {
    self.start(target, opts).await
  }

  /// Stop the session, consulting the confirmation hook when the log is
  /// non-empty. Returns whether the session actually stopped.
  pub async fn stop(&self, opts: StopOptions) -> Result<bool, SessionError> {
    self.request(|reply| SessionMessage::Stop { opts, reply }).await
  }

  /// Terminate the session unconditionally.
  pub async fn destroy(&self) -> Result<(), SessionError> {
    self.request(|reply| SessionMessage::Destroy { reply }).await
  }

  pub async fn create_checkpoint(&self, label: Option<String>, cycle: Option<u32>) -> Result<Checkpoint, SessionError> {
    self.request(|reply| SessionMessage::CreateCheckpoint { label, cycle, reply }).await
  }

  pub async fn checkpoints(&self) -> Result<Vec<Checkpoint>, SessionError> {
    self.request(|reply| SessionMessage::GetCheckpoints { reply }).await
  }

  /// Full defensive copy of the change log.
  pub async fn changes(&self) -> Result<Vec<Change>, SessionError> {
    self.request(|reply| SessionMessage::GetChanges { reply }).await
  }

  pub async fn changes_for_file(&self, path: impl Into<String>) -> Result<Vec<Change>, SessionError> {
    let path = path.into();
    self.request(|reply| SessionMessage::GetChangesForFile { path, reply }).await
  }

  /// Records strictly after a checkpoint's timestamp.
  pub async fn changes_since(&self, checkpoint: &Checkpoint) -> Result<Vec<Change>, SessionError> {
    let timestamp_ns = checkpoint.timestamp;
    self.request(|reply| SessionMessage::GetChangesSince { timestamp_ns, reply }).await
  }

  /// Force the debounce window to fire, await processing of every pending
  /// path, then snapshot the log.
  pub async fn flush_changes(&self) -> Result<Vec<Change>, SessionError> {
    self.request(|reply| SessionMessage::Flush { reply }).await
  }

  /// Revert to the state captured at the 1-based checkpoint `index`.
  pub async fn revert_to_checkpoint(&self, index: usize) -> Result<Option<RevertResult>, SessionError> {
    self.request(|reply| SessionMessage::RevertToCheckpoint { index, reply }).await
  }

  /// Revert to the original pre-session state.
  pub async fn revert_to_original(&self) -> Result<Option<RevertResult>, SessionError> {
    self.request(|reply| SessionMessage::RevertToOriginal { reply }).await
  }

  /// Attribute every change in `[start_ns, end_ns]` to `tool`. Returns the
  /// number of records tagged.
  pub async fn tag_changes(
    &self,
    start_ns: u64,
    end_ns: u64,
    tool: impl Into<String>,
    filepath: Option<String>,
  ) -> Result<usize, SessionError> {
    let tool = tool.into();
    self
      .request(|reply| SessionMessage::TagChanges {
        start_ns,
        end_ns,
        tool,
        filepath,
        reply,
      })
      .await
  }

  pub async fn stats(&self) -> Result<SessionStats, SessionError> {
    self.request(|reply| SessionMessage::GetStats { reply }).await
  }

  /// Subscribe to this session's event stream.
  pub async fn subscribe(&self) -> Result<broadcast::Receiver<SessionEvent>, SessionError> {
    self.request(|reply| SessionMessage::Subscribe { reply }).await
  }
}

// ============================================================================
// Session Actor
// ============================================================================

/// State held while a watch is active.
struct WatchState {
  handle: WatchHandle,
  fs: FsWatch,
  filter: Arc<IgnoreFilter>,
  /// Log length when this watch started; `pause` reports the suffix.
  start_len: usize,
}

pub(crate) struct SessionActor {
  id: String,
  config: MonitorConfig,
  metadata: HashMap<String, String>,
  /// Default `tool_name` for new records: the `workspace` metadata value,
  /// falling back to the watch root's directory name.
  workspace: String,
  rx: mpsc::Receiver<SessionMessage>,
  cancel: CancellationToken,
  events: broadcast::Sender<SessionEvent>,
  log: ChangeLog,
  cache: ContentCache,
  watch: Option<WatchState>,
  /// Watch root, retained across pause for reverts from the idle state.
  root: Option<PathBuf>,
  prepop_rx: Option<mpsc::Receiver<PrepopulateMsg>>,
  prepop_cancel: Option<CancellationToken>,
  on_ready: Option<oneshot::Sender<PrepopulateStats>>,
  /// Reader errors absorbed by the processor and prepopulator.
  error_count: usize,
}

impl SessionActor {
  /// Spawn a session actor and return its handle.
  pub(crate) fn spawn(
    id: String,
    metadata: HashMap<String, String>,
    config: MonitorConfig,
    cancel: CancellationToken,
  ) -> (SessionHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(64);
    let (events, _) = broadcast::channel(EVENT_CAPACITY);

    let workspace = metadata.get("workspace").cloned().unwrap_or_else(|| "workspace".to_string());
    let max_cache_bytes = config.max_cache_bytes;

    let actor = Self {
      id: id.clone(),
      config,
      metadata,
      workspace,
      rx,
      cancel,
      events,
      log: ChangeLog::new(),
      cache: ContentCache::new(max_cache_bytes),
      watch: None,
      root: None,
      prepop_rx: None,
      prepop_cancel: None,
      on_ready: None,
      error_count: 0,
    };

    let join = tokio::spawn(actor.run());
    (SessionHandle { id, tx }, join)
  }

  async fn run(mut self) {
    info!(session_id = %self.id, "Session started");

    let period = self.config.debounce().max(Duration::from_millis(10));
    let mut debounce_interval = tokio::time::interval(period);

    loop {
      tokio::select! {
        biased;

        _ = self.cancel.cancelled() => {
          debug!(session_id = %self.id, "Session cancelled");
          break;
        }

        msg = self.rx.recv() => {
          match msg {
            Some(msg) => {
              if self.handle_message(msg).await {
                break;
              }
            }
            None => break,
          }
        }

        event = next_fs_event(&mut self.watch) => {
          match event {
            Some(Ok(event)) => {
              if let Some(w) = &mut self.watch {
                w.fs.note_event(event);
              }
            }
            Some(Err(e)) => {
              warn!(session_id = %self.id, error = %e, "Watcher error");
            }
            None => {
              warn!(session_id = %self.id, "Watch event channel closed");
              self.drop_watch();
            }
          }
        }

        msg = next_prepop(&mut self.prepop_rx) => {
          self.handle_prepop(msg);
        }

        _ = debounce_interval.tick() => {
          self.flush_settled().await;
        }
      }
    }

    self.shutdown();
  }

  /// Handle one mailbox message. Returns true when the session is over.
  async fn handle_message(&mut self, msg: SessionMessage) -> bool {
    match msg {
      SessionMessage::Start { target, opts, reply } => {
        let _ = reply.send(self.handle_start(target, opts));
        false
      }
      SessionMessage::Pause { reply } => {
        let result = self.handle_pause().await;
        let _ = reply.send(result);
        false
      }
      SessionMessage::Stop { opts, reply } => {
        let stopping = if !self.log.is_empty() && !opts.force {
          opts.confirm.map(|confirm| confirm(self.log.len())).unwrap_or(false)
        } else {
          true
        };
        let _ = reply.send(stopping);
        stopping
      }
      SessionMessage::Destroy { reply } => {
        let _ = reply.send(());
        true
      }
      SessionMessage::CreateCheckpoint { label, cycle, reply } => {
        let checkpoint = self.log.create_checkpoint(label, cycle);
        debug!(session_id = %self.id, timestamp = checkpoint.timestamp, "Checkpoint created");
        let _ = self.events.send(SessionEvent::Checkpoint {
          session_id: self.id.clone(),
          checkpoint: checkpoint.clone(),
        });
        let _ = reply.send(checkpoint);
        false
      }
      SessionMessage::GetCheckpoints { reply } => {
        let _ = reply.send(self.log.checkpoints().to_vec());
        false
      }
      SessionMessage::GetChanges { reply } => {
        let _ = reply.send(self.log.snapshot());
        false
      }
      SessionMessage::GetChangesForFile { path, reply } => {
        let _ = reply.send(self.log.changes_for_file(&path));
        false
      }
      SessionMessage::GetChangesSince { timestamp_ns, reply } => {
        let _ = reply.send(self.log.changes_after_ns(timestamp_ns));
        false
      }
      SessionMessage::Flush { reply } => {
        self.flush_all().await;
        let _ = reply.send(self.log.snapshot());
        false
      }
      SessionMessage::RevertToCheckpoint { index, reply } => {
        let result = match self.root.clone() {
          Some(root) => revert::revert_to_checkpoint(&root, &mut self.log, &mut self.cache, index)
            .await
            .map(|outcome| outcome.result),
          None => None,
        };
        let _ = reply.send(result);
        false
      }
      SessionMessage::RevertToOriginal { reply } => {
        let result = match self.root.clone() {
          Some(root) => revert::revert_to_original(&root, &mut self.log, &mut self.cache)
            .await
            .map(|outcome| outcome.result),
          None => None,
        };
        let _ = reply.send(result);
        false
      }
      SessionMessage::TagChanges {
        start_ns,
        end_ns,
        tool,
        filepath,
        reply,
      } => {
        let tagged = self.log.tag_range(start_ns, end_ns, &tool, filepath.as_deref());
        let _ = reply.send(tagged);
        false
      }
      SessionMessage::GetStats { reply } => {
        let mut stats = self.log.stats();
        stats.errors = self.error_count;
        stats.active_watches = usize::from(self.watch.is_some());
        let _ = reply.send(stats);
        false
      }
      SessionMessage::Subscribe { reply } => {
        let _ = reply.send(self.events.subscribe());
        false
      }
    }
  }

  // --------------------------------------------------------------------------
  // Lifecycle
  // --------------------------------------------------------------------------

  fn handle_start(&mut self, target: Option<PathBuf>, opts: StartOptions) -> Result<WatchHandle, SessionError> {
    let root = target
      .or_else(|| self.root.clone())
      .or_else(|| std::env::current_dir().ok())
      .unwrap_or_else(|| PathBuf::from("."));
    let root = root.canonicalize().unwrap_or(root);

    // At most one active watch per session; same root is idempotent
    if let Some(w) = &self.watch {
      if w.fs.root() == root {
        return Ok(w.handle.clone());
      }
      return Err(SessionError::AlreadyWatching {
        root: w.fs.root().to_path_buf(),
      });
    }

    let filter = Arc::new(IgnoreFilter::new(&root, &self.config));
    let fs = FsWatch::new(root.clone(), opts.recursive)?;

    if !self.metadata.contains_key("workspace")
      && let Some(name) = root.file_name()
    {
      self.workspace = name.to_string_lossy().to_string();
    }

    if opts.prepopulate {
      // A walker left over from a previous watch interval is stale now
      if let Some(stale) = self.prepop_cancel.take() {
        stale.cancel();
      }
      let (tx, rx) = mpsc::channel(8);
      let prepop_cancel = self.cancel.child_token();
      tokio::spawn(prepopulate::run(
        root.clone(),
        filter.clone(),
        self.config.clone(),
        tx,
        prepop_cancel.clone(),
      ));
      self.prepop_rx = Some(rx);
      self.prepop_cancel = Some(prepop_cancel);
      self.on_ready = opts.on_ready;
    } else if let Some(on_ready) = opts.on_ready {
      let _ = on_ready.send(PrepopulateStats::default());
    }

    let handle = WatchHandle {
      id: Uuid::now_v7().to_string(),
      root: root.clone(),
    };
    self.watch = Some(WatchState {
      handle: handle.clone(),
      fs,
      filter,
      start_len: self.log.len(),
    });
    self.root = Some(root.clone());

    info!(session_id = %self.id, root = %root.display(), "Watch started");
    let _ = self.events.send(SessionEvent::Started {
      session_id: self.id.clone(),
      root,
    });

    Ok(handle)
  }

  async fn handle_pause(&mut self) -> Result<Vec<Change>, SessionError> {
    let Some(mut w) = self.watch.take() else {
      return Err(SessionError::NotWatching);
    };

    // Fold in events already delivered but not yet debounced, then flush
    // everything through the processor before intake dies
    while let Ok(event) = w.fs.event_rx.try_recv() {
      if let Ok(event) = event {
        w.fs.note_event(event);
      }
    }
    let pending = w.fs.take_all();
    let root = w.fs.root().to_path_buf();
    let filter = w.filter.clone();
    let start_len = w.start_len;
    // Dropping the watch state closes the OS subscription
    drop(w);

    self.process_batch(&root, &filter, pending).await;

    info!(session_id = %self.id, "Watch paused");
    let _ = self.events.send(SessionEvent::Stopped {
      session_id: self.id.clone(),
    });

    let changes = self.log.changes();
    Ok(changes[start_len.min(changes.len())..].to_vec())
  }

  fn drop_watch(&mut self) {
    if self.watch.take().is_some() {
      let _ = self.events.send(SessionEvent::Stopped {
        session_id: self.id.clone(),
      });
    }
  }

  fn shutdown(&mut self) {
    if let Some(prepop_cancel) = self.prepop_cancel.take() {
      prepop_cancel.cancel();
    }
    self.drop_watch();
    self.cache.clear();
    info!(session_id = %self.id, changes = self.log.len(), "Session terminated");
  }

  // --------------------------------------------------------------------------
  // Event Processing
  // --------------------------------------------------------------------------

  fn handle_prepop(&mut self, msg: Option<PrepopulateMsg>) {
    match msg {
      Some(PrepopulateMsg::Batch(entries)) => {
        for (path, entry) in entries {
          // The processor's own observations win over the walk
          if !self.cache.contains(&path) {
            self.cache.set(path, entry);
          }
        }
      }
      Some(PrepopulateMsg::Done(stats)) => {
        self.error_count += stats.errors;
        self.prepop_rx = None;
        self.prepop_cancel = None;
        if let Some(on_ready) = self.on_ready.take() {
          let _ = on_ready.send(stats);
        }
      }
      None => {
        self.prepop_rx = None;
      }
    }
  }

  /// Process paths whose debounce window has elapsed.
  async fn flush_settled(&mut self) {
    let Some(w) = &mut self.watch else { return };
    let settled = w.fs.take_settled(self.config.debounce());
    if settled.is_empty() {
      return;
    }
    let root = w.fs.root().to_path_buf();
    let filter = w.filter.clone();
    self.process_batch(&root, &filter, settled).await;
  }

  /// Force the debounce window: drain the event channel and process every
  /// pending path immediately.
  async fn flush_all(&mut self) {
    let Some(w) = &mut self.watch else { return };
    while let Ok(event) = w.fs.event_rx.try_recv() {
      if let Ok(event) = event {
        w.fs.note_event(event);
      }
    }
    let pending = w.fs.take_all();
    if pending.is_empty() {
      return;
    }
    let root = w.fs.root().to_path_buf();
    let filter = w.filter.clone();
    self.process_batch(&root, &filter, pending).await;
  }

  /// Process a debounce batch.
  ///
  /// Disappeared paths go first so that a creation in the same batch can
  /// pair with the deletion it displaced (rename inference looks backward
  /// through the log).
  async fn process_batch(&mut self, root: &Path, filter: &IgnoreFilter, paths: Vec<PathBuf>) {
    let mut missing = Vec::new();
    let mut present = Vec::new();
    for path in paths {
      match tokio::fs::symlink_metadata(&path).await {
        Ok(_) => present.push(path),
        Err(_) => missing.push(path),
      }
    }

    for path in missing {
      self.process_path(root, filter, &path).await;
    }
    for path in present {
      self.process_path(root, filter, &path).await;
    }
  }

  /// The change processor: read, diff against the cache, and append.
  async fn process_path(&mut self, root: &Path, filter: &IgnoreFilter, absolute: &Path) {
    let Some(relative) = watch::relative_path(root, absolute) else {
      return;
    };
    if filter.should_ignore(&relative) {
      trace!(path = %relative, "Ignored path");
      return;
    }

    let cached = self.cache.get(&relative);

    match reader::read_file(absolute, self.config.max_file_size).await {
      Err(ReadError::NotFound) => {
        // Deletion is inferred only for files we believed existed
        if let Some(entry) = cached {
          self.cache.remove(&relative);
          let timestamp = self.log.next_timestamp();
          if self.log.is_duplicate(&relative, ChangeKind::Deleted, timestamp) {
            trace!(path = %relative, "Suppressed duplicate deletion");
            return;
          }
          let size = entry.content.len() as u64;
          self.append_and_emit(Change {
            path: relative,
            kind: ChangeKind::Deleted,
            old_content: Some((*entry.content).clone()),
            new_content: None,
            timestamp,
            tool_name: self.workspace.clone(),
            tools: Vec::new(),
            attribution: None,
            original_tool: None,
            meta: ChangeMeta::Deleted {
              device: entry.device,
              inode: entry.inode,
              size,
            },
          });
        }
      }
      Err(e) => {
        // The file is unobservable right now; leave cache and log alone
        trace!(path = %relative, error = %e, "Read failed");
        self.error_count += 1;
      }
      Ok(read) => match cached {
        None => self.record_created(relative, read),
        Some(entry) if *entry.content == read.content => {
          trace!(path = %relative, "No-op write");
        }
        Some(entry) => {
          let timestamp = self.log.next_timestamp();
          self.cache.set(
            relative.clone(),
            CacheEntry::new(read.content.clone(), read.device, read.inode),
          );
          if self.log.is_duplicate(&relative, ChangeKind::Modified, timestamp) {
            trace!(path = %relative, "Suppressed duplicate modification");
            return;
          }
          self.append_and_emit(Change {
            path: relative,
            kind: ChangeKind::Modified,
            old_content: Some((*entry.content).clone()),
            new_content: Some(read.content),
            timestamp,
            tool_name: self.workspace.clone(),
            tools: Vec::new(),
            attribution: None,
            original_tool: None,
            meta: ChangeMeta::Modified {
              device: read.device,
              inode: read.inode,
              old_size: entry.content.len() as u64,
              new_size: read.size,
            },
          });
        }
      },
    }
  }

  /// Record a creation, first checking whether it completes a rename.
  fn record_created(&mut self, relative: String, read: reader::FileRead) {
    let timestamp = self.log.next_timestamp();

    if self.log.is_duplicate(&relative, ChangeKind::Created, timestamp) {
      trace!(path = %relative, "Suppressed duplicate creation");
      self.cache.set(relative, CacheEntry::new(read.content, read.device, read.inode));
      return;
    }

    let change = match self.log.find_rename_source(read.device, read.inode, &read.content, timestamp) {
      Some(index) => {
        // The deleted record is displaced; the rename inherits its
        // old_content and ends the old path's history
        let deleted = self.log.remove(index);
        debug!(from = %deleted.path, to = %relative, "Rename inferred");
        Change {
          path: relative.clone(),
          kind: ChangeKind::Renamed,
          old_content: deleted.old_content,
          new_content: Some(read.content.clone()),
          timestamp,
          tool_name: self.workspace.clone(),
          tools: Vec::new(),
          attribution: None,
          original_tool: None,
          meta: ChangeMeta::Renamed {
            old_path: deleted.path,
            device: read.device,
            inode: read.inode,
          },
        }
      }
      None => Change {
        path: relative.clone(),
        kind: ChangeKind::Created,
        old_content: None,
        new_content: Some(read.content.clone()),
        timestamp,
        tool_name: self.workspace.clone(),
        tools: Vec::new(),
        attribution: None,
        original_tool: None,
        meta: ChangeMeta::Created {
          device: read.device,
          inode: read.inode,
          size: read.size,
        },
      },
    };

    self.cache.set(relative, CacheEntry::new(read.content, read.device, read.inode));
    self.append_and_emit(change);
  }

  /// Append a record and notify subscribers before returning to the loop.
  fn append_and_emit(&mut self, change: Change) {
    debug!(session_id = %self.id, path = %change.path, kind = %change.kind, "Change recorded");
    self.log.push(change.clone());
    let _ = self.events.send(SessionEvent::FileChanged {
      session_id: self.id.clone(),
      change,
    });
  }
}

/// Receive the next OS event, or park forever while no watch is active.
async fn next_fs_event(watch: &mut Option<WatchState>) -> Option<Result<notify::Event, notify::Error>> {
  match watch {
    Some(w) => w.fs.event_rx.recv().await,
    None => std::future::pending().await,
  }
}

/// Receive the next prepopulation message, or park while none is running.
async fn next_prepop(rx: &mut Option<mpsc::Receiver<PrepopulateMsg>>) -> Option<PrepopulateMsg> {
  match rx {
    Some(rx) => rx.recv().await,
    None => std::future::pending().await,
  }
}
