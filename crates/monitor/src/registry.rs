//! Process-wide session registry.
//!
//! Maps session ids to [`SessionHandle`]s using a lock-free `DashMap` and
//! spawns session actors on demand. The registry is an explicit object the
//! host owns (never a singleton); every external API operation is a method
//! here. Structural failures (unknown session, watch start failure)
//! surface as empty results; everything else is absorbed inside the
//! session per the error policy.

use std::{collections::HashMap, path::PathBuf};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use fsmon_core::{Change, Checkpoint, MonitorConfig, RevertResult, SessionStats, logging};

use crate::session::{
  SessionActor, SessionEvent, SessionHandle, StartOptions, StopOptions, WatchHandle,
};

/// Options for creating a session.
#[derive(Debug, Clone, Default)]
pub struct CreateSession {
  /// Session id; generated when absent. Ids are unique, so creating with
  /// an existing id returns the existing session.
  pub id: Option<String>,
  /// Arbitrary host metadata. The `workspace` key, when present, becomes
  /// the default `tool_name` for the session's change records.
  pub metadata: HashMap<String, String>,
}

/// Owns every live session in the process.
pub struct SessionRegistry {
  /// Active sessions, keyed by id.
  sessions: DashMap<String, SessionHandle>,

  /// Global configuration installed via [`SessionRegistry::setup`];
  /// sessions snapshot it at creation time.
  config: std::sync::RwLock<MonitorConfig>,

  /// Debug-log file writer guard; must live as long as the registry.
  log_guard: std::sync::Mutex<Option<logging::WorkerGuard>>,

  /// Parent cancellation token; each session gets a child token.
  cancel: CancellationToken,
}

impl SessionRegistry {
  pub fn new() -> Self {
    Self::with_config(MonitorConfig::default())
  }

  pub fn with_config(config: MonitorConfig) -> Self {
    Self {
      sessions: DashMap::new(),
      config: std::sync::RwLock::new(config),
      log_guard: std::sync::Mutex::new(None),
      cancel: CancellationToken::new(),
    }
  }

  /// Install global configuration. Idempotent; affects sessions created
  /// afterwards. Diagnostic logging is initialized here when the config
  /// asks for it.
  pub fn setup(&self, config: MonitorConfig) {
    if config.debug || config.debug_file.is_some() {
      let guard = logging::init(&config);
      *self.log_guard.lock().expect("log guard lock poisoned") = guard;
    }
    *self.config.write().expect("config lock poisoned") = config;
  }

  /// Snapshot of the current global configuration.
  pub fn config(&self) -> MonitorConfig {
    self.config.read().expect("config lock poisoned").clone()
  }

  // --------------------------------------------------------------------------
  // Session lifecycle
  // --------------------------------------------------------------------------

  /// Create a session (or return the existing one for a caller-supplied id).
  pub fn create_session(&self, opts: CreateSession) -> SessionHandle {
    let id = opts.id.unwrap_or_else(|| Uuid::now_v7().to_string());

    if let Some(existing) = self.sessions.get(&id) {
      debug!(session_id = %id, "Reusing existing session");
      return existing.value().clone();
    }

    let (handle, _join) = SessionActor::spawn(id.clone(), opts.metadata, self.config(), self.cancel.child_token());

    // Entry API covers the race where two tasks create the same id
    let final_handle = match self.sessions.entry(id.clone()) {
      dashmap::mapref::entry::Entry::Occupied(existing) => existing.get().clone(),
      dashmap::mapref::entry::Entry::Vacant(vacant) => {
        vacant.insert(handle.clone());
        handle
      }
    };

    info!(session_id = %id, "Session created");
    final_handle
  }

  pub fn get_session(&self, id: &str) -> Option<SessionHandle> {
    self.sessions.get(id).map(|h| h.value().clone())
  }

  pub fn get_all_sessions(&self) -> HashMap<String, SessionHandle> {
    self
      .sessions
      .iter()
      .map(|entry| (entry.key().clone(), entry.value().clone()))
      .collect()
  }

  /// Start watching `target` (current directory when absent). Returns no
  /// handle when the session is unknown or the OS watch cannot be
  /// established.
  pub async fn start(&self, id: &str, target: Option<PathBuf>, opts: StartOptions) -> Option<WatchHandle> {
    let session = self.get_session(id)?;
    session.start(target, opts).await.ok()
  }

  /// Pause a watching session, returning the changes produced during the
  /// watch interval.
  pub async fn pause(&self, id: &str) -> Option<Vec<Change>> {
    let session = self.get_session(id)?;
    session.pause().await.ok()
  }

  /// Resume a paused session; equivalent to `start`.
  pub async fn resume(&self, id: &str, target: Option<PathBuf>, opts: StartOptions) -> Option<WatchHandle> {
    self.start(id, target, opts).await
  }

  /// Stop a session, consulting the confirmation hook when the log is
  /// non-empty. Returns whether the session stopped.
  pub async fn stop(&self, id: &str, opts: StopOptions) -> bool {
    let Some(session) = self.get_session(id) else {
      return false;
    };
    let stopped = session.stop(opts).await.unwrap_or(true);
    if stopped {
      self.sessions.remove(id);
      info!(session_id = %id, "Session stopped");
    }
    stopped
  }

  /// Terminate a session unconditionally. Returns whether it existed.
  pub async fn destroy(&self, id: &str) -> bool {
    match self.sessions.remove(id) {
      Some((_, session)) => {
        let _ = session.destroy().await;
        info!(session_id = %id, "Session destroyed");
        true
      }
      None => false,
    }
  }

  /// Destroy every session, concurrently.
  pub async fn clear_all(&self) {
    let ids: Vec<String> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
    if ids.is_empty() {
      return;
    }
    info!(count = ids.len(), "Destroying all sessions");
    let futures: Vec<_> = ids.iter().map(|id| self.destroy(id)).collect();
    futures::future::join_all(futures).await;
  }

  // --------------------------------------------------------------------------
  // Checkpoints, queries, reverts
  // --------------------------------------------------------------------------

  pub async fn create_checkpoint(&self, id: &str, label: Option<String>, cycle: Option<u32>) -> Option<Checkpoint> {
    let session = self.get_session(id)?;
    session.create_checkpoint(label, cycle).await.ok()
  }

  pub async fn get_checkpoints(&self, id: &str) -> Vec<Checkpoint> {
    match self.get_session(id) {
      Some(session) => session.checkpoints().await.unwrap_or_default(),
      None => Vec::new(),
    }
  }

  pub async fn get_changes(&self, id: &str) -> Vec<Change> {
    match self.get_session(id) {
      Some(session) => session.changes().await.unwrap_or_default(),
      None => Vec::new(),
    }
  }

  pub async fn get_changes_for_file(&self, id: &str, path: &str) -> Vec<Change> {
    match self.get_session(id) {
      Some(session) => session.changes_for_file(path).await.unwrap_or_default(),
      None => Vec::new(),
    }
  }

  /// Records strictly after a checkpoint's timestamp.
  pub async fn get_changes_since(&self, id: &str, checkpoint: &Checkpoint) -> Vec<Change> {
    match self.get_session(id) {
      Some(session) => session.changes_since(checkpoint).await.unwrap_or_default(),
      None => Vec::new(),
    }
  }

  /// Force pending debounce windows to fire, await processing, and return
  /// an up-to-date snapshot.
  pub async fn flush_pending_and_get_changes(&self, id: &str) -> Option<Vec<Change>> {
    let session = self.get_session(id)?;
    session.flush_changes().await.ok()
  }

  /// Revert to the 1-based checkpoint `index`. `None` when the session is
  /// unknown, the index is out of range, or there is nothing to revert.
  pub async fn revert_to_checkpoint(&self, id: &str, index: usize) -> Option<RevertResult> {
    let session = self.get_session(id)?;
    session.revert_to_checkpoint(index).await.ok().flatten()
  }

  /// Revert to the original pre-session state.
  pub async fn revert_to_original(&self, id: &str) -> Option<RevertResult> {
    let session = self.get_session(id)?;
    session.revert_to_original().await.ok().flatten()
  }

  /// Attribute changes in `[start_ns, end_ns]` to `tool`. Returns the
  /// number of records tagged.
  pub async fn tag_changes(
    &self,
    id: &str,
    start_ns: u64,
    end_ns: u64,
    tool: &str,
    filepath: Option<String>,
  ) -> usize {
    match self.get_session(id) {
      Some(session) => session.tag_changes(start_ns, end_ns, tool, filepath).await.unwrap_or(0),
      None => 0,
    }
  }

  pub async fn get_stats(&self, id: &str) -> Option<SessionStats> {
    let session = self.get_session(id)?;
    session.stats().await.ok()
  }

  /// Subscribe to a session's event stream.
  pub async fn subscribe(&self, id: &str) -> Option<tokio::sync::broadcast::Receiver<SessionEvent>> {
    let session = self.get_session(id)?;
    session.subscribe().await.ok()
  }
}

impl Default for SessionRegistry {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_create_session_generates_unique_ids() {
    let registry = SessionRegistry::new();
    let a = registry.create_session(CreateSession::default());
    let b = registry.create_session(CreateSession::default());
    assert_ne!(a.id(), b.id());
    assert_eq!(registry.get_all_sessions().len(), 2);
  }

  #[tokio::test]
  async fn test_create_session_with_existing_id_returns_existing() {
    let registry = SessionRegistry::new();
    let opts = CreateSession {
      id: Some("fixed".to_string()),
      ..Default::default()
    };
    let a = registry.create_session(opts.clone());
    let b = registry.create_session(opts);
    assert_eq!(a.id(), b.id());
    assert_eq!(registry.get_all_sessions().len(), 1);
  }

  #[tokio::test]
  async fn test_unknown_session_yields_empty_results() {
    let registry = SessionRegistry::new();
    assert!(registry.get_session("nope").is_none());
    assert!(registry.start("nope", None, StartOptions::default()).await.is_none());
    assert!(registry.get_changes("nope").await.is_empty());
    assert!(registry.get_checkpoints("nope").await.is_empty());
    assert!(registry.get_stats("nope").await.is_none());
    assert!(!registry.destroy("nope").await);
  }

  #[tokio::test]
  async fn test_destroy_removes_session() {
    let registry = SessionRegistry::new();
    let session = registry.create_session(CreateSession {
      id: Some("s1".to_string()),
      ..Default::default()
    });
    assert!(registry.destroy(session.id()).await);
    assert!(registry.get_session("s1").is_none());
  }

  #[tokio::test]
  async fn test_clear_all() {
    let registry = SessionRegistry::new();
    for i in 0..3 {
      registry.create_session(CreateSession {
        id: Some(format!("s{i}")),
        ..Default::default()
      });
    }
    registry.clear_all().await;
    assert!(registry.get_all_sessions().is_empty());
  }

  #[tokio::test]
  async fn test_setup_replaces_config() {
    let registry = SessionRegistry::new();
    registry.setup(MonitorConfig {
      debounce_ms: 25,
      ..Default::default()
    });
    assert_eq!(registry.config().debounce_ms, 25);
  }

  #[tokio::test]
  async fn test_stop_with_empty_log_succeeds() {
    let registry = SessionRegistry::new();
    registry.create_session(CreateSession {
      id: Some("s1".to_string()),
      ..Default::default()
    });
    assert!(registry.stop("s1", StopOptions::default()).await);
    assert!(registry.get_session("s1").is_none());
  }
}
