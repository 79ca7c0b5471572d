//! Common test utilities for monitor integration tests.
//!
//! These tests drive real filesystem activity through a started session
//! with a short debounce and assert on the resulting change log.

use std::{path::Path, time::Duration};

use tokio::{
  sync::broadcast,
  time::{sleep, timeout},
};

use fsmon::{
  Change, ChangeKind, CreateSession, MonitorConfig, SessionEvent, SessionHandle, SessionRegistry, StartOptions,
};

#[allow(dead_code)]
pub const DEBOUNCE_MS: u64 = 50;

/// Config with a short debounce so tests settle quickly.
#[allow(dead_code)]
pub fn test_config() -> MonitorConfig {
  MonitorConfig {
    debounce_ms: DEBOUNCE_MS,
    ..Default::default()
  }
}

#[allow(dead_code)]
pub fn create_registry() -> SessionRegistry {
  SessionRegistry::with_config(test_config())
}

/// Create a session watching `root` and wait for prepopulation to finish,
/// so subsequent modifications to existing files are diffable.
#[allow(dead_code)]
pub async fn start_session(registry: &SessionRegistry, root: &Path) -> SessionHandle {
  let session = registry.create_session(CreateSession::default());

  let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
  let handle = session
    .start(
      Some(root.to_path_buf()),
      StartOptions {
        on_ready: Some(ready_tx),
        ..Default::default()
      },
    )
    .await
    .expect("start watch");
  assert!(!handle.id.is_empty());

  timeout(Duration::from_secs(5), ready_rx)
    .await
    .expect("timeout waiting for prepopulation")
    .expect("prepopulation stats");

  session
}

/// Wait for a `FileChanged` event matching `path` and `kind`.
#[allow(dead_code)]
pub async fn wait_for_change(
  events: &mut broadcast::Receiver<SessionEvent>,
  path: &str,
  kind: ChangeKind,
) -> Change {
  timeout(Duration::from_secs(5), async {
    loop {
      match events.recv().await {
        Ok(SessionEvent::FileChanged { change, .. }) if change.path == path && change.kind == kind => {
          return change;
        }
        Ok(_) => continue,
        Err(broadcast::error::RecvError::Lagged(_)) => continue,
        Err(e) => panic!("event channel closed: {e}"),
      }
    }
  })
  .await
  .unwrap_or_else(|_| panic!("timeout waiting for {kind} of {path}"))
}

/// Sleep long enough for intake and the debounce window to settle.
#[allow(dead_code)]
pub async fn settle() {
  sleep(Duration::from_millis(DEBOUNCE_MS * 8)).await;
}
