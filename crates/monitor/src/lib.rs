//! Session-based filesystem change tracking.
//!
//! fsmon watches a working directory while an external agent mutates files,
//! groups the observed creations, modifications, deletions, and renames into
//! an ordered change log with checkpoint markers, and can revert the
//! filesystem to the state captured at any checkpoint or to the original
//! pre-session state.
//!
//! # Architecture
//!
//! Each session runs as a long-lived tokio task (an actor) that owns its
//! content cache, change log, pending-event set, and OS watch handle. All
//! mutations flow through the actor's mailbox, so log appends are serialized
//! without locks. [`SessionHandle`]s are cheap clones of the mailbox sender;
//! the process-wide [`SessionRegistry`] maps session ids to handles.
//!
//! ```text
//! OS event → intake → debounce → processor → (reader → cache diff → log append) → subscribers
//! ```

mod cache;
mod filter;
mod log;
mod prepopulate;
mod reader;
mod registry;
mod revert;
mod session;
mod watch;

pub use fsmon_core::{
  Attribution, Change, ChangeKind, ChangeMeta, Checkpoint, MonitorConfig, PrepopulateStats, RevertResult,
  SessionStats,
};
pub use registry::{CreateSession, SessionRegistry};
pub use session::{SessionError, SessionEvent, SessionHandle, StartOptions, StopOptions, WatchHandle};
