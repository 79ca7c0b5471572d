//! Shared types and configuration for fsmon.
//!
//! This crate holds the data model that the monitor engine and its
//! consumers (diff viewers, host integrations) exchange: change records,
//! checkpoints, revert results, and session statistics. It also owns the
//! configuration system and the tracing bootstrap so every crate in the
//! workspace logs the same way.

mod change;
pub mod config;
pub mod logging;

pub use change::{
  Attribution, Change, ChangeKind, ChangeMeta, Checkpoint, PrepopulateStats, RevertResult, SessionStats,
};
pub use config::MonitorConfig;
