//! Initial cache load performed when a watch starts.
//!
//! Walks the root breadth-first, bounded by directory depth and a total
//! file ceiling, reading each tracked regular file and streaming cache
//! entries back to the session actor in batches. The walk runs as its own
//! task so directory iteration never holds up event intake; the final
//! `Done` message is the synchronization point callers wait on before
//! relying on modifications being diffable.

use std::{collections::VecDeque, path::PathBuf, sync::Arc, time::Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use fsmon_core::{MonitorConfig, PrepopulateStats};

use crate::{
  cache::CacheEntry,
  filter::IgnoreFilter,
  reader::{self, ReadError},
  watch::relative_path,
};

/// Cache entries per batch message back to the session actor.
const BATCH_SIZE: usize = 64;

/// Messages streamed to the session actor during prepopulation.
#[derive(Debug)]
pub enum PrepopulateMsg {
  /// A batch of successfully read files.
  Batch(Vec<(String, CacheEntry)>),
  /// The walk finished (or was cancelled); stats cover everything read.
  Done(PrepopulateStats),
}

/// Walk `root` and stream cache entries to `tx`.
///
/// Stops early when cancelled or when the session actor goes away. Always
/// attempts to send a final [`PrepopulateMsg::Done`].
pub async fn run(
  root: PathBuf,
  filter: Arc<IgnoreFilter>,
  config: MonitorConfig,
  tx: mpsc::Sender<PrepopulateMsg>,
  cancel: CancellationToken,
) {
  let started = Instant::now();
  let mut stats = PrepopulateStats::default();
  let mut batch: Vec<(String, CacheEntry)> = Vec::new();

  let mut queue: VecDeque<(PathBuf, usize)> = VecDeque::new();
  queue.push_back((root.clone(), 0));

  'walk: while let Some((dir, depth)) = queue.pop_front() {
    if cancel.is_cancelled() {
      debug!(root = %root.display(), "Prepopulation cancelled");
      break;
    }

    let mut entries = match tokio::fs::read_dir(&dir).await {
      Ok(entries) => entries,
      Err(e) => {
        warn!(dir = %dir.display(), error = %e, "Failed to read directory, skipping");
        stats.errors += 1;
        continue;
      }
    };
    stats.directories_scanned += 1;

    loop {
      let entry = match entries.next_entry().await {
        Ok(Some(entry)) => entry,
        Ok(None) => break,
        Err(e) => {
          warn!(dir = %dir.display(), error = %e, "Directory iteration error");
          stats.errors += 1;
          break;
        }
      };

      let path = entry.path();
      let Some(relative) = relative_path(&root, &path) else {
        continue;
      };

      let file_type = match entry.file_type().await {
        Ok(ft) => ft,
        Err(_) => continue,
      };

      if file_type.is_dir() {
        // Descend only real directories (symlinked ones could cycle)
        if depth < config.max_depth && !filter.should_ignore_dir(&relative) {
          queue.push_back((path, depth + 1));
        }
        continue;
      }

      if filter.should_ignore(&relative) {
        trace!(path = %relative, "Prepopulation skipping ignored file");
        continue;
      }

      if stats.files_scanned >= config.max_prepopulate_files {
        debug!(
          limit = config.max_prepopulate_files,
          "Prepopulation file ceiling reached, stopping walk"
        );
        break 'walk;
      }
      stats.files_scanned += 1;

      match reader::read_file(&path, config.max_file_size).await {
        Ok(read) => {
          stats.files_cached += 1;
          stats.bytes_cached += read.content.len();
          batch.push((relative, CacheEntry::new(read.content, read.device, read.inode)));
          if batch.len() >= BATCH_SIZE && tx.send(PrepopulateMsg::Batch(std::mem::take(&mut batch))).await.is_err() {
            // Session actor is gone
            return;
          }
        }
        // A file that vanished mid-walk is not an error
        Err(ReadError::NotFound) => {}
        Err(e) => {
          trace!(path = %relative, error = %e, "Prepopulation read failed");
          stats.errors += 1;
        }
      }
    }
  }

  if !batch.is_empty() && tx.send(PrepopulateMsg::Batch(batch)).await.is_err() {
    return;
  }

  stats.elapsed_ms = started.elapsed().as_millis() as u64;
  debug!(
    files_scanned = stats.files_scanned,
    files_cached = stats.files_cached,
    bytes = stats.bytes_cached,
    dirs = stats.directories_scanned,
    errors = stats.errors,
    elapsed_ms = stats.elapsed_ms,
    "Prepopulation complete"
  );
  let _ = tx.send(PrepopulateMsg::Done(stats)).await;
}
