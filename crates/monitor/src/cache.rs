//! LRU content cache backing the change processor.
//!
//! Maps root-relative paths to the content the monitor last observed on
//! disk, with byte-size accounting. Cache presence is the monitor's belief
//! that the file currently exists; absence means "does not exist as far as
//! we know". Eviction is strict LRU by access order and purely size-driven.

use std::{collections::HashMap, sync::Arc};

use tracing::trace;

/// A cached observation of one file.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub content: Arc<String>,
  /// Stat identity at observation time, for rename inference.
  pub device: u64,
  pub inode: u64,
}

impl CacheEntry {
  pub fn new(content: impl Into<String>, device: u64, inode: u64) -> Self {
    Self {
      content: Arc::new(content.into()),
      device,
      inode,
    }
  }
}

/// Byte-bounded LRU cache of file contents.
///
/// `set` on an existing key updates it in place at MRU. Values larger than
/// the ceiling are rejected silently; the file is then effectively
/// unobserved and will be diffed from empty on its next event.
pub struct ContentCache {
  /// relative path -> (entry, last access tick)
  entries: HashMap<String, (CacheEntry, u64)>,
  total_bytes: usize,
  max_bytes: usize,
  tick: u64,
}

impl ContentCache {
  pub fn new(max_bytes: usize) -> Self {
    Self {
      entries: HashMap::new(),
      total_bytes: 0,
      max_bytes,
      tick: 0,
    }
  }

  /// Get the cached entry for a path, promoting it to MRU.
  pub fn get(&mut self, path: &str) -> Option<CacheEntry> {
    self.tick += 1;
    let tick = self.tick;
    if let Some((entry, last_access)) = self.entries.get_mut(path) {
      *last_access = tick;
      Some(entry.clone())
    } else {
      None
    }
  }

  /// Whether a path is currently cached (no MRU promotion).
  pub fn contains(&self, path: &str) -> bool {
    self.entries.contains_key(path)
  }

  /// Cache an observation, evicting LRU entries until the byte total fits.
  pub fn set(&mut self, path: impl Into<String>, entry: CacheEntry) {
    let path = path.into();
    let len = entry.content.len();

    // Oversize values are dropped without error
    if len > self.max_bytes {
      trace!(path = %path, size = len, max = self.max_bytes, "Value too large to cache");
      return;
    }

    if let Some((old, _)) = self.entries.remove(&path) {
      self.total_bytes -= old.content.len();
    }

    // Evict oldest entries until the new value fits
    while self.total_bytes + len > self.max_bytes {
      if let Some(oldest_key) = self
        .entries
        .iter()
        .min_by_key(|(_, (_, last_access))| *last_access)
        .map(|(k, _)| k.clone())
      {
        if let Some((evicted, _)) = self.entries.remove(&oldest_key) {
          self.total_bytes -= evicted.content.len();
          trace!(path = %oldest_key, "Evicted LRU cache entry");
        }
      } else {
        break;
      }
    }

    self.tick += 1;
    self.total_bytes += len;
    self.entries.insert(path, (entry, self.tick));
  }

  /// Remove a path from the cache.
  pub fn remove(&mut self, path: &str) -> Option<CacheEntry> {
    self.entries.remove(path).map(|(entry, _)| {
      self.total_bytes -= entry.content.len();
      entry
    })
  }

  /// Drop every entry.
  pub fn clear(&mut self) {
    self.entries.clear();
    self.total_bytes = 0;
  }

  /// Keep only entries whose path satisfies the predicate.
  pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
    let mut removed = 0usize;
    self.entries.retain(|path, (entry, _)| {
      if keep(path) {
        true
      } else {
        removed += entry.content.len();
        false
      }
    });
    self.total_bytes -= removed;
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Total byte size of all cached values.
  pub fn total_bytes(&self) -> usize {
    self.total_bytes
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(content: &str) -> CacheEntry {
    CacheEntry::new(content, 0, 0)
  }

  #[test]
  fn test_set_and_get() {
    let mut cache = ContentCache::new(1024);

    cache.set("a.txt", entry("content a"));
    cache.set("b.txt", entry("content b"));

    assert_eq!(cache.get("a.txt").map(|e| e.content.to_string()), Some("content a".to_string()));
    assert_eq!(cache.get("b.txt").map(|e| e.content.to_string()), Some("content b".to_string()));
    assert!(cache.get("c.txt").is_none());
    assert_eq!(cache.total_bytes(), 18);
  }

  #[test]
  fn test_byte_eviction_is_lru() {
    // Room for two 4-byte values at a time
    let mut cache = ContentCache::new(8);
    cache.set("a", entry("aaaa"));
    cache.set("b", entry("bbbb"));

    // Touch /a so /b becomes the LRU entry
    assert!(cache.get("a").is_some());

    cache.set("c", entry("cccc"));
    assert!(cache.contains("a"));
    assert!(!cache.contains("b"));
    assert!(cache.contains("c"));
    assert_eq!(cache.total_bytes(), 8);
  }

  #[test]
  fn test_update_in_place_adjusts_bytes() {
    let mut cache = ContentCache::new(100);
    cache.set("a", entry("aaaaaaaaaa")); // 10 bytes
    cache.set("a", entry("aa")); // 2 bytes
    assert_eq!(cache.total_bytes(), 2);
    assert_eq!(cache.len(), 1);
  }

  #[test]
  fn test_oversize_value_rejected_silently() {
    let mut cache = ContentCache::new(10);
    cache.set("small", entry("small"));
    cache.set("large", entry(&"x".repeat(20)));
    assert!(cache.get("large").is_none());
    // Existing entries are untouched by the rejected set
    assert!(cache.get("small").is_some());
  }

  #[test]
  fn test_update_keeps_key_at_mru() {
    let mut cache = ContentCache::new(8);
    cache.set("a", entry("aaaa"));
    cache.set("b", entry("bbbb"));
    // Re-set /a: now /b is oldest
    cache.set("a", entry("AAAA"));
    cache.set("c", entry("cccc"));
    assert!(cache.contains("a"));
    assert!(!cache.contains("b"));
  }

  #[test]
  fn test_remove_and_clear() {
    let mut cache = ContentCache::new(100);
    cache.set("a", entry("aaa"));
    cache.set("b", entry("bbb"));

    let removed = cache.remove("a");
    assert_eq!(removed.map(|e| e.content.to_string()), Some("aaa".to_string()));
    assert_eq!(cache.total_bytes(), 3);

    cache.clear();
    assert!(cache.is_empty());
    assert_eq!(cache.total_bytes(), 0);
  }

  #[test]
  fn test_retain() {
    let mut cache = ContentCache::new(100);
    cache.set("keep.txt", entry("aaa"));
    cache.set("drop.txt", entry("bbbb"));

    cache.retain(|p| p.starts_with("keep"));
    assert!(cache.contains("keep.txt"));
    assert!(!cache.contains("drop.txt"));
    assert_eq!(cache.total_bytes(), 3);
  }
}
