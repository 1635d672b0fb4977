//! Process-scoped file timestamp cache.
//!
//! Staleness decisions compare modification times, and the same paths
//! are consulted over and over during planning. This cache reads each
//! path's mtime from the filesystem at most once per run.
//!
//! Timestamps are millisecond integers; zero means "absent" and the only
//! meaningful operation between two timestamps is ordering.
//!
//! The cache is owned by the orchestrator and never shared with workers,
//! which is what makes its unguarded interior safe.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use forge_platform::paths::normalize;

/// Cached `path -> mtime` lookups, keyed by normalized absolute path.
#[derive(Debug, Default)]
pub struct TimestampCache {
  by_path: HashMap<PathBuf, u64>,
}

fn mtime_millis(path: &Path) -> u64 {
  let Ok(meta) = std::fs::metadata(path) else {
    return 0;
  };
  let Ok(modified) = meta.modified() else {
    return 0;
  };
  match modified.duration_since(UNIX_EPOCH) {
    Ok(duration) => duration.as_millis() as u64,
    Err(_) => 0,
  }
}

fn now_millis() -> u64 {
  match SystemTime::now().duration_since(UNIX_EPOCH) {
    Ok(duration) => duration.as_millis() as u64,
    Err(_) => 0,
  }
}

impl TimestampCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns the file's timestamp, or 0 if it does not exist.
  pub fn timestamp_of(&mut self, path: &Path) -> u64 {
    let key = normalize(path);
    if let Some(&cached) = self.by_path.get(&key) {
      return cached;
    }
    let timestamp = mtime_millis(&key);
    self.by_path.insert(key, timestamp);
    timestamp
  }

  /// Whether the file exists, as far as the cache is concerned.
  pub fn exists(&mut self, path: &Path) -> bool {
    self.timestamp_of(path) != 0
  }

  /// Records a synthetic fresh timestamp without touching the
  /// filesystem. Called on artifacts a just-enqueued command will
  /// produce, so that later planning passes in the same run see them as
  /// up to date instead of re-enqueuing the work.
  pub fn set_to_now(&mut self, path: &Path) {
    self.by_path.insert(normalize(path), now_millis());
  }

  /// Drops a cached entry so the next lookup re-reads the filesystem.
  pub fn invalidate(&mut self, path: &Path) {
    self.by_path.remove(&normalize(path));
  }
}
