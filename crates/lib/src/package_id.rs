//! Stable per-package identifiers.
//!
//! Packages are keyed on disk by a small integer rather than by name so
//! that two packages with the same leaf name in different locations
//! still get distinct scratch directories. IDs are assigned on first
//! sighting and persisted, so object files stay valid across runs.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error};

use crate::stamp::TimestampCache;
use crate::store::{self, StoreLayout};

/// The persistent `package path -> id` assignment.
///
/// The on-disk format is two lines per entry: the path, then the id.
#[derive(Debug, Default)]
pub struct PackageIdStore {
  by_path: BTreeMap<PathBuf, u64>,
  next_id: u64,
  dirty: bool,
}

impl PackageIdStore {
  /// Loads persisted IDs, pruning entries whose package directory no
  /// longer exists. A pruned package's scratch directory is deleted.
  pub fn load(layout: &StoreLayout, stamps: &mut TimestampCache) -> Self {
    let mut store = PackageIdStore::default();

    let Ok(file) = std::fs::File::open(layout.package_ids_file()) else {
      return store;
    };

    let mut lines = BufReader::new(file).lines();
    let mut max_id = 0;
    loop {
      let Some(Ok(path_line)) = lines.next() else {
        break;
      };
      let Some(Ok(id_line)) = lines.next() else {
        break;
      };
      let Ok(id) = id_line.trim().parse::<u64>() else {
        continue;
      };

      let path = PathBuf::from(path_line);
      if stamps.exists(&path) {
        max_id = max_id.max(id);
        store::ensure_dir(&layout.package_dir(id));
        store.by_path.insert(path, id);
      } else {
        debug!(path = %path.display(), id, "dropping vanished package");
        store::remove_tree(&layout.package_dir(id));
        store.dirty = true;
      }
    }
    store.next_id = max_id + 1;
    store
  }

  /// Returns the ID for a package path, assigning one on first sight.
  /// The package's scratch directory is created alongside.
  pub fn id_of(&mut self, layout: &StoreLayout, path: &Path) -> u64 {
    if let Some(&id) = self.by_path.get(path) {
      return id;
    }

    let id = self.next_id;
    self.next_id += 1;
    self.by_path.insert(path.to_path_buf(), id);
    self.dirty = true;
    store::ensure_dir(&layout.package_dir(id));
    id
  }

  /// Writes the assignment back to disk iff it changed this run.
  pub fn flush(&self, layout: &StoreLayout) {
    if !self.dirty {
      return;
    }

    let path = layout.package_ids_file();
    let mut file = match std::fs::File::create(&path) {
      Ok(file) => file,
      Err(err) => {
        error!(path = %path.display(), error = %err, "cannot write package ids, output cannot be cached");
        return;
      }
    };

    for (package_path, id) in &self.by_path {
      let record = format!("{}\n{}\n", package_path.display(), id);
      if let Err(err) = file.write_all(record.as_bytes()) {
        error!(path = %path.display(), error = %err, "short write to package ids");
        return;
      }
    }
  }
}
