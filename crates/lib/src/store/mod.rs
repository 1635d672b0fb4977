//! On-disk layout of forge's persisted state.
//!
//! Everything forge writes lives under one scratch root:
//!
//! ```text
//! <root>/<opt-level>/package_ids          stable path -> id records
//! <root>/<opt-level>/<id>/dependencies    artifact -> inputs records
//! <root>/<opt-level>/<id>/objects/...     intermediate objects
//! <root>/<opt-level>/dynamic_libraries/   lib<name>.so outputs
//! <root>/<opt-level>/static_libraries/    static archives
//! <root>/<opt-level>/deps<worker>         per-worker compiler dep files
//! <root>/repositories/                    cached third-party checkouts
//! ```
//!
//! The root is the system temp directory, or `./.build` when a local
//! config file puts the working directory into an isolated universe.

use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::invocation::OptLevel;

/// Subdirectory of the system temp directory used outside isolated mode.
const LOCAL_ROOT: &str = ".build";
const DYNAMIC_LIBRARIES_DIR: &str = "dynamic_libraries";
const STATIC_LIBRARIES_DIR: &str = "static_libraries";
const REPOSITORIES_DIR: &str = "repositories";
const OBJECTS_DIR: &str = "objects";
const PACKAGE_IDS_FILE: &str = "package_ids";
const DEPENDENCIES_FILE: &str = "dependencies";
const WORKER_DEPS_PREFIX: &str = "deps";

/// Resolved locations of forge's scratch state for one invocation.
#[derive(Debug, Clone)]
pub struct StoreLayout {
  root: PathBuf,
  temp_dir: PathBuf,
}

impl StoreLayout {
  /// Chooses the layout for this run and creates the scratch directory.
  pub fn detect(opt_level: OptLevel, isolated: bool) -> Self {
    let root = if isolated {
      PathBuf::from(LOCAL_ROOT)
    } else {
      forge_platform::paths::system_temp_root()
    };
    let temp_dir = root.join(opt_level.as_str());
    ensure_dir(&temp_dir);
    StoreLayout { root, temp_dir }
  }

  /// The scratch directory for the current optimization level.
  pub fn temp_dir(&self) -> &Path {
    &self.temp_dir
  }

  pub fn package_ids_file(&self) -> PathBuf {
    self.temp_dir.join(PACKAGE_IDS_FILE)
  }

  /// The scratch directory of one package.
  pub fn package_dir(&self, id: u64) -> PathBuf {
    self.temp_dir.join(id.to_string())
  }

  pub fn dependencies_file(&self, id: u64) -> PathBuf {
    self.package_dir(id).join(DEPENDENCIES_FILE)
  }

  pub fn objects_dir(&self, id: u64) -> PathBuf {
    self.package_dir(id).join(OBJECTS_DIR)
  }

  pub fn dynamic_libraries_dir(&self) -> PathBuf {
    self.temp_dir.join(DYNAMIC_LIBRARIES_DIR)
  }

  pub fn static_libraries_dir(&self) -> PathBuf {
    self.temp_dir.join(STATIC_LIBRARIES_DIR)
  }

  /// The compiler dependency scratch file owned by one worker.
  pub fn worker_deps_file(&self, worker: usize) -> PathBuf {
    self.temp_dir.join(format!("{WORKER_DEPS_PREFIX}{worker}"))
  }

  /// Cached third-party checkouts, shared across optimization levels.
  pub fn repositories_dir(&self) -> PathBuf {
    self.root.join(REPOSITORIES_DIR)
  }

  /// Deletes the current configuration's scratch tree.
  pub fn clean_current(&self) {
    remove_tree(&self.temp_dir);
  }

  /// Deletes the whole scratch root, cached repositories included.
  pub fn clean_all(&self) {
    remove_tree(&self.root);
  }
}

/// Creates a directory and its parents, reporting (but not propagating)
/// failure. A missing scratch directory degrades caching, not the build.
pub fn ensure_dir(path: &Path) {
  if let Err(err) = std::fs::create_dir_all(path) {
    error!(path = %path.display(), error = %err, "cannot create directory");
  }
}

/// Deletes a directory tree if it exists.
pub fn remove_tree(path: &Path) {
  if !path.exists() {
    return;
  }
  if let Err(err) = std::fs::remove_dir_all(path) {
    warn!(path = %path.display(), error = %err, "cannot delete directory");
  }
}
