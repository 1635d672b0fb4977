//! Package discovery.
//!
//! Packages come from two places: explicit inputs on the command line
//! (paths or names) and the configured package container directories,
//! each scanned one level deep. The catalog maps leaf names to package
//! paths; duplicate names keep whichever registration came first.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while turning raw inputs into package paths.
#[derive(Debug, Error)]
pub enum CatalogError {
  #[error("this looks like a path: {0:?} but it can't be found")]
  PathNotFound(String),

  #[error("can't find package named: {0:?}")]
  UnknownName(String),
}

/// Whether a raw input denotes a filesystem location rather than a
/// package name.
pub fn looks_like_path(input: &str) -> bool {
  !input.is_empty() && (input.starts_with('.') || input.starts_with('/') || input.contains(':'))
}

/// The name of the package at a path: the directory's leaf.
pub fn name_of(path: &Path) -> String {
  path
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_default()
}

/// All known packages, by name.
#[derive(Debug, Default)]
pub struct PackageCatalog {
  by_name: BTreeMap<String, PathBuf>,
}

impl PackageCatalog {
  /// Builds the catalog from the raw inputs and the configured package
  /// container directories. Inputs are registered first so an explicit
  /// location wins over a container scan with the same leaf name.
  pub fn discover(raw_inputs: &[String], package_directories: &[PathBuf]) -> Self {
    let mut catalog = PackageCatalog::default();

    for input in raw_inputs {
      if input.is_empty() {
        if let Ok(cwd) = std::env::current_dir() {
          catalog.register(cwd);
        }
      } else if looks_like_path(input) {
        let path = Path::new(input);
        if path.exists() {
          catalog.register(forge_platform::paths::normalize(path));
        }
      }
      // Names are resolved later, against the full catalog.
    }

    for container in package_directories {
      catalog.scan_container(container);
    }

    catalog
  }

  /// Scans one container directory, one level deep. Files and hidden
  /// entries are skipped.
  fn scan_container(&mut self, container: &Path) {
    let Ok(entries) = std::fs::read_dir(container) else {
      debug!(container = %container.display(), "package directory is not readable");
      return;
    };

    for entry in entries.flatten() {
      let path = entry.path();
      if !path.is_dir() {
        continue;
      }
      let name = name_of(&path);
      if name.is_empty() || name.starts_with('.') {
        continue;
      }
      self.register(path);
    }
  }

  fn register(&mut self, path: PathBuf) {
    let name = name_of(&path);
    if name.is_empty() {
      return;
    }
    if self.by_name.contains_key(&name) {
      // First registration wins.
      return;
    }
    debug!(package = %name, path = %path.display(), "registered package");
    self.by_name.insert(name, path);
  }

  /// The path of a package, by name.
  pub fn path_of(&self, name: &str) -> Option<&Path> {
    self.by_name.get(name).map(PathBuf::as_path)
  }

  /// Resolves one raw input to a package path.
  pub fn resolve_input(&self, input: &str) -> Result<PathBuf, CatalogError> {
    if input.is_empty() {
      return std::env::current_dir().map_err(|_| CatalogError::PathNotFound(String::from(".")));
    }
    if looks_like_path(input) {
      let path = Path::new(input);
      if !path.exists() {
        warn!(input, "input looks like a path but does not exist");
        return Err(CatalogError::PathNotFound(input.to_string()));
      }
      return Ok(forge_platform::paths::normalize(path));
    }
    self
      .path_of(input)
      .map(Path::to_path_buf)
      .ok_or_else(|| CatalogError::UnknownName(input.to_string()))
  }

  /// Iterates over every known package as `(name, path)`.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
    self.by_name.iter().map(|(name, path)| (name.as_str(), path.as_path()))
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.by_name.keys().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.by_name.len()
  }

  pub fn is_empty(&self) -> bool {
    self.by_name.is_empty()
  }
}
