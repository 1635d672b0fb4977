//! The per-invocation build context.
//!
//! One `BuildContext` owns every table the subsystems share: the package
//! catalog, the metadata map, the placeholder table, the rebuild oracle,
//! the timestamp cache, and the ID store. It is created once per
//! invocation and threaded through explicitly; nothing in this workspace
//! is process-global, which is also what lets the test suites build a
//! fresh context per case.

use std::collections::HashMap;

use tracing::debug;

use crate::catalog::{CatalogError, PackageCatalog, name_of};
use crate::config::{self, ConfigError, ConfigLoader};
use crate::invocation::Invocation;
use crate::metadata::PackageMetadata;
use crate::oracle::DependencyOracle;
use crate::package_id::PackageIdStore;
use crate::placeholder::PlaceholderTable;
use crate::stamp::TimestampCache;
use crate::store::{self, StoreLayout};

pub struct BuildContext {
  pub invocation: Invocation,
  /// Whether a local config put this run into an isolated universe.
  pub isolated: bool,
  pub layout: StoreLayout,
  pub config: ConfigLoader,
  pub catalog: PackageCatalog,
  pub stamps: TimestampCache,
  pub ids: PackageIdStore,
  pub oracle: DependencyOracle,
  pub placeholders: PlaceholderTable,
  pub metadata: HashMap<String, PackageMetadata>,
}

impl BuildContext {
  /// Initializes all shared state for one invocation: detects the
  /// scratch layout, loads the global config and persisted stores, and
  /// discovers the package catalog.
  pub fn new(invocation: Invocation) -> Result<Self, ConfigError> {
    let isolated = config::local_config_present();
    let layout = StoreLayout::detect(invocation.opt_level, isolated);
    let mut stamps = TimestampCache::new();
    let config = ConfigLoader::load(invocation.opt_level, &mut stamps)?;
    let ids = PackageIdStore::load(&layout, &mut stamps);
    let oracle = DependencyOracle::new(layout.clone());

    let mut placeholders = PlaceholderTable::new();
    placeholders.set("temp directory", layout.temp_dir().display().to_string());
    store::ensure_dir(&layout.dynamic_libraries_dir());
    store::ensure_dir(&layout.static_libraries_dir());
    placeholders.set(
      "shared_library_path",
      forge_platform::shell::quote(&layout.dynamic_libraries_dir()),
    );

    // Explicit inputs are registered ahead of container scans, except
    // under --all where the containers define the whole input set.
    let registrations = if invocation.all {
      Vec::new()
    } else {
      invocation.raw_inputs(isolated)
    };
    let catalog = PackageCatalog::discover(&registrations, &config.package_directories());
    debug!(packages = catalog.len(), isolated, "build context initialized");

    Ok(BuildContext {
      invocation,
      isolated,
      layout,
      config,
      catalog,
      stamps,
      ids,
      oracle,
      placeholders,
      metadata: HashMap::new(),
    })
  }

  /// The names of the packages this invocation operates on.
  pub fn input_package_names(&self) -> Result<Vec<String>, CatalogError> {
    if self.invocation.all {
      return Ok(self.catalog.names().map(String::from).collect());
    }

    let mut names = Vec::new();
    for input in self.invocation.raw_inputs(self.isolated) {
      let path = self.catalog.resolve_input(&input)?;
      let name = name_of(&path);
      if !names.contains(&name) {
        names.push(name);
      }
    }
    Ok(names)
  }

  /// Flushes every mutated persistent store. Called once, at the end of
  /// the run, whether or not it succeeded.
  pub fn flush(&self) {
    self.oracle.flush();
    self.ids.flush(&self.layout);
  }
}
