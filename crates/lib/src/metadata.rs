//! Package metadata: loading and consolidation.
//!
//! Resolution happens in two phases keyed on package name. Phase A
//! loads a package's own configuration into unconsolidated fields and
//! derives its output paths. Phase B walks the transitive dependency
//! closure breadth-first and flattens everything a build needs to know:
//! the effective defines, the priority-ordered include paths, the static
//! archives to link, and the newest metadata timestamp in the closure.
//!
//! Phase B runs at most once per package; the `has_consolidated_information`
//! latch makes resolution idempotent.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::context::BuildContext;

/// Include priority used when a package does not set one. Lower sorts
/// earlier, so explicit priorities below 1000 jump ahead of the crowd.
const DEFAULT_INCLUDE_PRIORITY: i64 = 1000;

/// Errors raised while resolving package metadata.
#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("can't find package named {0:?}")]
  UnknownPackage(String),

  #[error("{package:?} depends on {dependency:?} but the latter isn't found")]
  MissingDependency { package: String, dependency: String },

  #[error("{package:?} depends on {dependency:?} but the latter isn't a library")]
  DependencyNotLibrary { package: String, dependency: String },

  #[error("package {package:?} has unknown package type {value:?}")]
  UnknownPackageType { package: String, value: String },

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Catalog(#[from] CatalogError),
}

/// What a package produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageType {
  /// Produces an executable; may be run.
  Application,
  /// Produces a static archive and a shared library.
  Library,
}

/// Everything known about one package.
#[derive(Debug, Clone)]
pub struct PackageMetadata {
  pub name: String,
  pub package_type: PackageType,
  pub id: u64,
  pub package_path: PathBuf,
  /// Scratch directory for this package's intermediate files.
  pub temp_directory: PathBuf,

  /// Build command templates keyed by file extension with leading dot.
  pub build_commands: BTreeMap<String, String>,
  pub linker_command: String,
  pub shared_linker_command: String,
  pub static_linker_command: String,

  pub output_filename: String,
  /// The final output object: the executable for applications, a copy
  /// of the shared library for libraries.
  pub output_path: PathBuf,
  /// `lib<name>.so` inside the shared-library directory. Libraries only.
  pub shared_library_path: Option<PathBuf>,
  /// The static archive inside the static-library directory. Libraries only.
  pub static_library_path: Option<PathBuf>,

  pub source_directories: Vec<String>,
  pub public_include_directories: Vec<String>,
  pub include_directories: Vec<String>,
  pub include_priority: i64,
  pub public_defines: Vec<String>,
  pub defines: Vec<String>,
  /// Declared (direct) dependencies, by name.
  pub dependencies: Vec<String>,
  pub files_to_ignore: BTreeSet<PathBuf>,
  pub asset_directories: Vec<String>,
  pub destination_directory: Option<PathBuf>,
  pub should_skip: bool,
  pub no_output_file: bool,
  pub statically_link: bool,

  /// Max of this package's effective config timestamp and every
  /// transitive dependency's metadata timestamp.
  pub metadata_timestamp: u64,

  pub has_consolidated_information: bool,
  pub consolidated_defines: Vec<String>,
  pub consolidated_dependencies: Vec<String>,
  pub consolidated_includes: Vec<PathBuf>,
  pub statically_linked_library_objects: Vec<PathBuf>,
  pub dynamically_linked_libraries: Vec<String>,
}

impl PackageMetadata {
  pub fn is_application(&self) -> bool {
    self.package_type == PackageType::Application
  }

  pub fn is_library(&self) -> bool {
    self.package_type == PackageType::Library
  }
}

/// Returns fully consolidated metadata for a package, loading and
/// consolidating on first request.
pub fn resolve<'a>(ctx: &'a mut BuildContext, name: &str) -> Result<&'a PackageMetadata, ResolveError> {
  load(ctx, name)?;
  if !ctx.metadata[name].has_consolidated_information {
    consolidate(ctx, name)?;
  }
  Ok(&ctx.metadata[name])
}

/// Phase A: loads a package's own configuration. Idempotent.
fn load(ctx: &mut BuildContext, name: &str) -> Result<(), ResolveError> {
  if ctx.metadata.contains_key(name) {
    return Ok(());
  }

  let package_path = ctx
    .catalog
    .path_of(name)
    .map(Path::to_path_buf)
    .ok_or_else(|| ResolveError::UnknownPackage(name.to_string()))?;

  // Registered before config evaluation so a destination_directory
  // template may reference it.
  ctx.placeholders.set("package name", name);

  let (config, timestamp) = ctx.config.package_config(&package_path, &mut ctx.stamps)?;
  let id = ctx.ids.id_of(&ctx.layout, &package_path);
  let temp_directory = ctx.layout.package_dir(id);

  let package_type = match config.package_type.as_deref() {
    None | Some("application") => PackageType::Application,
    Some("library") => PackageType::Library,
    Some(other) => {
      return Err(ResolveError::UnknownPackageType {
        package: name.to_string(),
        value: other.to_string(),
      });
    }
  };

  let mut build_commands = BTreeMap::new();
  for (extension, template) in &config.build_commands {
    build_commands.insert(format!(".{extension}"), template.clone());
  }

  let no_output_file = config.no_output_file.unwrap_or(false);
  let source_directories = if no_output_file {
    Vec::new()
  } else {
    config.source_directories.clone()
  };

  let destination_directory = config.destination_directory.as_deref().map(|template| {
    // Expanded at parse time; dependents cannot influence it.
    PathBuf::from(ctx.placeholders.expand(template))
  });

  let output_extension = config
    .output_extension
    .clone()
    .unwrap_or_else(|| match package_type {
      PackageType::Application => String::new(),
      PackageType::Library => String::from("so"),
    });
  let mut output_filename = name.to_string();
  if !output_extension.is_empty() {
    output_filename.push('.');
    output_filename.push_str(&output_extension);
  }
  let output_path = destination_directory
    .clone()
    .unwrap_or_else(|| temp_directory.clone())
    .join(&output_filename);

  let (shared_library_path, static_library_path) = match package_type {
    PackageType::Application => (None, None),
    PackageType::Library => (
      Some(ctx.layout.dynamic_libraries_dir().join(format!("lib{name}.so"))),
      Some(ctx.layout.static_libraries_dir().join(format!("{name}.a"))),
    ),
  };

  let files_to_ignore = config
    .files_to_ignore
    .iter()
    .map(|relative| package_path.join(relative))
    .collect();

  let metadata = PackageMetadata {
    name: name.to_string(),
    package_type,
    id,
    package_path,
    temp_directory,
    build_commands,
    linker_command: config.linker_command.clone().unwrap_or_default(),
    shared_linker_command: config.shared_linker_command.clone().unwrap_or_default(),
    static_linker_command: config.static_linker_command.clone().unwrap_or_default(),
    output_filename,
    output_path,
    shared_library_path,
    static_library_path,
    source_directories,
    public_include_directories: config.public_include_directories.clone(),
    include_directories: config.include_directories.clone(),
    include_priority: config.include_priority.unwrap_or(DEFAULT_INCLUDE_PRIORITY),
    public_defines: config.public_defines.clone(),
    defines: config.defines.clone(),
    dependencies: config.dependencies.clone(),
    files_to_ignore,
    asset_directories: config.asset_directories.clone(),
    destination_directory,
    should_skip: config.should_skip.unwrap_or(false),
    no_output_file,
    statically_link: config.statically_link.unwrap_or(true),
    metadata_timestamp: timestamp,
    has_consolidated_information: false,
    consolidated_defines: Vec::new(),
    consolidated_dependencies: Vec::new(),
    consolidated_includes: Vec::new(),
    statically_linked_library_objects: Vec::new(),
    dynamically_linked_libraries: Vec::new(),
  };

  debug!(package = name, id, type_ = ?metadata.package_type, "loaded package metadata");
  ctx.metadata.insert(name.to_string(), metadata);
  Ok(())
}

/// Phase B: flattens the dependency closure into the consolidated
/// fields.
///
/// The walk enqueues each dependency's *declared* dependencies, not its
/// consolidated ones; cycles terminate through the visited set rather
/// than through ordering.
fn consolidate(ctx: &mut BuildContext, name: &str) -> Result<(), ResolveError> {
  let (own_is_application, own_priority, own_path) = {
    let own = &ctx.metadata[name];
    (own.is_application(), own.include_priority, own.package_path.clone())
  };

  let mut visited: HashSet<String> = HashSet::new();
  visited.insert(name.to_string());

  let mut queue: VecDeque<String> = VecDeque::new();
  for dependency in &ctx.metadata[name].dependencies {
    if visited.insert(dependency.clone()) {
      queue.push_back(dependency.clone());
    }
  }

  let mut defines: BTreeSet<String> = BTreeSet::new();
  let mut undefines: BTreeSet<String> = BTreeSet::new();
  let mut includes_by_priority: BTreeMap<i64, Vec<PathBuf>> = BTreeMap::new();
  let mut consolidated_dependencies: Vec<String> = Vec::new();
  let mut library_objects: Vec<PathBuf> = Vec::new();
  let mut library_names: Vec<String> = Vec::new();
  let mut metadata_timestamp = ctx.metadata[name].metadata_timestamp;

  fn add_define(defines: &mut BTreeSet<String>, undefines: &mut BTreeSet<String>, define: &str) {
    if let Some(undefine) = define.strip_prefix('-') {
      undefines.insert(undefine.to_string());
    } else {
      defines.insert(define.to_string());
    }
  }

  fn add_include(buckets: &mut BTreeMap<i64, Vec<PathBuf>>, priority: i64, path: PathBuf) {
    // Nonexistent include directories are filtered out here rather than
    // surfacing as compiler noise.
    if !path.exists() {
      return;
    }
    buckets.entry(priority).or_default().push(path);
  }

  {
    let own = &ctx.metadata[name];
    for define in own.defines.iter().chain(&own.public_defines) {
      add_define(&mut defines, &mut undefines, define);
    }
    for directory in own.include_directories.iter().chain(&own.public_include_directories) {
      add_include(&mut includes_by_priority, own_priority, own_path.join(directory));
    }
  }

  while let Some(dependency) = queue.pop_front() {
    if let Err(err) = load(ctx, &dependency) {
      return Err(match err {
        ResolveError::UnknownPackage(_) => ResolveError::MissingDependency {
          package: name.to_string(),
          dependency,
        },
        other => other,
      });
    }

    let child = &ctx.metadata[&dependency];
    if !child.is_library() {
      return Err(ResolveError::DependencyNotLibrary {
        package: name.to_string(),
        dependency,
      });
    }

    consolidated_dependencies.push(dependency.clone());

    if own_is_application && !child.no_output_file {
      if let Some(archive) = &child.static_library_path {
        library_objects.push(archive.clone());
      }
      library_names.push(child.name.clone());
    }

    let child_priority = child.include_priority;
    let child_path = child.package_path.clone();
    for define in &child.public_defines {
      add_define(&mut defines, &mut undefines, define);
    }
    for directory in &child.public_include_directories {
      add_include(&mut includes_by_priority, child_priority, child_path.join(directory));
    }
    metadata_timestamp = metadata_timestamp.max(child.metadata_timestamp);

    let subdependencies = child.dependencies.clone();
    for subdependency in subdependencies {
      if visited.insert(subdependency.clone()) {
        queue.push_back(subdependency);
      }
    }
  }

  let own = ctx.metadata.get_mut(name).expect("loaded above");
  own.consolidated_defines = defines.difference(&undefines).cloned().collect();
  own.consolidated_dependencies = consolidated_dependencies;
  own.consolidated_includes = includes_by_priority.into_values().flatten().collect();
  own.statically_linked_library_objects = library_objects;
  own.dynamically_linked_libraries = library_names;
  own.metadata_timestamp = metadata_timestamp;
  own.has_consolidated_information = true;

  debug!(
    package = name,
    dependencies = own.consolidated_dependencies.len(),
    defines = own.consolidated_defines.len(),
    includes = own.consolidated_includes.len(),
    "consolidated package metadata"
  );
  Ok(())
}
