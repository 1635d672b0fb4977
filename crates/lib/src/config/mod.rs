//! Configuration loading.
//!
//! Three layers of config combine into a package's effective
//! configuration, concatenated in order and evaluated as one program:
//!
//! 1. the global config (`~/.forge.lua`, or `$FORGE_CONFIG`),
//! 2. an optional local config (`.forge.lua` in the working directory,
//!    which also switches the run into an isolated universe),
//! 3. the package's own `.package.forge.lua`.
//!
//! The loader reads the global layers once and re-evaluates per package,
//! returning the structured value together with an effective timestamp:
//! the maximum mtime of every contributing file. That timestamp feeds
//! the rebuild oracle, so editing a config reliably rebuilds whatever it
//! influences.

pub mod lua;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::invocation::OptLevel;
use crate::stamp::TimestampCache;

/// Name of the local (isolated-universe) config file.
pub const LOCAL_CONFIG_FILE: &str = ".forge.lua";
/// Name of a package's config file.
pub const PACKAGE_CONFIG_FILE: &str = ".package.forge.lua";

/// Errors raised while loading or evaluating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("cannot read config file {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("config evaluation failed: {0}")]
  Eval(#[from] mlua::Error),
}

/// The structured value a config evaluation produces. Every key is
/// optional; absent keys fall back to built-in defaults downstream.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
  pub package_type: Option<String>,
  pub build_commands: BTreeMap<String, String>,
  pub linker_command: Option<String>,
  pub shared_linker_command: Option<String>,
  pub static_linker_command: Option<String>,
  pub output_extension: Option<String>,
  pub run_command: Option<String>,
  pub parallel_tasks: Option<usize>,
  pub include_priority: Option<i64>,
  pub should_skip: Option<bool>,
  pub no_output_file: Option<bool>,
  pub statically_link: Option<bool>,
  pub source_directories: Vec<String>,
  pub package_directories: Vec<String>,
  pub public_include_directories: Vec<String>,
  pub include_directories: Vec<String>,
  pub public_defines: Vec<String>,
  pub defines: Vec<String>,
  pub dependencies: Vec<String>,
  pub files_to_ignore: Vec<String>,
  pub asset_directories: Vec<String>,
  pub destination_directory: Option<String>,
}

/// Whether a local config makes the working directory an isolated
/// universe. Checked before the loader exists because the scratch-tree
/// location depends on it.
pub fn local_config_present() -> bool {
  Path::new(LOCAL_CONFIG_FILE).exists()
}

struct GlobalChunk {
  path: PathBuf,
  contents: String,
}

/// Reads global config layers once and evaluates per-package configs on
/// demand.
pub struct ConfigLoader {
  opt_level: OptLevel,
  global_chunks: Vec<GlobalChunk>,
  global_timestamp: u64,
  global: RawConfig,
}

impl ConfigLoader {
  /// Loads (creating, on first run) the global config and evaluates it.
  pub fn load(opt_level: OptLevel, stamps: &mut TimestampCache) -> Result<Self, ConfigError> {
    let root_path = forge_platform::paths::global_config_path();
    if !stamps.exists(&root_path) {
      write_default_config(&root_path)?;
      stamps.invalidate(&root_path);
    }

    let mut global_chunks = vec![read_chunk(&root_path)?];
    let local_path = Path::new(LOCAL_CONFIG_FILE);
    if stamps.exists(local_path) {
      global_chunks.push(read_chunk(local_path)?);
    }

    let mut global_timestamp = 0;
    for chunk in &global_chunks {
      global_timestamp = global_timestamp.max(stamps.timestamp_of(&chunk.path));
    }

    let global = evaluate_chunks(&global_chunks, None, opt_level)?;

    Ok(ConfigLoader {
      opt_level,
      global_chunks,
      global_timestamp,
      global,
    })
  }

  /// The configuration visible outside any package.
  pub fn global(&self) -> &RawConfig {
    &self.global
  }

  pub fn global_timestamp(&self) -> u64 {
    self.global_timestamp
  }

  /// Worker-pool size: configured, else hardware concurrency.
  pub fn parallel_tasks(&self) -> usize {
    self
      .global
      .parallel_tasks
      .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
      .max(1)
  }

  pub fn package_directories(&self) -> Vec<PathBuf> {
    self.global.package_directories.iter().map(PathBuf::from).collect()
  }

  /// The global run override, if the config sets one.
  pub fn run_command(&self) -> Option<&str> {
    self.global.run_command.as_deref()
  }

  /// Loads a package's effective configuration.
  ///
  /// Without a package config file the global value applies as-is. With
  /// one, the global chunks plus the package chunk are evaluated
  /// together, and the effective timestamp is raised to the package
  /// file's mtime.
  pub fn package_config(
    &self,
    package_path: &Path,
    stamps: &mut TimestampCache,
  ) -> Result<(RawConfig, u64), ConfigError> {
    let config_path = package_path.join(PACKAGE_CONFIG_FILE);
    if !stamps.exists(&config_path) {
      return Ok((self.global.clone(), self.global_timestamp));
    }

    let package_chunk = read_chunk(&config_path)?;
    let timestamp = self.global_timestamp.max(stamps.timestamp_of(&config_path));
    let config = evaluate_chunks(&self.global_chunks, Some(&package_chunk), self.opt_level)?;
    Ok((config, timestamp))
  }
}

fn read_chunk(path: &Path) -> Result<GlobalChunk, ConfigError> {
  let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
    path: path.to_path_buf(),
    source,
  })?;
  Ok(GlobalChunk {
    path: path.to_path_buf(),
    contents,
  })
}

fn evaluate_chunks(
  globals: &[GlobalChunk],
  package: Option<&GlobalChunk>,
  opt_level: OptLevel,
) -> Result<RawConfig, ConfigError> {
  let chunks: Vec<lua::Chunk<'_>> = globals
    .iter()
    .chain(package)
    .map(|chunk| lua::Chunk {
      name: chunk.path.display().to_string(),
      contents: &chunk.contents,
    })
    .collect();
  lua::evaluate(&chunks, opt_level.as_str())
}

/// Writes a commented starter config. The package container defaults
/// mirror a conventional `~/sources` checkout layout.
fn write_default_config(path: &Path) -> Result<(), ConfigError> {
  let home = forge_platform::paths::home_dir();
  let sources = home.join("sources");
  let containers = ["applications", "libraries", "third_party"]
    .iter()
    .map(|dir| format!("  {:?},", sources.join(dir).display().to_string()))
    .collect::<Vec<_>>()
    .join("\n");

  let contents = format!(
    r#"-- forge global configuration.
--
-- This file is concatenated with any local `.forge.lua` and any package
-- `.package.forge.lua`, then evaluated top to bottom; later files
-- override the globals set here. The global `optimization_level` holds
-- "debug", "fast", or "optimized".

local cpp_compiler = "clang++"
local archiver = "llvm-ar"

local c_optimizations = ({{
  debug = " -g -Og",
  fast = "",
  optimized = " -g -O3 -fomit-frame-pointer -flto",
}})[optimization_level]

local cpp_command = cpp_compiler .. c_optimizations
  .. " -c -std=c++20 ${{cdefines}} ${{cincludes}} -MD -MF ${{deps file}} -o ${{out}} ${{in}}"

build_commands = {{
  cc = cpp_command,
  cpp = cpp_command,
  c = cpp_compiler .. c_optimizations
    .. " -c -std=c17 ${{cdefines}} ${{cincludes}} -MD -MF ${{deps file}} -o ${{out}} ${{in}}",
  asm = cpp_compiler .. c_optimizations .. " -c -MD -MF ${{deps file}} -o ${{out}} ${{in}}",
  s = "nasm -o ${{out}} ${{in}}",
}}

local linker_optimizations = ({{
  debug = " -g",
  fast = " -g",
  optimized = " -O3 -g -s",
}})[optimization_level]

-- Application link, library shared link, and library archive commands.
linker_command = cpp_compiler .. linker_optimizations .. " -o ${{out}} ${{in}}"
shared_linker_command = cpp_compiler .. " -shared -o ${{out}} ${{in}}"
static_linker_command = archiver .. " rcs ${{out}} ${{in}}"

package_type = "application"
source_directories = {{ "" }}

package_directories = {{
{containers}
}}

-- parallel_tasks defaults to the number of hardware threads.
-- parallel_tasks = 8
"#
  );

  info!(path = %path.display(), "writing default config file");
  std::fs::write(path, contents).map_err(|source| ConfigError::Io {
    path: path.to_path_buf(),
    source,
  })
}
