#![allow(dead_code)]

//! Shared sandbox for integration tests.
//!
//! Each test gets an isolated world: a private global config (via
//! `FORGE_CONFIG`), a private scratch root (via `FORGE_TEMP`), and a
//! package container directory the catalog scans.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use forge_lib::invocation::{Action, Invocation};

pub struct Sandbox {
  pub temp: TempDir,
}

/// A global config whose "toolchain" is plain shell: compiling copies
/// the source to the object, linking concatenates the inputs.
pub const SHELL_TOOLCHAIN: &str = r#"
package_type = "application"
source_directories = { "src" }
build_commands = { cc = "cp ${in} ${out}" }
linker_command = "cat ${in} > ${out}"
shared_linker_command = "cat ${in} > ${out}"
static_linker_command = "cat ${in} > ${out}"
"#;

impl Sandbox {
  pub fn new(global_config: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let sandbox = Sandbox { temp };

    std::fs::create_dir_all(sandbox.packages_dir()).unwrap();
    sandbox.write_global_config(global_config);
    sandbox
  }

  pub fn write_global_config(&self, contents: &str) {
    let full = format!(
      "{contents}\npackage_directories = {{ {:?} }}\nparallel_tasks = 2\n",
      self.packages_dir().display().to_string()
    );
    std::fs::write(self.global_config_path(), full).unwrap();
  }

  pub fn global_config_path(&self) -> PathBuf {
    self.temp.path().join("global.forge.lua")
  }

  pub fn packages_dir(&self) -> PathBuf {
    self.temp.path().join("pkgs")
  }

  pub fn scratch_root(&self) -> PathBuf {
    self.temp.path().join("scratch")
  }

  /// Creates a package directory with the given config contents.
  pub fn add_package(&self, name: &str, config: &str) -> PathBuf {
    let dir = self.packages_dir().join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(".package.forge.lua"), config).unwrap();
    dir
  }

  /// Writes a file inside a package, creating parent directories.
  pub fn write_file(&self, package: &str, relative: &str, contents: &str) -> PathBuf {
    let path = self.packages_dir().join(package).join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, contents).unwrap();
    path
  }

  /// Runs a closure with this sandbox's environment in place.
  pub fn with_env<T>(&self, f: impl FnOnce() -> T) -> T {
    temp_env::with_vars(
      [
        ("FORGE_CONFIG", Some(self.global_config_path())),
        ("FORGE_TEMP", Some(self.scratch_root())),
      ],
      f,
    )
  }

  pub fn invocation(&self, action: Action, inputs: &[&str]) -> Invocation {
    Invocation {
      action,
      inputs: inputs.iter().map(|s| s.to_string()).collect(),
      ..Invocation::default()
    }
  }
}

/// Blocks on a future with a fresh single-thread runtime.
pub fn block_on<T>(future: impl std::future::Future<Output = T>) -> T {
  tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .unwrap()
    .block_on(future)
}

/// Pushes a file's mtime safely past any artifact written so far.
pub fn touch_newer(path: &Path) {
  std::thread::sleep(std::time::Duration::from_millis(20));
  let contents = std::fs::read_to_string(path).unwrap_or_default();
  std::fs::write(path, format!("{contents}\n")).unwrap();
}
