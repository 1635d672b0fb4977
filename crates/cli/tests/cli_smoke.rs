//! CLI smoke tests for forge.
//!
//! Each test runs the real binary against an isolated environment:
//! `FORGE_CONFIG` points at a private global config and `FORGE_TEMP` at
//! a private scratch root.

use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Environment
// =============================================================================

struct TestEnv {
  temp: TempDir,
}

/// A global config whose "toolchain" is plain shell.
const SHELL_TOOLCHAIN: &str = r#"
package_type = "application"
source_directories = { "src" }
build_commands = { sh = "cp ${in} ${out}" }
linker_command = "cat ${in} > ${out} && chmod +x ${out}"
shared_linker_command = "cat ${in} > ${out}"
static_linker_command = "cat ${in} > ${out}"
parallel_tasks = 2
"#;

impl TestEnv {
  fn new() -> Self {
    let env = TestEnv {
      temp: TempDir::new().unwrap(),
    };
    std::fs::create_dir_all(env.packages_dir()).unwrap();
    env.write_config(SHELL_TOOLCHAIN);
    env
  }

  fn write_config(&self, contents: &str) {
    let full = format!(
      "{contents}\npackage_directories = {{ {:?} }}\n",
      self.packages_dir().display().to_string()
    );
    std::fs::write(self.config_path(), full).unwrap();
  }

  fn config_path(&self) -> PathBuf {
    self.temp.path().join("global.forge.lua")
  }

  fn packages_dir(&self) -> PathBuf {
    self.temp.path().join("pkgs")
  }

  fn add_package(&self, name: &str, config: &str) -> PathBuf {
    let dir = self.packages_dir().join(name);
    std::fs::create_dir_all(dir.join("src")).unwrap();
    std::fs::write(dir.join(".package.forge.lua"), config).unwrap();
    dir
  }

  /// A Command for the forge binary with this environment's isolation.
  fn cmd(&self) -> Command {
    let mut cmd = Command::cargo_bin("forge").unwrap();
    cmd.env("FORGE_CONFIG", self.config_path());
    cmd.env("FORGE_TEMP", self.temp.path().join("scratch"));
    cmd.current_dir(self.temp.path());
    cmd
  }
}

// =============================================================================
// Help & flags
// =============================================================================

#[test]
fn help_flag_works() {
  TestEnv::new()
    .cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"))
    .stdout(predicate::str::contains("--build"))
    .stdout(predicate::str::contains("--deep-clean"));
}

#[test]
fn version_flag_works() {
  TestEnv::new()
    .cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("forge"));
}

#[test]
fn unknown_flag_fails() {
  TestEnv::new().cmd().arg("--frobnicate").assert().failure();
}

// =============================================================================
// list
// =============================================================================

#[test]
fn list_shows_known_packages() {
  let env = TestEnv::new();
  env.add_package("alpha", "");
  env.add_package("beta", "");

  env
    .cmd()
    .arg("--list")
    .assert()
    .success()
    .stdout(predicate::str::contains("All known packages"))
    .stdout(predicate::str::contains("alpha"))
    .stdout(predicate::str::contains("beta"));
}

// =============================================================================
// build / run
// =============================================================================

#[test]
fn build_produces_the_output() {
  let env = TestEnv::new();
  let pkg = env.add_package("hello", "");
  std::fs::write(pkg.join("src").join("main.sh"), "#!/bin/sh\n").unwrap();

  env.cmd().arg("--build").arg("hello").assert().success();

  // The output is the concatenation of the single object.
  let scratch = env.temp.path().join("scratch").join("fast");
  let outputs: Vec<PathBuf> = walk(&scratch)
    .into_iter()
    .filter(|path| path.file_name().is_some_and(|name| name == "hello"))
    .collect();
  assert_eq!(outputs.len(), 1, "expected exactly one linked output");
}

#[test]
fn build_of_unknown_package_fails() {
  TestEnv::new().cmd().arg("--build").arg("ghost").assert().failure();
}

#[test]
fn failing_compile_fails_the_invocation() {
  let env = TestEnv::new();
  let pkg = env.add_package("broken", r#"build_commands = { sh = "exit 1" }"#);
  std::fs::write(pkg.join("src").join("main.sh"), "x\n").unwrap();

  env.cmd().arg("--build").arg("broken").assert().failure();
}

#[test]
fn run_executes_the_application() {
  let env = TestEnv::new();
  let pkg = env.add_package("runner", "");
  let marker = env.temp.path().join("ran-marker");
  std::fs::write(
    pkg.join("src").join("main.sh"),
    format!("#!/bin/sh\ntouch {}\n", marker.display()),
  )
  .unwrap();

  env.cmd().arg("--run").arg("runner").assert().success();
  assert!(marker.exists(), "running the built application must execute it");
}

#[test]
fn run_with_nothing_runnable_fails() {
  let env = TestEnv::new();
  env.add_package("justlib", r#"package_type = "library""#);

  env.cmd().arg("--run").arg("justlib").assert().failure();
}

// =============================================================================
// clean
// =============================================================================

#[test]
fn clean_removes_the_scratch_tree() {
  let env = TestEnv::new();
  let pkg = env.add_package("hello", "");
  std::fs::write(pkg.join("src").join("main.sh"), "x\n").unwrap();

  env.cmd().arg("--build").arg("hello").assert().success();
  let scratch = env.temp.path().join("scratch").join("fast");
  assert!(scratch.exists());

  env.cmd().arg("--clean").assert().success();
  assert!(!scratch.exists());
}

#[test]
fn deep_clean_removes_everything() {
  let env = TestEnv::new();
  let pkg = env.add_package("hello", "");
  std::fs::write(pkg.join("src").join("main.sh"), "x\n").unwrap();

  env.cmd().arg("--build").arg("hello").assert().success();
  env.cmd().arg("--deep-clean").assert().success();
  assert!(!env.temp.path().join("scratch").exists());
}

// =============================================================================
// completion
// =============================================================================

#[test]
fn complete_offers_flags() {
  TestEnv::new()
    .cmd()
    .args(["--complete", "forge", "--b"])
    .assert()
    .success()
    .stdout(predicate::str::contains("--build"));
}

#[test]
fn complete_offers_package_names() {
  let env = TestEnv::new();
  env.add_package("hello", "");
  env.add_package("help-viewer", "");
  env.add_package("other", "");

  env
    .cmd()
    .args(["--complete", "forge", "hel"])
    .assert()
    .success()
    .stdout(predicate::str::contains("hello"))
    .stdout(predicate::str::contains("help-viewer"))
    .stdout(predicate::str::contains("other").not());
}

// =============================================================================
// tooling hints
// =============================================================================

#[test]
fn generate_tooling_hint_writes_a_clangd_file() {
  let env = TestEnv::new();
  let pkg = env.add_package(
    "hinted",
    r#"build_commands = { cc = "c++ -std=c++20 -o ${out} ${in}" }; defines = { "FEATURE" }"#,
  );
  std::fs::write(pkg.join("src").join("main.cc"), "x\n").unwrap();

  env.cmd().arg("--generate-tooling-hint").arg("hinted").assert().success();

  let hint = std::fs::read_to_string(pkg.join(".clangd")).unwrap();
  assert!(hint.contains("CompileFlags"));
  assert!(hint.contains("-std=c++20"));
  assert!(hint.contains("-DFEATURE"));
}

// =============================================================================
// unimplemented actions
// =============================================================================

#[test]
fn test_action_reports_unimplemented() {
  TestEnv::new()
    .cmd()
    .arg("--test")
    .assert()
    .failure()
    .stderr(predicate::str::contains("not implemented"));
}

fn walk(root: &std::path::Path) -> Vec<PathBuf> {
  let mut files = Vec::new();
  let Ok(entries) = std::fs::read_dir(root) else {
    return files;
  };
  for entry in entries.flatten() {
    let path = entry.path();
    if path.is_dir() {
      files.extend(walk(&path));
    } else {
      files.push(path);
    }
  }
  files
}
