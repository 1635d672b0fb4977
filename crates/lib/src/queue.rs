//! The staged command queue and its parallel executor.
//!
//! The planner defers work as literal shell commands tagged with a
//! stage. Stages execute in ascending order with a hard barrier between
//! them; within a stage a fixed-size worker pool pulls commands from a
//! shared cursor, so intra-stage ordering is deliberately unspecified.
//!
//! Compile-stage workers own a scratch dependency file apiece. Before
//! running a command the worker substitutes `${deps file}` with its own
//! scratch path; after success it parses the file and records the
//! discovered inputs through the oracle. Commands whose template never
//! asked for a dependency file record the source file alone.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::debug;

use forge_platform::shell;

use crate::oracle::{DependencyOracle, parse_make_deps};
use crate::placeholder::{DEPS_FILE_TOKEN, replace_first};
use crate::store::StoreLayout;

/// A build stage. Commands from earlier stages always finish before
/// commands from later stages start; commands within one stage may run
/// out of order and in parallel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
  /// Individual source files compile into objects.
  Compile = 0,
  /// Libraries link (shared objects and static archives).
  LinkLibrary = 1,
  /// Applications link; library outputs are copied into place.
  LinkApplication = 2,
  /// Asset trees copy into destination directories, after the linked
  /// binary exists so the destination's final layout is complete.
  CopyAssets = 3,
  /// Applications run, in the foreground.
  Run = 4,
}

/// A not-yet-executed subprocess invocation.
#[derive(Debug, Clone)]
pub struct DeferredCommand {
  /// The command string, fully substituted except for `${deps file}`.
  pub command: String,
  /// The compiled source file, when this is a compile step.
  pub source_file: Option<PathBuf>,
  /// The artifact this command produces.
  pub destination_file: Option<PathBuf>,
  /// The owning package.
  pub package_id: u64,
}

/// How the executor should behave for one run.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
  /// Upper bound on concurrent commands within a stage.
  pub parallel_tasks: usize,
  /// Print every command and serialize execution.
  pub verbose: bool,
}

/// Errors raised by queue execution.
#[derive(Debug, Error)]
pub enum QueueError {
  #[error("{failed} of {total} commands failed")]
  CommandsFailed { failed: usize, total: usize },
}

/// Commands grouped by stage, in enqueue order within each stage.
#[derive(Debug, Default)]
pub struct CommandQueue {
  by_stage: BTreeMap<Stage, Vec<DeferredCommand>>,
  total: usize,
}

/// Shared progress over one queue execution: a 1-based counter of
/// completed commands rewriting a single terminal line.
struct Progress {
  completed: AtomicUsize,
  total: usize,
}

impl Progress {
  fn tick(&self) -> usize {
    self.completed.fetch_add(1, Ordering::Relaxed) + 1
  }

  fn print_line(&self, current: usize) {
    use std::io::Write;
    print!("\r\x1b[KRunning {current}/{}", self.total);
    let _ = std::io::stdout().flush();
  }
}

/// Everything a worker shares with its siblings.
struct StageState {
  commands: Vec<DeferredCommand>,
  cursor: AtomicUsize,
  failed: AtomicBool,
  failed_count: AtomicUsize,
  combined_output: Mutex<String>,
  oracle: Mutex<DependencyOracle>,
  progress: Progress,
  verbose: bool,
  record_dependencies: bool,
  foreground: bool,
}

impl CommandQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Queues a command for a stage.
  pub fn push(&mut self, stage: Stage, command: DeferredCommand) {
    debug!(stage = ?stage, command = %command.command, "queued command");
    self.by_stage.entry(stage).or_default().push(command);
    self.total += 1;
  }

  pub fn len(&self) -> usize {
    self.total
  }

  pub fn is_empty(&self) -> bool {
    self.total == 0
  }

  /// Number of commands queued for one stage.
  pub fn stage_len(&self, stage: Stage) -> usize {
    self.by_stage.get(&stage).map(Vec::len).unwrap_or(0)
  }

  /// Runs every stage in order. The oracle is taken by value so workers
  /// can share it behind a mutex; it is returned alongside the result so
  /// the caller can flush it either way.
  pub async fn execute(
    self,
    options: &ExecuteOptions,
    layout: &StoreLayout,
    oracle: DependencyOracle,
  ) -> (DependencyOracle, Result<(), QueueError>) {
    let total = self.total;
    let progress = Progress {
      completed: AtomicUsize::new(0),
      total,
    };

    let mut oracle = oracle;
    let mut printed_progress = false;
    let mut failed_total = 0;

    for (stage, commands) in self.by_stage {
      if commands.is_empty() {
        continue;
      }

      let foreground = stage == Stage::Run || options.verbose;
      let workers = if foreground {
        1
      } else {
        options.parallel_tasks.max(1).min(commands.len())
      };

      let state = Arc::new(StageState {
        commands,
        cursor: AtomicUsize::new(0),
        failed: AtomicBool::new(false),
        failed_count: AtomicUsize::new(0),
        combined_output: Mutex::new(String::new()),
        oracle: Mutex::new(oracle),
        progress: Progress {
          completed: AtomicUsize::new(progress.completed.load(Ordering::Relaxed)),
          total,
        },
        verbose: options.verbose,
        record_dependencies: stage == Stage::Compile,
        foreground,
      });

      debug!(stage = ?stage, commands = state.commands.len(), workers, "executing stage");

      let mut join_set = JoinSet::new();
      for worker in 0..workers {
        let state = state.clone();
        let deps_file = layout.worker_deps_file(worker);
        join_set.spawn(run_worker(state, deps_file));
      }
      while join_set.join_next().await.is_some() {}

      let state = Arc::try_unwrap(state).unwrap_or_else(|_| unreachable!("all workers joined"));
      progress
        .completed
        .store(state.progress.completed.load(Ordering::Relaxed), Ordering::Relaxed);
      printed_progress = printed_progress || !foreground;
      oracle = state.oracle.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());

      if state.failed.load(Ordering::Relaxed) {
        failed_total += state.failed_count.load(Ordering::Relaxed);
        if printed_progress {
          println!();
        }
        let output = state
          .combined_output
          .into_inner()
          .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !output.is_empty() {
          eprint!("{output}");
        }
        // Later stages are skipped after a failed stage.
        return (oracle, Err(QueueError::CommandsFailed { failed: failed_total, total }));
      }
    }

    if printed_progress {
      println!();
    }
    (oracle, Ok(()))
  }
}

/// One worker: pulls commands from the shared cursor until the stage
/// drains. A failure is recorded but does not stop the worker; the rest
/// of the stage still gets its chance.
async fn run_worker(state: Arc<StageState>, deps_file: PathBuf) {
  let quoted_deps_file = shell::quote(&deps_file);
  let mut output = String::new();
  let mut worker_failed = false;

  loop {
    let index = state.cursor.fetch_add(1, Ordering::Relaxed);
    let Some(deferred) = state.commands.get(index) else {
      break;
    };

    let current = state.progress.tick();
    if state.verbose {
      println!("Running {current}/{}: {}", state.progress.total, deferred.command);
    } else if !state.foreground {
      state.progress.print_line(current);
    }

    let mut command = deferred.command.clone();
    let uses_deps_file = state.record_dependencies && replace_first(&mut command, DEPS_FILE_TOKEN, &quoted_deps_file);

    let success = if state.foreground {
      shell::run_foreground(&command).await
    } else {
      let run = shell::run_captured(&command).await;
      if !run.success {
        output.push_str(&run.output);
      }
      run.success
    };

    if success {
      if state.record_dependencies {
        record_inputs(&state, deferred, uses_deps_file, &deps_file).await;
      }
    } else {
      worker_failed = true;
      state.failed.store(true, Ordering::Relaxed);
      state.failed_count.fetch_add(1, Ordering::Relaxed);
    }
  }

  if worker_failed && !output.is_empty() {
    let mut combined = state
      .combined_output
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    combined.push_str(&output);
  }
}

/// Records what a successful compile actually read: the parsed
/// dependency file when the template asked for one, the source file
/// alone otherwise.
async fn record_inputs(state: &StageState, deferred: &DeferredCommand, uses_deps_file: bool, deps_file: &PathBuf) {
  let Some(destination) = &deferred.destination_file else {
    return;
  };

  let inputs = if uses_deps_file {
    match tokio::fs::read_to_string(deps_file).await {
      Ok(contents) => parse_make_deps(&contents),
      Err(_) => deferred.source_file.iter().cloned().collect(),
    }
  } else {
    deferred.source_file.iter().cloned().collect()
  };

  if inputs.is_empty() {
    return;
  }

  let mut oracle = state.oracle.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
  oracle.set_inputs(deferred.package_id, destination, inputs);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::invocation::OptLevel;
  use serial_test::serial;
  use tempfile::TempDir;

  fn command(text: &str) -> DeferredCommand {
    DeferredCommand {
      command: text.to_string(),
      source_file: None,
      destination_file: None,
      package_id: 0,
    }
  }

  fn options() -> ExecuteOptions {
    ExecuteOptions {
      parallel_tasks: 4,
      verbose: false,
    }
  }

  fn with_layout<T>(f: impl FnOnce(TempDir, StoreLayout) -> T) -> T {
    let temp = TempDir::new().unwrap();
    let temp_path = temp.path().to_str().unwrap().to_string();
    temp_env::with_var("FORGE_TEMP", Some(temp_path), || {
      let layout = StoreLayout::detect(OptLevel::Fast, false);
      f(temp, layout)
    })
  }

  #[test]
  fn stages_are_ordered() {
    assert!(Stage::Compile < Stage::LinkLibrary);
    assert!(Stage::LinkLibrary < Stage::LinkApplication);
    assert!(Stage::LinkApplication < Stage::CopyAssets);
    assert!(Stage::CopyAssets < Stage::Run);
  }

  #[test]
  #[serial]
  fn empty_queue_succeeds() {
    with_layout(|_temp, layout| {
      let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
      runtime.block_on(async {
        let oracle = DependencyOracle::new(layout.clone());
        let (_, result) = CommandQueue::new().execute(&options(), &layout, oracle).await;
        assert!(result.is_ok());
      });
    });
  }

  #[test]
  #[serial]
  fn stage_barrier_holds_between_stages() {
    with_layout(|temp, layout| {
      let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();
      runtime.block_on(async {
        let marker = temp.path().join("marker");
        let follower = temp.path().join("follower");

        let mut queue = CommandQueue::new();
        // The compile stage writes the marker after a delay; the link
        // stage copies it. The copy only works if the barrier held.
        queue.push(
          Stage::Compile,
          command(&format!("sleep 0.2 && echo done > {}", marker.display())),
        );
        queue.push(
          Stage::LinkLibrary,
          command(&format!("cp {} {}", marker.display(), follower.display())),
        );

        let oracle = DependencyOracle::new(layout.clone());
        let (_, result) = queue.execute(&options(), &layout, oracle).await;
        assert!(result.is_ok());
        assert!(follower.exists());
      });
    });
  }

  #[test]
  #[serial]
  fn failure_drains_the_stage_then_skips_later_stages() {
    with_layout(|temp, layout| {
      let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
      runtime.block_on(async {
        let survivor = temp.path().join("survivor");
        let skipped = temp.path().join("skipped");

        let mut queue = CommandQueue::new();
        queue.push(Stage::Compile, command("true"));
        queue.push(Stage::Compile, command("exit 7"));
        // Single worker, so this third command runs after the failure:
        // within-stage work drains best-effort.
        queue.push(Stage::Compile, command(&format!("touch {}", survivor.display())));
        queue.push(Stage::LinkApplication, command(&format!("touch {}", skipped.display())));

        let oracle = DependencyOracle::new(layout.clone());
        let opts = ExecuteOptions {
          parallel_tasks: 1,
          verbose: false,
        };
        let (_, result) = queue.execute(&opts, &layout, oracle).await;

        assert!(matches!(result, Err(QueueError::CommandsFailed { failed: 1, .. })));
        assert!(survivor.exists());
        assert!(!skipped.exists());
      });
    });
  }

  #[test]
  #[serial]
  fn compile_stage_records_deps_file_inputs() {
    with_layout(|temp, layout| {
      let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
      runtime.block_on(async {
        let source = temp.path().join("a.cc");
        let header = temp.path().join("b.h");
        let object = temp.path().join("a.o");
        std::fs::write(&source, "x").unwrap();
        std::fs::write(&header, "x").unwrap();

        let mut queue = CommandQueue::new();
        queue.push(
          Stage::Compile,
          DeferredCommand {
            command: format!(
              "touch {} && printf '%s: %s %s' out.o {} {} > ${{deps file}}",
              object.display(),
              source.display(),
              header.display()
            ),
            source_file: Some(source.clone()),
            destination_file: Some(object.clone()),
            package_id: 1,
          },
        );

        crate::store::ensure_dir(&layout.package_dir(1));
        let oracle = DependencyOracle::new(layout.clone());
        let (mut oracle, result) = queue.execute(&options(), &layout, oracle).await;
        assert!(result.is_ok());

        // Both recorded inputs gate the artifact now.
        let mut stamps = crate::stamp::TimestampCache::new();
        assert!(!oracle.is_stale(&mut stamps, 1, 0, &object));
        std::fs::remove_file(&header).unwrap();
        stamps.invalidate(&header);
        assert!(oracle.is_stale(&mut stamps, 1, 0, &object));
      });
    });
  }

  #[test]
  #[serial]
  fn compile_without_deps_file_records_the_source() {
    with_layout(|temp, layout| {
      let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
      runtime.block_on(async {
        let source = temp.path().join("a.cc");
        let object = temp.path().join("a.o");
        std::fs::write(&source, "x").unwrap();

        let mut queue = CommandQueue::new();
        queue.push(
          Stage::Compile,
          DeferredCommand {
            command: format!("cp {} {}", source.display(), object.display()),
            source_file: Some(source.clone()),
            destination_file: Some(object.clone()),
            package_id: 1,
          },
        );

        crate::store::ensure_dir(&layout.package_dir(1));
        let oracle = DependencyOracle::new(layout.clone());
        let (mut oracle, result) = queue.execute(&options(), &layout, oracle).await;
        assert!(result.is_ok());

        let mut stamps = crate::stamp::TimestampCache::new();
        assert!(!oracle.is_stale(&mut stamps, 1, 0, &object));
        std::fs::remove_file(&source).unwrap();
        stamps.invalidate(&source);
        assert!(oracle.is_stale(&mut stamps, 1, 0, &object));
      });
    });
  }

  #[test]
  #[serial]
  fn failed_command_output_is_captured_not_lost() {
    with_layout(|_temp, layout| {
      let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
      runtime.block_on(async {
        let mut queue = CommandQueue::new();
        queue.push(Stage::Compile, command("echo diagnostic-text >&2; exit 1"));

        let oracle = DependencyOracle::new(layout.clone());
        let (_, result) = queue.execute(&options(), &layout, oracle).await;
        assert!(result.is_err());
      });
    });
  }
}
