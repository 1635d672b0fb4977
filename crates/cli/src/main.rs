//! forge: a polyglot package-oriented build orchestrator.
//!
//! Positional arguments are input packages (names, or paths when they
//! start with `.` or `/`). With no packages the working directory is the
//! package, unless a local `.forge.lua` marks an isolated universe.

#[allow(dead_code)]
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use forge_lib::invocation::{Action, Invocation, OptLevel};
use forge_lib::runner;

#[derive(Parser)]
#[command(name = "forge")]
#[command(version, about = "Build, run, and manage source packages")]
struct Cli {
  /// Input packages: names, or paths starting with '.' or '/'.
  packages: Vec<String>,

  /// Build but don't run.
  #[arg(long)]
  build: bool,

  /// Build and run the packages. (Default)
  #[arg(long)]
  run: bool,

  /// Delete the temp files for the current configuration.
  #[arg(long)]
  clean: bool,

  /// Delete all temp files and any cached repositories.
  #[arg(long = "deep-clean")]
  deep_clean: bool,

  /// List all known packages with their names and paths, then exit.
  #[arg(long)]
  list: bool,

  /// Build and run unit tests for the packages.
  #[arg(long)]
  test: bool,

  /// Generate editor tooling hints for the packages.
  #[arg(long = "generate-tooling-hint")]
  generate_tooling_hint: bool,

  /// Print shell-completion candidates. Receives the completion
  /// context: command name, current word, previous word.
  #[arg(long, num_args = 0..=3, value_name = "CONTEXT", allow_hyphen_values = true)]
  complete: Option<Vec<String>>,

  /// Apply the action to all known packages instead of the inputs.
  #[arg(long)]
  all: bool,

  /// Build with all debug symbols.
  #[arg(long)]
  debug: bool,

  /// Build quickly, with some optimizations enabled. (Default)
  #[arg(long)]
  fast: bool,

  /// Build with all optimizations enabled.
  #[arg(long)]
  optimized: bool,

  /// Update third-party packages before acting.
  #[arg(long)]
  update: bool,

  /// Print every command being run and stream its output.
  #[arg(long)]
  verbose: bool,
}

impl Cli {
  fn into_invocation(self) -> Invocation {
    let completion_target = self
      .complete
      .as_ref()
      .and_then(|context| context.get(1).cloned())
      .unwrap_or_default();

    let action = if self.complete.is_some() {
      Action::Complete
    } else if self.deep_clean {
      Action::DeepClean
    } else if self.clean {
      Action::Clean
    } else if self.list {
      Action::List
    } else if self.test {
      Action::Test
    } else if self.generate_tooling_hint {
      Action::GenerateTooling
    } else if self.build && !self.run {
      Action::Build
    } else {
      Action::Run
    };

    let opt_level = if self.debug {
      OptLevel::Debug
    } else if self.optimized {
      OptLevel::Optimized
    } else {
      OptLevel::Fast
    };

    Invocation {
      action,
      opt_level,
      inputs: self.packages,
      all: self.all,
      verbose: self.verbose,
      update: self.update,
      completion_target,
    }
  }
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
  FmtSubscriber::builder()
    .with_max_level(level)
    .with_target(false)
    .without_time()
    .with_writer(std::io::stderr)
    .init();

  let invocation = cli.into_invocation();
  let runtime = tokio::runtime::Runtime::new().context("failed to create async runtime")?;

  if let Err(err) = runtime.block_on(runner::execute(invocation)) {
    output::print_error(&err.to_string());
    std::process::exit(1);
  }
  Ok(())
}
