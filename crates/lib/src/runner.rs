//! Top-level orchestration: decode the action, run the pipeline.
//!
//! One call to [`execute`] is one forge invocation. It builds the
//! [`BuildContext`], dispatches on the action, and flushes the mutated
//! persistent stores whether or not the action succeeded.

use std::collections::HashSet;

use thiserror::Error;
use tracing::{info, warn};

use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::context::BuildContext;
use crate::invocation::{Action, Invocation};
use crate::metadata::{self, ResolveError};
use crate::planner::{self, Planner};
use crate::queue::{CommandQueue, ExecuteOptions, QueueError};
use crate::tooling;

/// The flags the CLI accepts, for shell completion.
pub const KNOWN_FLAGS: &[&str] = &[
  "--all",
  "--build",
  "--clean",
  "--complete",
  "--debug",
  "--deep-clean",
  "--fast",
  "--generate-tooling-hint",
  "--help",
  "--list",
  "--optimized",
  "--run",
  "--test",
  "--update",
  "--verbose",
];

/// Errors that make an invocation exit nonzero.
#[derive(Debug, Error)]
pub enum RunError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Catalog(#[from] CatalogError),

  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  Queue(#[from] QueueError),

  #[error("nothing to run")]
  NothingToRun,

  #[error("{0} is not implemented")]
  Unsupported(&'static str),
}

/// Runs one invocation end to end.
pub async fn execute(invocation: Invocation) -> Result<(), RunError> {
  let mut ctx = BuildContext::new(invocation)?;

  if ctx.invocation.update {
    warn!("third-party updating is handled by the repositories pipeline and is not built in");
  }

  let result = dispatch(&mut ctx).await;
  ctx.flush();
  result
}

async fn dispatch(ctx: &mut BuildContext) -> Result<(), RunError> {
  match ctx.invocation.action {
    Action::Build => build(ctx, false).await,
    Action::Run => build(ctx, true).await,
    Action::Clean => {
      info!(path = %ctx.layout.temp_dir().display(), "cleaning current configuration");
      ctx.layout.clean_current();
      Ok(())
    }
    Action::DeepClean => {
      info!("deep-cleaning scratch state and cached repositories");
      ctx.layout.clean_all();
      Ok(())
    }
    Action::List => {
      list_packages(ctx);
      Ok(())
    }
    Action::Test => Err(RunError::Unsupported("testing")),
    Action::GenerateTooling => generate_tooling(ctx),
    Action::Complete => {
      print_completions(ctx);
      Ok(())
    }
  }
}

/// Plans every input package, optionally enqueues run commands, and
/// executes the queue.
async fn build(ctx: &mut BuildContext, then_run: bool) -> Result<(), RunError> {
  let inputs = ctx.input_package_names()?;
  let mut queue = CommandQueue::new();
  let mut planner = Planner::new();

  for name in &inputs {
    planner.plan_package(ctx, &mut queue, name)?;
  }

  if then_run {
    plan_runs(ctx, &mut queue, &inputs)?;
  }

  if queue.is_empty() {
    info!("everything is up to date");
    return Ok(());
  }

  info!(commands = queue.len(), "executing build");
  let options = ExecuteOptions {
    parallel_tasks: ctx.config.parallel_tasks(),
    verbose: ctx.invocation.verbose,
  };
  let oracle = std::mem::take(&mut ctx.oracle);
  let (oracle, result) = queue.execute(&options, &ctx.layout, oracle).await;
  ctx.oracle = oracle;
  result.map_err(Into::into)
}

/// Enqueues what `--run` should execute: the configured global run
/// command when one exists, otherwise each input application.
fn plan_runs(ctx: &mut BuildContext, queue: &mut CommandQueue, inputs: &[String]) -> Result<(), RunError> {
  if let Some(template) = ctx.config.run_command().map(str::to_string) {
    planner::plan_global_run(ctx, queue, &template);
    return Ok(());
  }

  let mut planned: HashSet<String> = HashSet::new();
  let mut runnable = 0;
  for name in inputs {
    if !planned.insert(name.clone()) {
      continue;
    }
    let metadata = metadata::resolve(ctx, name)?;
    if metadata.is_application() && !metadata.should_skip {
      planner::plan_run(queue, metadata);
      runnable += 1;
    }
  }

  if runnable == 0 {
    return Err(RunError::NothingToRun);
  }
  Ok(())
}

fn list_packages(ctx: &BuildContext) {
  println!("All known packages:");
  for (name, path) in ctx.catalog.iter() {
    println!(" {}: {}", name, path.display());
  }
}

fn generate_tooling(ctx: &mut BuildContext) -> Result<(), RunError> {
  for name in ctx.input_package_names()? {
    if let Err(err) = tooling::generate_for_package(ctx, &name) {
      warn!(package = %name, error = %err, "skipping tooling hint");
    }
  }
  Ok(())
}

/// Prints completion candidates for the word under the cursor: flags
/// when it starts with a dash, package names otherwise.
fn print_completions(ctx: &BuildContext) {
  let target = ctx.invocation.completion_target.as_str();

  if target.starts_with('-') || target.is_empty() {
    for flag in KNOWN_FLAGS {
      if flag.starts_with(target) {
        println!("{flag}");
      }
    }
  }
  if !target.starts_with('-') {
    for name in ctx.catalog.names() {
      if name.starts_with(target) {
        println!("{name}");
      }
    }
  }
}
