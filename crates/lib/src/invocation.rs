//! The decoded command-line invocation.
//!
//! The CLI crate owns argument parsing; what crosses into the library is
//! this plain value describing what one run should do.

/// The action a forge invocation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
  /// Build the input packages.
  Build,
  /// Build, then run each input application.
  #[default]
  Run,
  /// Delete the current configuration's scratch tree.
  Clean,
  /// Additionally delete the cached repositories tree.
  DeepClean,
  /// Build and run unit tests for the input packages.
  Test,
  /// List all known packages.
  List,
  /// Emit tooling-hint files for the input packages.
  GenerateTooling,
  /// Print shell-completion candidates.
  Complete,
}

/// How aggressively to optimize. Selects the scratch tree and is handed
/// to the config evaluator as the `optimization_level` global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptLevel {
  /// All debug symbols, no optimization.
  Debug,
  /// Build quickly with light optimization.
  #[default]
  Fast,
  /// Aggressive whole-program optimization.
  Optimized,
}

impl OptLevel {
  pub fn as_str(self) -> &'static str {
    match self {
      OptLevel::Debug => "debug",
      OptLevel::Fast => "fast",
      OptLevel::Optimized => "optimized",
    }
  }
}

impl std::fmt::Display for OptLevel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One decoded invocation.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
  pub action: Action,
  pub opt_level: OptLevel,
  /// Raw positional inputs: names, paths, or nothing.
  pub inputs: Vec<String>,
  /// Apply the action to every known package instead of the inputs.
  pub all: bool,
  /// Print every command and serialize execution.
  pub verbose: bool,
  /// Refresh third-party state before acting. Accepted for
  /// compatibility; the fetcher pipeline lives outside this tool.
  pub update: bool,
  /// The word being completed when `action` is [`Action::Complete`].
  pub completion_target: String,
}

impl Invocation {
  /// The raw inputs this run operates on.
  ///
  /// No inputs means "the current directory", except inside an isolated
  /// universe (a local config at the working directory root) where an
  /// empty input list stays empty.
  pub fn raw_inputs(&self, local_config: bool) -> Vec<String> {
    if self.inputs.is_empty() {
      if local_config {
        Vec::new()
      } else {
        vec![String::new()]
      }
    } else {
      self.inputs.clone()
    }
  }
}
