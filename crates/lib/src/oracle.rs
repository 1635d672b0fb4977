//! The incremental-rebuild oracle.
//!
//! For every output artifact the oracle remembers the list of input
//! files that produced it (the source file plus whatever the compiler
//! reported through its dependency file). Before enqueuing a compile or
//! link step, the planner asks whether the artifact is stale; after a
//! successful compile, the worker records the discovered inputs.
//!
//! Records persist per package in a plain text file: the artifact path
//! on one line, each input on its own line, and a blank line closing the
//! record.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, error};

use crate::stamp::TimestampCache;
use crate::store::StoreLayout;

type InputsByArtifact = BTreeMap<PathBuf, Vec<PathBuf>>;

/// Per-package artifact→inputs records with a staleness decision.
#[derive(Debug, Default)]
pub struct DependencyOracle {
  layout: Option<StoreLayout>,
  by_package: HashMap<u64, InputsByArtifact>,
  dirty: HashSet<u64>,
}

impl DependencyOracle {
  pub fn new(layout: StoreLayout) -> Self {
    DependencyOracle {
      layout: Some(layout),
      by_package: HashMap::new(),
      dirty: HashSet::new(),
    }
  }

  fn record_file(&self, package_id: u64) -> Option<PathBuf> {
    self.layout.as_ref().map(|layout| layout.dependencies_file(package_id))
  }

  fn records_for(&mut self, package_id: u64) -> &mut InputsByArtifact {
    if !self.by_package.contains_key(&package_id) {
      let records = self
        .record_file(package_id)
        .and_then(|path| std::fs::read_to_string(path).ok())
        .map(|contents| parse_records(&contents))
        .unwrap_or_default();
      self.by_package.insert(package_id, records);
    }
    self.by_package.entry(package_id).or_default()
  }

  /// Decides whether an artifact must be rebuilt. An artifact is stale
  /// iff it is missing, older than `threshold_ts` (the package's
  /// consolidated metadata timestamp), has no input record, or any
  /// recorded input is missing or newer than the artifact.
  pub fn is_stale(
    &mut self,
    stamps: &mut TimestampCache,
    package_id: u64,
    threshold_ts: u64,
    artifact: &Path,
  ) -> bool {
    let artifact_ts = stamps.timestamp_of(artifact);
    if artifact_ts == 0 || threshold_ts > artifact_ts {
      return true;
    }

    let Some(inputs) = self.records_for(package_id).get(artifact) else {
      return true;
    };
    let inputs = inputs.clone();

    for input in &inputs {
      let input_ts = stamps.timestamp_of(input);
      if input_ts == 0 || input_ts > artifact_ts {
        return true;
      }
    }
    false
  }

  /// Records the inputs of an artifact, marking the package dirty only
  /// when the list actually changed.
  pub fn set_inputs(&mut self, package_id: u64, artifact: &Path, inputs: Vec<PathBuf>) {
    let records = self.records_for(package_id);
    if records.get(artifact) == Some(&inputs) {
      return;
    }
    records.insert(artifact.to_path_buf(), inputs);
    self.dirty.insert(package_id);
  }

  /// Writes the records of every package whose inputs changed this run.
  pub fn flush(&self) {
    for package_id in &self.dirty {
      let Some(path) = self.record_file(*package_id) else {
        continue;
      };
      let Some(records) = self.by_package.get(package_id) else {
        continue;
      };
      if let Err(err) = write_records(&path, records) {
        error!(path = %path.display(), error = %err, "cannot write dependency records, output cannot be cached");
      } else {
        debug!(package = package_id, records = records.len(), "flushed dependency records");
      }
    }
  }
}

fn parse_records(contents: &str) -> InputsByArtifact {
  let mut records = InputsByArtifact::new();
  let mut current: Option<PathBuf> = None;

  for line in contents.lines() {
    if line.is_empty() {
      current = None;
      continue;
    }
    match &current {
      None => {
        let artifact = PathBuf::from(line);
        records.entry(artifact.clone()).or_default();
        current = Some(artifact);
      }
      Some(artifact) => {
        if let Some(inputs) = records.get_mut(artifact) {
          inputs.push(PathBuf::from(line));
        }
      }
    }
  }
  records
}

fn write_records(path: &Path, records: &InputsByArtifact) -> std::io::Result<()> {
  let mut file = std::fs::File::create(path)?;
  for (artifact, inputs) in records {
    writeln!(file, "{}", artifact.display())?;
    for input in inputs {
      writeln!(file, "{}", input.display())?;
    }
    writeln!(file)?;
  }
  Ok(())
}

/// Parses a Make-style dependency file as emitted by Clang and GCC.
///
/// Everything up to and including the first `:` is the rule target and
/// is skipped. The remainder splits on spaces, tabs, newlines, carriage
/// returns, and line-continuation backslashes, except that `\ `
/// (backslash-space) is a literal space inside a path.
pub fn parse_make_deps(contents: &str) -> Vec<PathBuf> {
  let bytes = contents.as_bytes();
  let mut deps = Vec::new();

  let start = match contents.find(':') {
    Some(colon) => colon + 1,
    None => return deps,
  };

  let mut current = String::new();
  let mut i = start;
  while i < bytes.len() {
    let c = bytes[i];
    if c == b'\\' && i + 1 < bytes.len() && bytes[i + 1] == b' ' {
      current.push(' ');
      i += 2;
      continue;
    }
    if matches!(c, b' ' | b'\t' | b'\n' | b'\r' | b'\\') {
      if !current.is_empty() {
        deps.push(PathBuf::from(std::mem::take(&mut current)));
      }
      i += 1;
      continue;
    }
    current.push(c as char);
    i += 1;
  }
  if !current.is_empty() {
    deps.push(PathBuf::from(current));
  }
  deps
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::invocation::OptLevel;
  use serial_test::serial;
  use tempfile::TempDir;

  fn with_oracle<T>(f: impl FnOnce(&TempDir, DependencyOracle, TimestampCache) -> T) -> T {
    let temp = TempDir::new().unwrap();
    temp_env::with_var("FORGE_TEMP", Some(temp.path().to_str().unwrap()), || {
      let layout = StoreLayout::detect(OptLevel::Fast, false);
      crate::store::ensure_dir(&layout.package_dir(1));
      f(&temp, DependencyOracle::new(layout), TimestampCache::new())
    })
  }

  fn touch(path: &Path) {
    std::fs::write(path, "x").unwrap();
  }

  // ==========================================================================
  // Staleness
  // ==========================================================================

  #[test]
  #[serial]
  fn missing_artifact_is_stale() {
    with_oracle(|temp, mut oracle, mut stamps| {
      let artifact = temp.path().join("a.o");
      assert!(oracle.is_stale(&mut stamps, 1, 0, &artifact));
    });
  }

  #[test]
  #[serial]
  fn artifact_older_than_threshold_is_stale() {
    with_oracle(|temp, mut oracle, mut stamps| {
      let artifact = temp.path().join("a.o");
      touch(&artifact);
      let artifact_ts = stamps.timestamp_of(&artifact);
      assert!(oracle.is_stale(&mut stamps, 1, artifact_ts + 1, &artifact));
    });
  }

  #[test]
  #[serial]
  fn artifact_without_record_is_stale() {
    with_oracle(|temp, mut oracle, mut stamps| {
      let artifact = temp.path().join("a.o");
      touch(&artifact);
      assert!(oracle.is_stale(&mut stamps, 1, 0, &artifact));
    });
  }

  #[test]
  #[serial]
  fn recorded_up_to_date_artifact_is_fresh() {
    with_oracle(|temp, mut oracle, mut stamps| {
      let source = temp.path().join("a.cc");
      let artifact = temp.path().join("a.o");
      touch(&source);
      touch(&artifact);

      oracle.set_inputs(1, &artifact, vec![source.clone()]);
      assert!(!oracle.is_stale(&mut stamps, 1, 0, &artifact));
    });
  }

  #[test]
  #[serial]
  fn touching_an_input_makes_the_artifact_stale() {
    with_oracle(|temp, mut oracle, mut stamps| {
      let source = temp.path().join("a.cc");
      let artifact = temp.path().join("a.o");
      touch(&source);
      touch(&artifact);
      oracle.set_inputs(1, &artifact, vec![source.clone()]);
      assert!(!oracle.is_stale(&mut stamps, 1, 0, &artifact));

      // Advance the input past the artifact.
      let artifact_ts = stamps.timestamp_of(&artifact);
      let newer = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_millis(artifact_ts + 5_000);
      let file = std::fs::OpenOptions::new().write(true).open(&source).unwrap();
      file.set_modified(newer).unwrap();
      stamps.invalidate(&source);

      assert!(oracle.is_stale(&mut stamps, 1, 0, &artifact));
    });
  }

  #[test]
  #[serial]
  fn vanished_input_makes_the_artifact_stale() {
    with_oracle(|temp, mut oracle, mut stamps| {
      let source = temp.path().join("a.cc");
      let header = temp.path().join("b.h");
      let artifact = temp.path().join("a.o");
      touch(&source);
      touch(&header);
      touch(&artifact);
      oracle.set_inputs(1, &artifact, vec![source.clone(), header.clone()]);
      assert!(!oracle.is_stale(&mut stamps, 1, 0, &artifact));

      std::fs::remove_file(&header).unwrap();
      stamps.invalidate(&header);
      assert!(oracle.is_stale(&mut stamps, 1, 0, &artifact));
    });
  }

  // ==========================================================================
  // Persistence
  // ==========================================================================

  #[test]
  #[serial]
  fn records_survive_flush_and_reload() {
    with_oracle(|temp, mut oracle, mut stamps| {
      let source = temp.path().join("a.cc");
      let header = temp.path().join("b.h");
      let artifact = temp.path().join("a.o");
      touch(&source);
      touch(&header);
      touch(&artifact);

      oracle.set_inputs(1, &artifact, vec![source.clone(), header.clone()]);
      oracle.flush();

      let layout = StoreLayout::detect(OptLevel::Fast, false);
      let mut reloaded = DependencyOracle::new(layout);
      assert!(!reloaded.is_stale(&mut stamps, 1, 0, &artifact));
    });
  }

  #[test]
  #[serial]
  fn unchanged_inputs_do_not_dirty_the_package() {
    with_oracle(|temp, mut oracle, _stamps| {
      let source = temp.path().join("a.cc");
      let artifact = temp.path().join("a.o");
      oracle.set_inputs(1, &artifact, vec![source.clone()]);
      oracle.flush();
      oracle.dirty.clear();

      oracle.set_inputs(1, &artifact, vec![source]);
      assert!(oracle.dirty.is_empty());
    });
  }

  #[test]
  #[serial]
  fn record_format_is_blank_line_terminated() {
    with_oracle(|temp, mut oracle, _stamps| {
      let artifact = temp.path().join("a.o");
      let input = temp.path().join("a.cc");
      oracle.set_inputs(1, &artifact, vec![input.clone()]);
      oracle.flush();

      let layout = StoreLayout::detect(OptLevel::Fast, false);
      let contents = std::fs::read_to_string(layout.dependencies_file(1)).unwrap();
      let expected = format!("{}\n{}\n\n", artifact.display(), input.display());
      assert_eq!(contents, expected);
    });
  }

  // ==========================================================================
  // Make-style dependency files
  // ==========================================================================

  #[test]
  fn make_deps_skips_the_target() {
    let deps = parse_make_deps("a.o: /src/a.cc /include/b.h");
    assert_eq!(deps, vec![PathBuf::from("/src/a.cc"), PathBuf::from("/include/b.h")]);
  }

  #[test]
  fn make_deps_handles_continuations() {
    let deps = parse_make_deps("a.o: /src/a.cc \\\n  /include/b.h \\\r\n  /include/c.h");
    assert_eq!(
      deps,
      vec![
        PathBuf::from("/src/a.cc"),
        PathBuf::from("/include/b.h"),
        PathBuf::from("/include/c.h"),
      ]
    );
  }

  #[test]
  fn make_deps_preserves_escaped_spaces() {
    let deps = parse_make_deps("a.o: /src/my\\ file.cc /other.h");
    assert_eq!(deps, vec![PathBuf::from("/src/my file.cc"), PathBuf::from("/other.h")]);
  }

  #[test]
  fn make_deps_round_trips_spaced_paths() {
    let paths = ["/a/one two.cc", "/b/three.h", "/c/sp ace/d.h"];
    let encoded = format!(
      "out.o: {}",
      paths.iter().map(|p| p.replace(' ', "\\ ")).collect::<Vec<_>>().join(" ")
    );
    let deps = parse_make_deps(&encoded);
    let expected: Vec<PathBuf> = paths.iter().map(PathBuf::from).collect();
    assert_eq!(deps, expected);
  }

  #[test]
  fn make_deps_without_colon_is_empty() {
    assert!(parse_make_deps("no colon here").is_empty());
  }

  #[test]
  fn make_deps_drops_empty_segments() {
    let deps = parse_make_deps("a.o:   /x.h  \n\n  /y.h  ");
    assert_eq!(deps, vec![PathBuf::from("/x.h"), PathBuf::from("/y.h")]);
  }
}
