//! Editor tooling hints.
//!
//! Emits a `.clangd` file into each input package so language servers
//! see the same defines, include paths, and flags the build uses. The
//! file is rewritten only when it is older than the package's
//! consolidated metadata.

use std::fmt::Write as _;

use tracing::{debug, error};

use crate::context::BuildContext;
use crate::metadata::{self, PackageMetadata};

const TOOLING_FILE: &str = ".clangd";

/// Extensions whose build command stands in for "the C++ command".
const CPP_EXTENSIONS: &[&str] = &[".cc", ".cpp", ".cxx"];
const C_EXTENSIONS: &[&str] = &[".c"];

/// Emits (or refreshes) the tooling hint for one package.
pub fn generate_for_package(ctx: &mut BuildContext, name: &str) -> Result<(), metadata::ResolveError> {
  let metadata = metadata::resolve(ctx, name)?.clone();

  let hint_path = metadata.package_path.join(TOOLING_FILE);
  if ctx.stamps.exists(&hint_path) && ctx.stamps.timestamp_of(&hint_path) >= metadata.metadata_timestamp {
    debug!(package = name, "tooling hint is up to date");
    return Ok(());
  }

  let contents = render(&metadata);
  if let Err(err) = std::fs::write(&hint_path, contents) {
    error!(path = %hint_path.display(), error = %err, "failed to write tooling hint");
    return Ok(());
  }
  ctx.stamps.invalidate(&hint_path);
  debug!(package = name, path = %hint_path.display(), "wrote tooling hint");
  Ok(())
}

fn first_command(metadata: &PackageMetadata, extensions: &[&str]) -> Option<String> {
  extensions
    .iter()
    .find_map(|extension| metadata.build_commands.get(*extension).cloned())
}

fn render(metadata: &PackageMetadata) -> String {
  let cpp_command = first_command(metadata, CPP_EXTENSIONS);
  let c_command = first_command(metadata, C_EXTENSIONS);

  let default_command = cpp_command
    .clone()
    .or_else(|| c_command.clone())
    .or_else(|| metadata.build_commands.values().next().cloned())
    .unwrap_or_default();

  let mut out = String::new();
  render_flags_block(
    &mut out,
    &extract_flags(&default_command),
    &metadata.consolidated_includes,
    &metadata.consolidated_defines,
  );

  // When C++ is the default and a distinct C command exists, a
  // conditional block keeps .c files on the C flags.
  if let (Some(_), Some(c_command)) = (cpp_command, c_command) {
    out.push_str("---\n");
    out.push_str("If:\n");
    out.push_str("  PathMatch: .*\\.c\n");
    render_flags_block(&mut out, &extract_flags(&c_command), &[], &[]);
  }

  out
}

fn render_flags_block(
  out: &mut String,
  flags: &[String],
  includes: &[std::path::PathBuf],
  defines: &[String],
) {
  out.push_str("CompileFlags:\n");
  out.push_str("  Add: [\n");
  for include in includes {
    let absolute = forge_platform::paths::normalize(include);
    let _ = writeln!(out, "    \"-I{}\",", absolute.display());
  }
  for define in defines {
    let _ = writeln!(out, "    -D{define},");
  }
  for flag in flags {
    let _ = writeln!(out, "    {flag},");
  }
  out.push_str("  ]\n");
}

/// Mines compiler flags out of a build command template: every
/// `-`-prefixed token that is not the executable and not a placeholder
/// fragment.
fn extract_flags(command: &str) -> Vec<String> {
  command
    .split(' ')
    .filter(|segment| !segment.is_empty())
    .skip(1)
    .filter(|segment| !segment.contains("${") && !segment.contains('}'))
    .filter(|segment| segment.starts_with('-'))
    .map(str::to_string)
    .collect()
}
