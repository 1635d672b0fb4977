//! Named-token substitution for command and path templates.
//!
//! Config templates carry `${name}` tokens (`${in}`, `${out}`,
//! `${cdefines}`, ...). Most are resolved from a table owned by the
//! build context; `${deps file}` is special and is resolved per worker
//! at execution time. To survive table expansion, the deferred token is
//! pre-registered to itself, making it a fixed point of [`PlaceholderTable::expand_in_place`].

use std::collections::HashMap;

use tracing::warn;

/// The one token whose resolution is deferred until a worker picks the
/// command up.
pub const DEPS_FILE_TOKEN: &str = "${deps file}";

/// A table of `name -> replacement` entries.
#[derive(Debug)]
pub struct PlaceholderTable {
  values: HashMap<String, String>,
}

impl Default for PlaceholderTable {
  fn default() -> Self {
    let mut values = HashMap::new();
    // Fixed point: expanding "${deps file}" yields "${deps file}".
    values.insert("deps file".to_string(), DEPS_FILE_TOKEN.to_string());
    PlaceholderTable { values }
  }
}

impl PlaceholderTable {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers a replacement. The name excludes the `${}` syntax:
  /// `set("abc", ...)` serves `${abc}`.
  pub fn set(&mut self, name: &str, value: impl Into<String>) {
    self.values.insert(name.to_string(), value.into());
  }

  /// Rewrites every `${...}` span in place.
  ///
  /// Unknown tokens are replaced with the empty string (with a
  /// diagnostic). Scanning resumes after each replacement rather than
  /// from the start, so replacement text containing `${...}` is never
  /// re-expanded. A `${` without a closing `}` ends the scan.
  pub fn expand_in_place(&self, text: &mut String) {
    let mut pos = 0;
    while let Some(start) = text[pos..].find("${") {
      let start = pos + start;
      let Some(end) = text[start + 2..].find('}') else {
        break;
      };
      let end = start + 2 + end;
      let name = &text[start + 2..end];

      match self.values.get(name) {
        Some(value) => {
          let value = value.clone();
          text.replace_range(start..=end, &value);
          pos = start + value.len();
        }
        None => {
          warn!(placeholder = name, "encountered unknown placeholder");
          text.replace_range(start..=end, "");
          pos = start;
        }
      }
    }
  }

  /// Convenience wrapper returning the expanded copy.
  pub fn expand(&self, text: &str) -> String {
    let mut out = text.to_string();
    self.expand_in_place(&mut out);
    out
  }
}

/// Replaces the first occurrence of `token` (full `${...}` form) with
/// `value`. Returns whether the token was found. This is the tool for
/// the per-file `${in}`/`${out}` substitutions and for the per-worker
/// `${deps file}` pass, where the replacement must not consult the
/// table.
pub fn replace_first(text: &mut String, token: &str, value: &str) -> bool {
  let Some(index) = text.find(token) else {
    return false;
  };
  text.replace_range(index..index + token.len(), value);
  true
}
