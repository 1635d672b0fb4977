//! The config-language evaluator.
//!
//! Config files are Lua. A package's effective configuration is the
//! global chunks followed by the package chunk, executed top to bottom
//! in one fresh interpreter, so later chunks override the globals set by
//! earlier ones. The recognized globals are then collected into a
//! [`RawConfig`].
//!
//! The interpreter presets one global, `optimization_level`, holding
//! "debug", "fast", or "optimized".

use mlua::{Lua, LuaSerdeExt, Value};

use super::{ConfigError, RawConfig};

/// The config globals forge recognizes. Everything else a chunk defines
/// is scratch space for the chunk itself.
const RECOGNIZED_KEYS: &[&str] = &[
  "package_type",
  "build_commands",
  "linker_command",
  "shared_linker_command",
  "static_linker_command",
  "output_extension",
  "run_command",
  "parallel_tasks",
  "include_priority",
  "should_skip",
  "no_output_file",
  "statically_link",
  "source_directories",
  "package_directories",
  "public_include_directories",
  "include_directories",
  "public_defines",
  "defines",
  "dependencies",
  "files_to_ignore",
  "asset_directories",
  "destination_directory",
];

/// One config chunk: a display name for error messages plus source text.
pub struct Chunk<'a> {
  pub name: String,
  pub contents: &'a str,
}

/// Evaluates the chunks in order and collects the recognized globals.
pub fn evaluate(chunks: &[Chunk<'_>], optimization_level: &str) -> Result<RawConfig, ConfigError> {
  let lua = Lua::new();
  lua.globals().set("optimization_level", optimization_level)?;

  for chunk in chunks {
    lua.load(chunk.contents).set_name(chunk.name.as_str()).exec()?;
  }

  collect(&lua)
}

fn collect(lua: &Lua) -> Result<RawConfig, ConfigError> {
  let globals = lua.globals();
  let recognized = lua.create_table()?;
  for key in RECOGNIZED_KEYS {
    let value: Value = globals.get(*key)?;
    if !value.is_nil() {
      recognized.set(*key, value)?;
    }
  }
  Ok(lua.from_value(Value::Table(recognized))?)
}
