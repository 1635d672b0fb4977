//! Well-known filesystem locations.

use std::path::PathBuf;

/// Returns the user's home directory.
///
/// Checks `$HOME` (POSIX) and `%USERPROFILE%` (Windows) through the
/// `dirs` crate. Falls back to `.` when neither is set, which at least
/// keeps relative paths usable.
pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the root for machine-wide scratch state.
///
/// `FORGE_TEMP` overrides the location, which is how the test suites
/// isolate themselves from the real system temp directory.
pub fn system_temp_root() -> PathBuf {
    if let Ok(path) = std::env::var("FORGE_TEMP") {
        return PathBuf::from(path);
    }
    std::env::temp_dir().join("forge")
}

/// Returns the path of the global config file.
///
/// `FORGE_CONFIG` overrides the default of `~/.forge.lua`.
pub fn global_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("FORGE_CONFIG") {
        return PathBuf::from(path);
    }
    home_dir().join(".forge.lua")
}

/// Normalizes a path into a weakly-canonical absolute form.
///
/// The path is made absolute against the current directory and then
/// simplified lexically (`.` removed, `..` folded into its parent).
/// Unlike `std::fs::canonicalize` this never touches the filesystem, so
/// it works for paths that do not exist yet.
pub fn normalize(path: &std::path::Path) -> PathBuf {
    use std::path::Component;

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
