//! Shell command execution.
//!
//! Commands come to us as full shell strings (the config templates are
//! written that way), so everything funnels through the system shell:
//! `/bin/sh -c` on Unix, `cmd.exe /C` on Windows.

use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

/// The outcome of a captured command.
#[derive(Debug)]
pub struct CapturedRun {
    /// Whether the command exited successfully.
    pub success: bool,
    /// Interleaved stdout followed by stderr.
    pub output: String,
}

fn shell_command(command: &str) -> Command {
    #[cfg(unix)]
    {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(command);
        cmd
    }
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd.exe");
        cmd.arg("/C").arg(command);
        cmd
    }
}

/// Runs a command, capturing its combined output.
///
/// stderr is folded into the same buffer as stdout so a failing command
/// can be replayed to the user as one block. Spawn failures are reported
/// the same way as nonzero exits: an unsuccessful run whose output
/// explains what happened.
pub async fn run_captured(command: &str) -> CapturedRun {
    debug!(command = %command, "spawning captured command");

    let mut child = match shell_command(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            return CapturedRun {
                success: false,
                output: format!("Unknown error executing: {command}\n{err}\n"),
            };
        }
    };

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut output = String::new();

    // Drain both pipes before waiting so a chatty child cannot dead-lock
    // against a full pipe buffer.
    if let Some(ref mut pipe) = stdout {
        let mut buffer = Vec::new();
        let _ = pipe.read_to_end(&mut buffer).await;
        output.push_str(&String::from_utf8_lossy(&buffer));
    }
    if let Some(ref mut pipe) = stderr {
        let mut buffer = Vec::new();
        let _ = pipe.read_to_end(&mut buffer).await;
        output.push_str(&String::from_utf8_lossy(&buffer));
    }

    let success = match child.wait().await {
        Ok(status) => status.success(),
        Err(err) => {
            output.push_str(&format!("Error waiting on: {command}\n{err}\n"));
            false
        }
    };

    if !success {
        let mut annotated = format!("Error executing: {command}\n");
        annotated.push_str(&output);
        return CapturedRun {
            success: false,
            output: annotated,
        };
    }

    CapturedRun { success, output }
}

/// Runs a command in the foreground, inheriting this process's stdio.
///
/// Used for the run stage and for verbose mode, where output legibility
/// beats parallelism. Returns whether the command succeeded.
pub async fn run_foreground(command: &str) -> bool {
    debug!(command = %command, "spawning foreground command");

    match shell_command(command).status().await {
        Ok(status) => status.success(),
        Err(err) => {
            eprintln!("Unknown error executing: {command}\n{err}");
            false
        }
    }
}

/// Quotes a path for interpolation into a shell command string.
pub fn quote(path: &std::path::Path) -> String {
    format!("{:?}", path.display().to_string())
}
