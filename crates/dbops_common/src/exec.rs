//! Single command execution layer
//!
//! Every external tool this crate touches (`sqlplus`, `psql`, `lsnrctl`,
//! `sendmail`, `systemctl`, `pgrep`) runs through here. The layer:
//! - sets per-target environment on the child only
//! - captures real exit code, stdout, stderr, duration
//! - returns structured results WITHOUT interpretation
//!
//! Errors are passed through exactly as received; callers decide what a
//! non-zero exit means for their operation.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Instant;
use tracing::debug;

/// Maximum output length to capture (prevent memory issues)
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Result of a command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Program that was executed
    pub program: String,
    /// Exit code (0 = success; -1 when the process was killed by a signal)
    pub exit_code: i32,
    /// Stdout (truncated if too long)
    pub stdout: String,
    /// Whether stdout was truncated
    pub stdout_truncated: bool,
    /// Stderr (truncated if too long)
    pub stderr: String,
    /// Whether stderr was truncated
    pub stderr_truncated: bool,
    /// Execution duration
    pub duration_ms: u64,
    /// Execution status
    pub status: ExecStatus,
}

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecStatus {
    /// Command ran successfully (exit code 0)
    Success,
    /// Command ran but returned non-zero exit code
    NonZeroExit,
    /// Command not found on system
    CommandNotFound,
    /// Permission denied
    PermissionDenied,
    /// Other OS error
    OsError,
}

impl ExecStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NonZeroExit => "non-zero exit",
            Self::CommandNotFound => "command not found",
            Self::PermissionDenied => "permission denied",
            Self::OsError => "OS error",
        }
    }
}

impl CommandOutput {
    pub fn ok(&self) -> bool {
        self.status == ExecStatus::Success
    }
}

fn truncate(raw: Vec<u8>) -> (String, bool) {
    let truncated = raw.len() > MAX_OUTPUT_BYTES;
    let slice = if truncated {
        &raw[..MAX_OUTPUT_BYTES]
    } else {
        &raw[..]
    };
    (String::from_utf8_lossy(slice).into_owned(), truncated)
}

/// Run a command with per-call environment and optional stdin.
///
/// Never panics and never returns Err: spawn failures are folded into
/// the status classification so callers always see one result shape.
pub fn run(
    program: &str,
    args: &[&str],
    env: &[(String, String)],
    stdin: Option<&str>,
) -> CommandOutput {
    debug!(program, ?args, "exec");
    let start = Instant::now();

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in env {
        cmd.env(key, value);
    }
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }

    let spawned = cmd.spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(err) => {
            let status = match err.kind() {
                std::io::ErrorKind::NotFound => ExecStatus::CommandNotFound,
                std::io::ErrorKind::PermissionDenied => ExecStatus::PermissionDenied,
                _ => ExecStatus::OsError,
            };
            return CommandOutput {
                program: program.to_string(),
                exit_code: -1,
                stdout: String::new(),
                stdout_truncated: false,
                stderr: err.to_string(),
                stderr_truncated: false,
                duration_ms: start.elapsed().as_millis() as u64,
                status,
            };
        }
    };

    if let Some(input) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            // Receiver closing early is not an error we can act on
            let _ = pipe.write_all(input.as_bytes());
        }
    }

    match child.wait_with_output() {
        Ok(output) => {
            let exit_code = output.status.code().unwrap_or(-1);
            let (stdout, stdout_truncated) = truncate(output.stdout);
            let (stderr, stderr_truncated) = truncate(output.stderr);
            CommandOutput {
                program: program.to_string(),
                exit_code,
                stdout,
                stdout_truncated,
                stderr,
                stderr_truncated,
                duration_ms: start.elapsed().as_millis() as u64,
                status: if exit_code == 0 {
                    ExecStatus::Success
                } else {
                    ExecStatus::NonZeroExit
                },
            }
        }
        Err(err) => CommandOutput {
            program: program.to_string(),
            exit_code: -1,
            stdout: String::new(),
            stdout_truncated: false,
            stderr: err.to_string(),
            stderr_truncated: false,
            duration_ms: start.elapsed().as_millis() as u64,
            status: ExecStatus::OsError,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_success() {
        let out = run("true", &[], &[], None);
        assert_eq!(out.status, ExecStatus::Success);
        assert_eq!(out.exit_code, 0);
    }

    #[test]
    fn test_run_non_zero_exit() {
        let out = run("false", &[], &[], None);
        assert_eq!(out.status, ExecStatus::NonZeroExit);
        assert_ne!(out.exit_code, 0);
    }

    #[test]
    fn test_run_command_not_found() {
        let out = run("definitely-not-a-real-binary-xyz", &[], &[], None);
        assert_eq!(out.status, ExecStatus::CommandNotFound);
    }

    #[test]
    fn test_run_captures_stdout() {
        let out = run("echo", &["hello"], &[], None);
        assert!(out.ok());
        assert_eq!(out.stdout.trim(), "hello");
        assert!(!out.stdout_truncated);
    }

    #[test]
    fn test_run_passes_env_to_child() {
        let env = vec![("DBOPS_EXEC_TEST".to_string(), "42".to_string())];
        let out = run("sh", &["-c", "echo $DBOPS_EXEC_TEST"], &env, None);
        assert_eq!(out.stdout.trim(), "42");
    }

    #[test]
    fn test_run_feeds_stdin() {
        let out = run("cat", &[], &[], Some("piped"));
        assert_eq!(out.stdout, "piped");
    }
}
