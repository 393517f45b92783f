use std::process::{Command, Output, Stdio};

use tracing::debug;

use crate::error::{DeployError, DeployResult};

/// Executes external programs. Every cloud and remote call goes
/// through this seam so the workflow can be driven without real
/// CLIs.
pub trait CommandRunner {
    /// Run a command and capture its output. Fails if the command
    /// returns a non-zero exit code.
    fn run(&self, program: &str, args: &[&str]) -> DeployResult<String>;

    /// Run a command with stdin/stdout/stderr inherited.
    fn run_interactive(&self, program: &str, args: &[&str]) -> DeployResult<()>;

    /// Check if a command exists on PATH.
    fn command_exists(&self, program: &str) -> bool;
}

/// Runs commands on the local machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct System;

impl CommandRunner for System {
    fn run(&self, program: &str, args: &[&str]) -> DeployResult<String> {
        debug!(command = %format_command(program, args), "running");
        let output = spawn(program, args)?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            debug!(%stderr, "command failed");
            Err(DeployError::CommandFailed {
                command: format_command(program, args),
                code: output.status.code(),
                stderr,
            })
        }
    }

    fn run_interactive(&self, program: &str, args: &[&str]) -> DeployResult<()> {
        debug!(command = %format_command(program, args), "running interactively");
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| not_found_or_io(program, e))?;

        if status.success() {
            Ok(())
        } else {
            Err(DeployError::CommandFailed {
                command: format_command(program, args),
                code: status.code(),
                stderr: String::new(),
            })
        }
    }

    fn command_exists(&self, program: &str) -> bool {
        Command::new("which")
            .arg(program)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }
}

/// Quote a value for safe interpolation into a POSIX shell
/// command line.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:@=+,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[must_use]
pub fn format_command(program: &str, args: &[&str]) -> String {
    let mut parts = vec![program.to_string()];
    parts.extend(args.iter().map(|a| (*a).to_string()));
    parts.join(" ")
}

fn spawn(program: &str, args: &[&str]) -> DeployResult<Output> {
    Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| not_found_or_io(program, e))
}

fn not_found_or_io(program: &str, e: std::io::Error) -> DeployError {
    if e.kind() == std::io::ErrorKind::NotFound {
        DeployError::CommandNotFound(program.to_string())
    } else {
        DeployError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_plain_values_unchanged() {
        assert_eq!(shell_quote("demo.example.com"), "demo.example.com");
        assert_eq!(shell_quote("gs://bucket/a.tar.gz"), "gs://bucket/a.tar.gz");
    }

    #[test]
    fn quote_wraps_spaces_and_quotes() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("$HOME"), "'$HOME'");
    }

    #[test]
    fn format_joins_args() {
        assert_eq!(
            format_command("gcloud", &["compute", "instances", "list"]),
            "gcloud compute instances list"
        );
    }
}
