//! Command execution for the agent
//!
//! Handles:
//! - launching shell scripts and AppleScripts (`/bin/sh -c`, `osascript -e`)
//! - parsing shell output into named fields ([`shell`])
//! - AppleScript error filtering and retry accounting ([`osascript`])
//!
//! The probes and the dispatcher only see the [`CommandRunner`] trait, so tests
//! can script the OS answers.

pub mod osascript;
pub mod shell;

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

pub use osascript::{AppleScript, ErrorPolicy, RetryLedger};
pub use shell::{Column, CommandOutput, FieldMap, ParseRule, ShellScript};

/// Command execution errors
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("shell script {script} failed because {stderr}")]
    Shell { script: String, stderr: String },
    #[error("applescript {script} failed because {stderr}")]
    AppleScript { script: String, stderr: String },
    #[error("applescript {script} failed after {attempts} retries because {stderr}")]
    RetriesExhausted {
        script: String,
        attempts: u32,
        stderr: String,
    },
}

/// Raw result of one external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl RawOutput {
    pub fn from_stdout(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    pub fn from_stderr(stderr: impl Into<String>) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: stderr.into(),
            exit_code: Some(1),
        }
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Executes external commands on behalf of the agent.
///
/// Implementations only launch and capture; success is decided by the callers
/// (a non-empty stderr is a failure, the exit code is informational since
/// `grep` exits 1 on "no match").
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run_shell(&self, script: &str) -> Result<RawOutput, RunnerError>;

    async fn run_osascript(&self, script: &str) -> Result<RawOutput, RunnerError>;
}

/// Runner backed by the real operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    async fn capture(program: &'static str, mut command: AsyncCommand) -> Result<RawOutput, RunnerError> {
        let start_time = Instant::now();
        let output = command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| RunnerError::Spawn { program, source })?;

        debug!(
            program,
            exit_code = ?output.status.code(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "command finished"
        );

        Ok(RawOutput {
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run_shell(&self, script: &str) -> Result<RawOutput, RunnerError> {
        let mut command = AsyncCommand::new("/bin/sh");
        command.arg("-c").arg(script);
        Self::capture("/bin/sh", command).await
    }

    async fn run_osascript(&self, script: &str) -> Result<RawOutput, RunnerError> {
        let mut command = AsyncCommand::new("osascript");
        command.arg("-e").arg(script);
        Self::capture("osascript", command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_capture() {
        let output = SystemRunner.run_shell("echo 'Hello World'").await.unwrap();
        assert_eq!(output.stdout_text().trim(), "Hello World");
        assert!(output.stderr.is_empty());
        assert_eq!(output.exit_code, Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_stderr_is_captured() {
        let output = SystemRunner.run_shell("echo oops 1>&2; exit 3").await.unwrap();
        assert_eq!(output.stderr.trim(), "oops");
        assert_eq!(output.exit_code, Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_grep_without_match_is_not_an_error() {
        let output = SystemRunner.run_shell("echo abc | grep xyz").await.unwrap();
        assert!(output.stdout.is_empty());
        assert!(output.stderr.is_empty());
        assert_eq!(output.exit_code, Some(1));
    }
}
