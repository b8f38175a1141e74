//! Process execution seam for device commands.
//!
//! Everything that touches the adb binary goes through `CommandRunner`, so
//! the connection manager and workers can be driven by a scripted runner in
//! tests.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::error::ConnectionError;

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(1),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Error text used for failure classification: stderr, or stdout when
    /// stderr is empty.
    pub fn error_text(&self) -> String {
        match self.stderr.trim() {
            "" => self.stdout.trim().to_string(),
            err => err.to_string(),
        }
    }
}

/// Runs external programs on behalf of the connection layer.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion, capturing output. Exceeding `timeout` kills the
    /// process and returns `ConnectionError::Timeout`.
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ConnectionError>;

    /// Start a long-lived process whose stdout is piped for streaming.
    fn spawn(&self, program: &str, args: &[String]) -> Result<Child, ConnectionError>;
}

/// Runner backed by real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct AdbRunner;

#[async_trait]
impl CommandRunner for AdbRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ConnectionError> {
        let rendered = render_command(program, args);
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ConnectionError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                success: output.status.success(),
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }),
            Ok(Err(source)) => Err(ConnectionError::Spawn {
                command: rendered,
                source,
            }),
            // Dropping the wait future drops the child, which kills it.
            Err(_) => Err(ConnectionError::Timeout {
                command: rendered,
                timeout,
            }),
        }
    }

    fn spawn(&self, program: &str, args: &[String]) -> Result<Child, ConnectionError> {
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ConnectionError::Spawn {
                command: render_command(program, args),
                source,
            })
    }
}

/// Render a command line for logs and error messages.
pub fn render_command(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn captures_stdout_and_status() {
        let output = AdbRunner
            .run("sh", &args(&["-c", "echo hello"]), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn captures_failure_stderr() {
        let output = AdbRunner
            .run(
                "sh",
                &args(&["-c", "echo 'error: device offline' >&2; exit 1"]),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert!(!output.success);
        assert_eq!(output.code, Some(1));
        assert!(output.error_text().contains("device offline"));
    }

    #[tokio::test]
    async fn times_out_long_commands() {
        let result = AdbRunner
            .run("sleep", &args(&["10"]), Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(ConnectionError::Timeout { .. })));
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let result = AdbRunner
            .run("definitely-not-a-real-adb", &[], Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(ConnectionError::Spawn { .. })));
    }

    #[test]
    fn error_text_prefers_stderr() {
        let output = CommandOutput {
            success: false,
            code: Some(1),
            stdout: String::new(),
            stderr: "error: device 'abc' not found\n".into(),
        };
        assert_eq!(output.error_text(), "error: device 'abc' not found");
    }

    #[test]
    fn error_text_ignores_stdout_when_stderr_present() {
        let output = CommandOutput {
            success: false,
            code: Some(1),
            stdout: "wifi: offline\n".into(),
            stderr: "Permission denied\n".into(),
        };
        assert_eq!(output.error_text(), "Permission denied");

        let output = CommandOutput {
            stderr: String::new(),
            ..output
        };
        assert_eq!(output.error_text(), "wifi: offline");
    }
}
