//! Command gateway: the only place external processes are run.
//!
//! This module defines the [`CommandGateway`] trait consumed by the
//! orchestrators, the [`ShellCommand`] value it executes, the dry-run rewrite,
//! the SSH login wrapper for remote commands, and [`ShellGateway`], the
//! implementation backed by `tokio::process`.

use crate::error::{Result, ToolsError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

/// A shell command line plus whether it changes state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    line: String,
    mutating: bool,
}

impl ShellCommand {
    /// A listing command; runs for real even in dry-run mode.
    pub fn read_only(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            mutating: false,
        }
    }

    /// A command that changes state; echoed instead of run in dry-run mode.
    pub fn mutating(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            mutating: true,
        }
    }

    /// The command line as configured.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Whether the command changes state.
    pub fn is_mutating(&self) -> bool {
        self.mutating
    }

    /// The line that is actually handed to the shell.
    pub fn rendered(&self, dry_run: bool) -> String {
        if dry_run && self.mutating {
            format!("echo {}", shell_quote(&self.line))
        } else {
            self.line.clone()
        }
    }
}

/// Single-quote `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// SSH parameters for the replication target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLogin {
    /// Host name or IP address.
    pub host: String,
    /// SSH port.
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Private key passed with `-i`.
    pub key_path: PathBuf,
    /// Remote user.
    pub user: String,
}

fn default_ssh_port() -> u16 {
    22
}

impl RemoteLogin {
    /// `ssh -p <port> -i <key> <user>@<host>`
    pub fn prefix(&self) -> String {
        format!(
            "ssh -p {} -i {} {}@{}",
            self.port,
            self.key_path.display(),
            self.user,
            self.host
        )
    }

    /// Run `command` on the remote host. Mutability is preserved.
    pub fn wrap(&self, command: &ShellCommand) -> ShellCommand {
        ShellCommand {
            line: format!("{} {}", self.prefix(), command.line),
            mutating: command.mutating,
        }
    }

    /// Reject empty fields.
    pub fn validate(&self) -> Result<()> {
        let missing = if self.host.trim().is_empty() {
            Some("remote.host")
        } else if self.user.trim().is_empty() {
            Some("remote.user")
        } else if self.key_path.as_os_str().is_empty() {
            Some("remote.key_path")
        } else if self.port == 0 {
            Some("remote.port")
        } else {
            None
        };
        match missing {
            Some(name) => Err(ToolsError::MissingParameter {
                name: name.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Raw standard output.
    pub stdout: Vec<u8>,
    /// Raw standard error.
    pub stderr: Vec<u8>,
    /// Exit status.
    pub status: i32,
}

impl CommandOutput {
    /// A successful result with the given stdout.
    pub fn success(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: Vec::new(),
            status: 0,
        }
    }

    /// Non-empty, trimmed stdout lines (lossy UTF-8).
    pub fn stdout_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Executes shell commands, locally or through an SSH wrapper already applied
/// to the command line.
///
/// Implementations must apply the dry-run rewrite ([`ShellCommand::rendered`])
/// and report a non-zero exit as [`ToolsError::CommandFailed`].
#[async_trait]
pub trait CommandGateway: Send + Sync {
    /// Run `command` to completion.
    async fn execute(&self, command: &ShellCommand, dry_run: bool) -> Result<CommandOutput>;
}

#[async_trait]
impl<T: CommandGateway + ?Sized> CommandGateway for Arc<T> {
    async fn execute(&self, command: &ShellCommand, dry_run: bool) -> Result<CommandOutput> {
        (**self).execute(command, dry_run).await
    }
}

/// Default shell used to interpret command lines.
pub const DEFAULT_SHELL_PATH: &str = "/bin/bash";

/// Gateway that runs `<shell> -c <line>` as a child process.
#[derive(Debug, Clone)]
pub struct ShellGateway {
    shell_path: PathBuf,
    timeout: Option<Duration>,
}

impl Default for ShellGateway {
    fn default() -> Self {
        Self::new(DEFAULT_SHELL_PATH)
    }
}

impl ShellGateway {
    /// Gateway using the given shell and no timeout.
    pub fn new(shell_path: impl Into<PathBuf>) -> Self {
        Self {
            shell_path: shell_path.into(),
            timeout: None,
        }
    }

    /// Apply a per-command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl CommandGateway for ShellGateway {
    async fn execute(&self, command: &ShellCommand, dry_run: bool) -> Result<CommandOutput> {
        let line = command.rendered(dry_run);
        tracing::info!(command = %line, dry_run, "executing command");

        let mut cmd = tokio::process::Command::new(&self.shell_path);
        cmd.arg("-c")
            .arg(&line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, cmd.output())
                .await
                .map_err(|_| {
                    tracing::error!(command = %line, ?timeout, "command timed out");
                    ToolsError::CommandTimeout {
                        command: line.clone(),
                        timeout_secs: timeout.as_secs(),
                    }
                })?,
            None => cmd.output().await,
        }
        .map_err(|source| ToolsError::CommandSpawn {
            command: line.clone(),
            source,
        })?;

        let result = CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
            tracing::warn!(command = %line, status = result.status, %stderr, "command failed");
            return Err(ToolsError::CommandFailed {
                command: line,
                status: result.status,
                stderr,
            });
        }

        tracing::debug!(
            command = %line,
            stdout = %String::from_utf8_lossy(&result.stdout),
            stderr = %String::from_utf8_lossy(&result.stderr),
            "command succeeded"
        );
        Ok(result)
    }
}
