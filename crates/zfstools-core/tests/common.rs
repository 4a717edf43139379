//! Scripted command gateway shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use zfstools_core::{
    CommandGateway, CommandOutput, CommonConfig, RemoteLogin, Result, ShellCommand, ToolsError,
};

/// Records every rendered command and answers listings from a script.
#[derive(Default)]
pub struct MockGateway {
    responses: Mutex<HashMap<String, String>>,
    failures: Mutex<Vec<String>>,
    log: Mutex<Vec<(String, bool)>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `line` with one output line per entry.
    pub fn respond(&self, line: &str, lines: &[&str]) {
        let mut stdout = lines.join("\n");
        stdout.push('\n');
        self.responses
            .lock()
            .unwrap()
            .insert(line.to_string(), stdout);
    }

    /// Fail every command whose line contains `needle`.
    pub fn fail_on(&self, needle: &str) {
        self.failures.lock().unwrap().push(needle.to_string());
    }

    /// Every command as handed to the shell, in order.
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().iter().map(|(l, _)| l.clone()).collect()
    }

    /// Mutating commands only, as handed to the shell.
    pub fn mutations(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, mutating)| *mutating)
            .map(|(l, _)| l.clone())
            .collect()
    }
}

#[async_trait]
impl CommandGateway for MockGateway {
    async fn execute(&self, command: &ShellCommand, dry_run: bool) -> Result<CommandOutput> {
        let rendered = command.rendered(dry_run);
        self.log
            .lock()
            .unwrap()
            .push((rendered.clone(), command.is_mutating()));

        let failing = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .any(|needle| command.line().contains(needle.as_str()));
        if failing {
            return Err(ToolsError::CommandFailed {
                command: rendered,
                status: 1,
                stderr: "injected failure".to_string(),
            });
        }

        let stdout = self
            .responses
            .lock()
            .unwrap()
            .get(command.line())
            .cloned()
            .unwrap_or_default();
        Ok(CommandOutput::success(stdout))
    }
}

pub const SSH: &str = "ssh -p 22 -i sshKeyPath sshUser@sshIP";

pub fn remote() -> RemoteLogin {
    RemoteLogin {
        host: "sshIP".to_string(),
        port: 22,
        key_path: PathBuf::from("sshKeyPath"),
        user: "sshUser".to_string(),
    }
}

pub fn common(execute: bool) -> CommonConfig {
    CommonConfig {
        execute,
        ..CommonConfig::default()
    }
}

pub fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y%m%d-%H%M%S").unwrap()
}
