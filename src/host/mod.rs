//! Host process and filesystem access
//!
//! Everything the provisioners need from the local machine goes through the
//! [`Host`] trait: resolving binaries, checking for files and running the
//! `kind`, `kubectl`, `docker` and `gcloud` CLIs. Components receive it at
//! construction so tests can substitute a recording fake.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{DeployError, Result};

/// Access to host binaries and files.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Host: Send + Sync {
    /// Whether `bin` resolves to an executable on `PATH`.
    async fn look_path(&self, bin: &str) -> bool;

    /// Whether a file exists at `path`.
    async fn file_exists(&self, path: &Path) -> bool;

    /// Runs a command, forwarding its output to the log.
    async fn exec(&self, program: &str, args: &[String]) -> Result<()>;

    /// Runs a command and returns its captured stdout instead of logging it.
    async fn exec_output(&self, program: &str, args: &[String]) -> Result<String>;
}

/// Checks every binary in `bins` and reports all missing ones in one error.
pub async fn check_dependencies<H: Host + ?Sized>(host: &H, bins: &[&str]) -> Result<()> {
    let mut missing = Vec::new();
    for bin in bins {
        if !host.look_path(bin).await {
            missing.push(bin.to_string());
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(DeployError::MissingDependency(missing))
    }
}

/// Builds an owned argument vector from string literals.
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// [`Host`] backed by the local machine.
#[derive(Debug, Clone, Default)]
pub struct LocalHost;

impl LocalHost {
    pub fn new() -> Self {
        Self
    }

    fn command(program: &str, args: &[String]) -> Command {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

#[async_trait]
impl Host for LocalHost {
    async fn look_path(&self, bin: &str) -> bool {
        match Command::new("which")
            .arg(bin)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(e) => {
                warn!(bin, error = %e, "Failed to resolve binary");
                false
            }
        }
    }

    async fn file_exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    /// Output lines are forwarded while the child runs; the last stderr
    /// line becomes the failure reason.
    async fn exec(&self, program: &str, args: &[String]) -> Result<()> {
        let command_line = display_command(program, args);
        debug!(command = %command_line, "Executing");

        let mut child = Self::command(program, args)
            .spawn()
            .map_err(|e| DeployError::command_failed(&command_line, e.to_string()))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let forward_stdout = async {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(target: "networksim_deploy::exec", "{}: {}", program, line);
                }
            }
        };
        let forward_stderr = async {
            let mut last = String::new();
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(target: "networksim_deploy::exec", "{}: {}", program, line);
                    last = line;
                }
            }
            last
        };

        let (status, (), last_stderr) = tokio::join!(child.wait(), forward_stdout, forward_stderr);
        let status =
            status.map_err(|e| DeployError::command_failed(&command_line, e.to_string()))?;

        if status.success() {
            Ok(())
        } else {
            Err(DeployError::command_failed(
                command_line,
                format!("{}: {}", status, last_stderr.trim()),
            ))
        }
    }

    async fn exec_output(&self, program: &str, args: &[String]) -> Result<String> {
        let command_line = display_command(program, args);
        debug!(command = %command_line, "Executing");

        let output = Self::command(program, args)
            .output()
            .await
            .map_err(|e| DeployError::command_failed(&command_line, e.to_string()))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines() {
            warn!(target: "networksim_deploy::exec", "{}: {}", program, line);
        }
        if !output.status.success() {
            return Err(DeployError::command_failed(
                command_line,
                format!("{}: {}", output.status, stderr.trim()),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Flags whose value is a secret.
const SECRET_FLAGS: [&str; 2] = ["-p", "--password"];

/// Command line for logs and errors, with secret flag values masked.
///
/// Only the displayed form is redacted; the child still gets the real argv.
pub fn display_command(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    let mut redact_next = false;
    for arg in args {
        line.push(' ');
        if redact_next {
            line.push_str("***");
        } else {
            line.push_str(arg);
        }
        redact_next = SECRET_FLAGS.contains(&arg.as_str());
    }
    line
}
