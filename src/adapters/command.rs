//! Subprocess transport.
//!
//! Spawns the configured command, writes the request JSON to stdin and reads
//! the response from stdout. One process per call.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use super::Transport;

/// Transport backed by a local command
pub struct CommandTransport {
    program: String,
    args: Vec<String>,
}

impl CommandTransport {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl Transport for CommandTransport {
    fn name(&self) -> &str {
        "command"
    }

    async fn exchange(&self, payload: &str, call_timeout: Duration) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn '{}'", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A child that exits without reading is reported by its exit status
            match stdin.write_all(payload.as_bytes()).await {
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                    return Err(e)
                        .with_context(|| format!("Failed to write to '{}' stdin", self.program));
                }
                _ => {}
            }
            // Dropping stdin signals EOF
        }

        let output = timeout(call_timeout, child.wait_with_output())
            .await
            .with_context(|| format!("'{}' timed out after {:?}", self.program, call_timeout))?
            .with_context(|| format!("Failed to wait for '{}'", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            anyhow::bail!(
                "'{}' failed with exit code {}: {}",
                self.program,
                exit_code,
                stderr.trim()
            );
        }

        String::from_utf8(output.stdout)
            .with_context(|| format!("'{}' output is not valid UTF-8", self.program))
    }

    async fn health_check(&self) -> Result<()> {
        which_program(&self.program)
            .with_context(|| format!("'{}' is not runnable", self.program))
    }
}

fn which_program(program: &str) -> Result<()> {
    let path = std::path::Path::new(program);
    if path.components().count() > 1 {
        anyhow::ensure!(path.is_file(), "{} does not exist", path.display());
        return Ok(());
    }

    let search = std::env::var_os("PATH").unwrap_or_default();
    let found = std::env::split_paths(&search).any(|dir| dir.join(program).is_file());
    anyhow::ensure!(found, "{} not found on PATH", program);
    Ok(())
}
