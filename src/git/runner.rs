//! Invokes `git` against a working directory, with one self-healing retry
//! for the `safe.directory` ownership refusal (C3).

use crate::error::CoreError;
use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub combined: String,
    pub success: bool,
}

#[derive(Debug, Clone)]
pub struct GitRunner {
    binary: String,
    timeout: Duration,
}

impl GitRunner {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Run `git -C <project_path> <args…>`, auto-remediating the
    /// `safe.directory` ownership refusal once, then returning verbatim.
    pub async fn run(&self, project_path: &Path, args: &[&str]) -> Result<CommandOutput> {
        let first = self.spawn_once(project_path, args).await?;
        if first.success {
            return Ok(first);
        }

        if !is_ownership_refusal(&first.combined) {
            return Ok(first);
        }

        self.remediate_ownership(project_path).await?;
        self.spawn_once(project_path, args).await
    }

    /// Spawn `git`, racing its completion against a per-call cancellation
    /// token that fires when `self.timeout` elapses. `kill_on_drop` makes
    /// losing the race actually terminate the child instead of merely
    /// abandoning the future that was reading its output.
    async fn spawn_once(&self, project_path: &Path, args: &[&str]) -> Result<CommandOutput> {
        let mut full_args = vec!["-C", &project_path.to_string_lossy()];
        full_args.extend_from_slice(args);

        let child = Command::new(&self.binary)
            .args(&full_args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", self.binary))?;

        let cancel = CancellationToken::new();
        let timer_cancel = cancel.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            timer_cancel.cancel();
        });

        let output = tokio::select! {
            res = child.wait_with_output() => {
                res.with_context(|| format!("`{}` did not complete", self.binary))?
            }
            _ = cancel.cancelled() => {
                return Err(anyhow::Error::new(CoreError::Cancelled))
                    .with_context(|| format!("git command timed out after {:?}", self.timeout));
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            combined,
            success: output.status.success(),
        })
    }

    async fn remediate_ownership(&self, project_path: &Path) -> Result<()> {
        let path_str = project_path.to_string_lossy().into_owned();
        let system = Command::new(&self.binary)
            .args(["config", "--system", "--add", "safe.directory", &path_str])
            .output()
            .await;

        let system_ok = matches!(&system, Ok(o) if o.status.success());
        if system_ok {
            return Ok(());
        }

        let global = Command::new(&self.binary)
            .args(["config", "--global", "--add", "safe.directory", &path_str])
            .output()
            .await
            .context("failed to spawn git config --global")?;

        if !global.status.success() {
            anyhow::bail!(
                "failed to remediate safe.directory for {}: system and global config both failed",
                path_str
            );
        }

        Ok(())
    }
}

fn is_ownership_refusal(combined_output: &str) -> bool {
    combined_output.contains("safe.directory") || combined_output.contains("detected dubious ownership")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_safe_directory_refusal() {
        assert!(is_ownership_refusal("fatal: detected dubious ownership in repository"));
        assert!(is_ownership_refusal(
            "fatal: unsafe repository, add it with `git config --global --add safe.directory /x`"
        ));
        assert!(!is_ownership_refusal("fatal: not a git repository"));
    }
}
