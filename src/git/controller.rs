//! Translates validated webhook events or admin actions into a deterministic
//! sequence of `git` operations against a project working tree (C4).

use crate::api::metrics;
use crate::error::{CoreError, CoreResult};
use crate::git::runner::GitRunner;
use serde::Serialize;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct TagInfo {
    pub name: String,
    pub created_date: String,
    pub short_hash: String,
    pub subject: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BranchInfo {
    pub name: String,
    pub is_current: bool,
    pub is_remote: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub current_branch: String,
    pub current_tag: String,
    pub mode: String,
    pub last_commit_short: String,
    pub last_commit_time: String,
}

pub struct DeploymentController {
    runner: GitRunner,
}

impl DeploymentController {
    pub fn new(runner: GitRunner) -> Self {
        Self { runner }
    }

    fn require_nonempty(value: &str, field: &str) -> CoreResult<()> {
        if value.trim().is_empty() {
            return Err(CoreError::InvalidArgument(format!("{field} must not be empty")));
        }
        Ok(())
    }

    pub async fn ensure_git_repo(&self, path: &Path) -> CoreResult<()> {
        let result = self.ensure_git_repo_inner(path).await;
        metrics::record_git_command("init_git", result.is_ok());
        result
    }

    async fn ensure_git_repo_inner(&self, path: &Path) -> CoreResult<()> {
        Self::require_nonempty(&path.to_string_lossy(), "path")?;

        if !path.exists() {
            return Err(CoreError::InvalidArgument(format!(
                "path does not exist: {}",
                path.display()
            )));
        }

        let sentinel = path.join(".forgehook-write-probe");
        std::fs::write(&sentinel, b"probe")
            .map_err(|e| CoreError::InvalidArgument(format!("path is not writable: {e}")))?;
        let _ = std::fs::remove_file(&sentinel);

        if path.join(".git").exists() {
            return Err(CoreError::Conflict(format!(
                "{} is already a git repository",
                path.display()
            )));
        }

        let out = self.runner.run(path, &["init"]).await.map_err(CoreError::from)?;
        if !out.success {
            return Err(CoreError::FatalGit(out.combined));
        }

        if !path.join(".git").exists() {
            return Err(CoreError::FatalGit("git init did not create .git".into()));
        }

        Ok(())
    }

    /// `reset --hard HEAD` only — never `git clean`, so untracked files
    /// (`.env`, `runtime/`, …) survive.
    async fn force_clean(&self, path: &Path) -> CoreResult<()> {
        let out = self
            .runner
            .run(path, &["reset", "--hard", "HEAD"])
            .await
            .map_err(CoreError::from)?;
        if !out.success {
            return Err(CoreError::FatalGit(out.combined));
        }
        Ok(())
    }

    pub async fn switch_branch(&self, path: &Path, branch: &str, force: bool) -> CoreResult<()> {
        let result = self.switch_branch_inner(path, branch, force).await;
        metrics::record_git_command("switch_branch", result.is_ok());
        result
    }

    async fn switch_branch_inner(&self, path: &Path, branch: &str, force: bool) -> CoreResult<()> {
        Self::require_nonempty(branch, "branch")?;

        if force {
            self.force_clean(path).await?;
        }

        if let Some(local) = branch.strip_prefix("origin/") {
            let exists = self.local_branch_exists(path, local).await?;
            if exists {
                let out = self.runner.run(path, &["checkout", local]).await.map_err(CoreError::from)?;
                if !out.success {
                    return Err(CoreError::FatalGit(out.combined));
                }
            } else {
                let out = self
                    .runner
                    .run(path, &["checkout", "-b", local, branch])
                    .await
                    .map_err(CoreError::from)?;
                if !out.success {
                    return Err(CoreError::FatalGit(out.combined));
                }
            }

            if force {
                let out = self
                    .runner
                    .run(path, &["reset", "--hard", &format!("origin/{local}")])
                    .await
                    .map_err(CoreError::from)?;
                if !out.success {
                    return Err(CoreError::FatalGit(out.combined));
                }
            } else {
                let pull = self.runner.run(path, &["pull", "origin", local]).await;
                if let Ok(out) = &pull {
                    if !out.success {
                        warn!(branch = local, output = %out.combined, "non-fatal: pull origin failed");
                    }
                }
            }

            return Ok(());
        }

        let exists = self.local_branch_exists(path, branch).await?;
        if !exists {
            let out = self
                .runner
                .run(path, &["checkout", "-b", branch, &format!("origin/{branch}")])
                .await
                .map_err(CoreError::from)?;
            if !out.success {
                return Err(CoreError::FatalGit(out.combined));
            }
        } else {
            let out = self.runner.run(path, &["checkout", branch]).await.map_err(CoreError::from)?;
            if !out.success {
                return Err(CoreError::FatalGit(out.combined));
            }

            if force {
                let out = self
                    .runner
                    .run(path, &["reset", "--hard", &format!("origin/{branch}")])
                    .await
                    .map_err(CoreError::from)?;
                if !out.success {
                    return Err(CoreError::FatalGit(out.combined));
                }
            } else {
                let pull = self.runner.run(path, &["pull", "origin", branch]).await;
                if let Ok(out) = &pull {
                    if !out.success {
                        warn!(branch, output = %out.combined, "non-fatal: pull origin failed");
                    }
                }
            }
        }

        Ok(())
    }

    /// Warm up with `fetch --all`, then delegate to `switch_branch` using
    /// the project's configured force-sync flag.
    pub async fn switch_branch_from_webhook(
        &self,
        path: &Path,
        ref_name: &str,
        force_sync: bool,
    ) -> CoreResult<()> {
        let fetch = self.runner.run(path, &["fetch", "--all"]).await;
        if let Ok(out) = &fetch {
            if !out.success {
                warn!(output = %out.combined, "non-fatal: fetch --all failed");
            }
        }
        self.switch_branch(path, ref_name, force_sync).await
    }

    pub async fn switch_tag(&self, path: &Path, tag: &str, force: bool) -> CoreResult<()> {
        let result = self.switch_tag_inner(path, tag, force).await;
        metrics::record_git_command("switch_tag", result.is_ok());
        result
    }

    async fn switch_tag_inner(&self, path: &Path, tag: &str, force: bool) -> CoreResult<()> {
        Self::require_nonempty(tag, "tag")?;

        if force {
            self.force_clean(path).await?;
        }

        let fetch_tags = self.runner.run(path, &["fetch", "--tags"]).await;
        if let Ok(out) = &fetch_tags {
            if !out.success {
                warn!(output = %out.combined, "non-fatal: fetch --tags failed");
            }
        }

        if !self.tag_exists(path, tag).await? {
            let refetch = self.runner.run(path, &["fetch", "origin", "--tags"]).await;
            if let Ok(out) = &refetch {
                if !out.success {
                    warn!(output = %out.combined, "non-fatal: fetch origin --tags failed");
                }
            }
            if !self.tag_exists(path, tag).await? {
                return Err(CoreError::not_found("tag", tag));
            }
        }

        let out = self.runner.run(path, &["checkout", tag]).await.map_err(CoreError::from)?;
        if !out.success {
            return Err(CoreError::FatalGit(out.combined));
        }

        Ok(())
    }

    pub async fn delete_branch(&self, path: &Path, name: &str) -> CoreResult<()> {
        let result = self.delete_branch_inner(path, name).await;
        metrics::record_git_command("delete_branch", result.is_ok());
        result
    }

    async fn delete_branch_inner(&self, path: &Path, name: &str) -> CoreResult<()> {
        Self::require_nonempty(name, "name")?;

        let current = self.current_branch(path).await?;
        if current == name {
            return Err(CoreError::PreconditionFailed(format!(
                "cannot delete the current branch: {name}"
            )));
        }

        let out = self.runner.run(path, &["branch", "-D", name]).await.map_err(CoreError::from)?;
        if !out.success {
            return Err(CoreError::FatalGit(out.combined));
        }
        Ok(())
    }

    pub async fn delete_tag(&self, path: &Path, name: &str) -> CoreResult<()> {
        let result = self.delete_tag_inner(path, name).await;
        metrics::record_git_command("delete_tag", result.is_ok());
        result
    }

    async fn delete_tag_inner(&self, path: &Path, name: &str) -> CoreResult<()> {
        Self::require_nonempty(name, "name")?;

        let head_is_this_tag = self
            .runner
            .run(path, &["describe", "--tags", "--exact-match", "HEAD"])
            .await
            .map(|out| out.success && out.combined.trim() == name)
            .unwrap_or(false);

        if head_is_this_tag {
            return Err(CoreError::PreconditionFailed(format!(
                "HEAD is exactly this tag: {name}"
            )));
        }

        let out = self.runner.run(path, &["tag", "-d", name]).await.map_err(CoreError::from)?;
        if !out.success {
            // a nonexistent tag is a no-op success
            if out.combined.contains("not found") {
                return Ok(());
            }
            return Err(CoreError::FatalGit(out.combined));
        }

        let remote_delete = self
            .runner
            .run(path, &["push", "origin", &format!(":refs/tags/{name}")])
            .await;
        if let Ok(o) = &remote_delete {
            if !o.success {
                warn!(tag = name, output = %o.combined, "non-fatal: remote tag delete failed");
            }
        }

        Ok(())
    }

    pub async fn sync_branches(&self, path: &Path) -> CoreResult<()> {
        let out = self
            .runner
            .run(path, &["fetch", "origin", "--prune"])
            .await
            .map_err(CoreError::from)?;
        let result = if out.success {
            Ok(())
        } else {
            Err(CoreError::FatalGit(out.combined))
        };
        metrics::record_git_command("sync_branches", result.is_ok());
        result
    }

    pub async fn sync_tags(&self, path: &Path) -> CoreResult<()> {
        let out = self
            .runner
            .run(path, &["fetch", "origin", "--prune", "--tags"])
            .await
            .map_err(CoreError::from)?;
        let result = if out.success {
            Ok(())
        } else {
            Err(CoreError::FatalGit(out.combined))
        };
        metrics::record_git_command("sync_tags", result.is_ok());
        result
    }

    pub async fn get_status(&self, path: &Path) -> CoreResult<StatusInfo> {
        let current_branch = self.current_branch(path).await?;

        let tag_out = self
            .runner
            .run(path, &["describe", "--exact-match", "--tags", "HEAD"])
            .await
            .map_err(CoreError::from)?;
        let (current_tag, mode) = if tag_out.success {
            (tag_out.combined.trim().to_string(), "tag".to_string())
        } else {
            (String::new(), "branch".to_string())
        };

        let commit = self
            .runner
            .run(path, &["log", "-1", "--format=%h|%ci"])
            .await
            .map_err(CoreError::from)?;
        let (short, time) = commit
            .combined
            .trim()
            .split_once('|')
            .map(|(h, t)| (h.to_string(), t.to_string()))
            .unwrap_or_default();

        Ok(StatusInfo {
            current_branch,
            current_tag,
            mode,
            last_commit_short: short,
            last_commit_time: time,
        })
    }

    pub async fn list_branches(&self, path: &Path) -> CoreResult<Vec<BranchInfo>> {
        let detached = !self
            .runner
            .run(path, &["symbolic-ref", "-q", "HEAD"])
            .await
            .map_err(CoreError::from)?
            .success;

        let current = if detached {
            None
        } else {
            Some(self.current_branch(path).await?)
        };

        let refs_out = self
            .runner
            .run(
                path,
                &["for-each-ref", "--format=%(refname)", "refs/heads", "refs/remotes"],
            )
            .await
            .map_err(CoreError::from)?;

        let mut seen = std::collections::BTreeSet::new();
        let mut branches = Vec::new();

        for line in refs_out.combined.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (is_remote, name) = if let Some(rest) = line.strip_prefix("refs/heads/") {
                (false, rest.to_string())
            } else if let Some(rest) = line.strip_prefix("refs/remotes/") {
                if rest.ends_with("/HEAD") {
                    continue;
                }
                (true, rest.to_string())
            } else {
                continue;
            };

            if !seen.insert(name.clone()) {
                continue;
            }

            let is_current = !detached && current.as_deref() == Some(name.as_str());
            branches.push(BranchInfo {
                name,
                is_current,
                is_remote,
            });
        }

        if detached {
            let label = self.describe_detached_head(path).await?;
            branches.push(BranchInfo {
                name: label,
                is_current: true,
                is_remote: false,
            });
        }

        Ok(branches)
    }

    pub async fn list_tags(&self, path: &Path) -> CoreResult<Vec<TagInfo>> {
        let out = self
            .runner
            .run(
                path,
                &[
                    "tag",
                    "-l",
                    "--sort=-version:refname",
                    "--format=%(refname:short)|%(creatordate)|%(objectname:short)|%(subject)",
                ],
            )
            .await
            .map_err(CoreError::from)?;

        if !out.success {
            return Err(CoreError::FatalGit(out.combined));
        }

        let mut tags = Vec::new();
        for line in out.combined.lines() {
            let mut parts = line.splitn(4, '|');
            let (Some(name), Some(created_date), Some(short_hash), Some(subject)) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            tags.push(TagInfo {
                name: name.to_string(),
                created_date: created_date.to_string(),
                short_hash: short_hash.to_string(),
                subject: subject.to_string(),
            });
        }

        Ok(tags)
    }

    async fn current_branch(&self, path: &Path) -> CoreResult<String> {
        let out = self
            .runner
            .run(path, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await
            .map_err(CoreError::from)?;
        if !out.success {
            return Err(CoreError::NotAGitRepo(path.display().to_string()));
        }
        Ok(out.combined.trim().to_string())
    }

    async fn local_branch_exists(&self, path: &Path, branch: &str) -> CoreResult<bool> {
        let out = self
            .runner
            .run(path, &["branch", "--list", branch])
            .await
            .map_err(CoreError::from)?;
        Ok(!out.combined.trim().is_empty())
    }

    async fn tag_exists(&self, path: &Path, tag: &str) -> CoreResult<bool> {
        let out = self
            .runner
            .run(path, &["rev-parse", tag])
            .await
            .map_err(CoreError::from)?;
        Ok(out.success)
    }

    async fn describe_detached_head(&self, path: &Path) -> CoreResult<String> {
        let tag_desc = self
            .runner
            .run(path, &["describe", "--tags", "--exact-match", "HEAD"])
            .await
            .map_err(CoreError::from)?;
        if tag_desc.success {
            return Ok(tag_desc.combined.trim().to_string());
        }

        let short = self
            .runner
            .run(path, &["rev-parse", "--short", "HEAD"])
            .await
            .map_err(CoreError::from)?;
        Ok(short.combined.trim().to_string())
    }
}

/// The `main`/`master` branches are protected from deletion-via-webhook
/// regardless of whether they're the project's configured hook branch.
pub fn is_protected_branch(name: &str, configured_hook_branch: &str) -> bool {
    name == "main" || name == "master" || name == configured_hook_branch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_and_master_are_always_protected() {
        assert!(is_protected_branch("main", "develop"));
        assert!(is_protected_branch("master", "develop"));
        assert!(!is_protected_branch("feature-x", "develop"));
    }

    #[test]
    fn configured_hook_branch_is_protected() {
        assert!(is_protected_branch("release", "release"));
    }
}
