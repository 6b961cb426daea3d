//! Project model: the unit of Git-tracked working tree this crate manages.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// How a project's GitHook reacts to an incoming ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookMode {
    Branch,
    Tag,
}

impl HookMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookMode::Branch => "branch",
            HookMode::Tag => "tag",
        }
    }
}

impl std::str::FromStr for HookMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "branch" => Ok(HookMode::Branch),
            "tag" => Ok(HookMode::Tag),
            other => Err(format!("unknown hook mode: {other}")),
        }
    }
}

/// A named local directory that may be a Git working tree, managed by this system.
///
/// `hook_secret` is stored encrypted at rest (see `crate::crypto`) and is never
/// serialized back out to API clients — see `ProjectResponse`.
#[derive(Debug, Clone, FromRow)]
pub struct Project {
    pub name: String,
    pub path: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub hook_enabled: bool,
    pub hook_mode: String,
    pub hook_branch: String,
    pub hook_secret: Option<String>,
    pub force_sync: bool,
    pub sync_config: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Project {
    pub fn is_addressable(&self) -> bool {
        self.enabled
    }

    pub fn hook_mode(&self) -> HookMode {
        self.hook_mode.parse().unwrap_or(HookMode::Branch)
    }

    /// `true` iff `branch` matches this project's configured hook branch.
    /// `"*"` matches any branch.
    pub fn matches_branch(&self, branch: &str) -> bool {
        self.hook_branch == "*" || self.hook_branch == branch
    }
}

/// Project as exposed over the admin API — secrets are never echoed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectResponse {
    pub name: String,
    pub path: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub hook_enabled: bool,
    pub hook_mode: String,
    pub hook_branch: String,
    pub has_hook_secret: bool,
    pub force_sync: bool,
    pub sync_config: Option<serde_json::Value>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Project> for ProjectResponse {
    fn from(p: &Project) -> Self {
        Self {
            name: p.name.clone(),
            path: p.path.clone(),
            description: p.description.clone(),
            enabled: p.enabled,
            hook_enabled: p.hook_enabled,
            hook_mode: p.hook_mode.clone(),
            hook_branch: p.hook_branch.clone(),
            has_hook_secret: p.hook_secret.is_some(),
            force_sync: p.force_sync,
            sync_config: p
                .sync_config
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok()),
            created_at: p.created_at.clone(),
            updated_at: p.updated_at.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub path: String,
    pub description: Option<String>,
    #[serde(default)]
    pub sync: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub path: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub sync: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct GithookConfigRequest {
    pub enhook: bool,
    pub hookmode: String,
    pub hookbranch: String,
    pub hooksecret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SwitchBranchRequest {
    pub branch: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct SwitchTagRequest {
    pub tag: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetRemoteRequest {
    pub remote_url: String,
}

#[derive(Debug, Serialize)]
pub struct RemoteResponse {
    pub url: String,
}

/// Query parameters for the paginated tag listing endpoint.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TagListQuery {
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(rename = "messageFilter", default)]
    pub message_filter: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagListResponse {
    pub tags: Vec<crate::git::TagInfo>,
    pub total: usize,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_mode_round_trips_through_str() {
        assert_eq!("branch".parse::<HookMode>().unwrap(), HookMode::Branch);
        assert_eq!("tag".parse::<HookMode>().unwrap(), HookMode::Tag);
        assert!("bogus".parse::<HookMode>().is_err());
    }

    #[test]
    fn wildcard_branch_matches_anything() {
        let p = Project {
            name: "p".into(),
            path: "/tmp/p".into(),
            description: None,
            enabled: true,
            hook_enabled: true,
            hook_mode: "branch".into(),
            hook_branch: "*".into(),
            hook_secret: None,
            force_sync: false,
            sync_config: None,
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert!(p.matches_branch("anything"));
    }

    #[test]
    fn specific_branch_only_matches_itself() {
        let mut p = Project {
            name: "p".into(),
            path: "/tmp/p".into(),
            description: None,
            enabled: true,
            hook_enabled: true,
            hook_mode: "branch".into(),
            hook_branch: "main".into(),
            hook_secret: None,
            force_sync: false,
            sync_config: None,
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert!(p.matches_branch("main"));
        assert!(!p.matches_branch("feature-x"));
        p.hook_branch = "*".into();
        assert!(p.matches_branch("feature-x"));
    }
}
