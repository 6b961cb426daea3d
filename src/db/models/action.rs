//! Append-only record of every admin- or webhook-triggered project mutation.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectAction {
    BranchSwitch,
    SwitchTag,
    DeleteTag,
    DeleteBranch,
    SyncBranches,
    SyncTags,
    InitGit,
    SetRemote,
    GithookConfig,
    GithookSkipped,
    AddProject,
    UpdateProject,
    DeleteProject,
}

impl ProjectAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectAction::BranchSwitch => "branch-switch",
            ProjectAction::SwitchTag => "switch-tag",
            ProjectAction::DeleteTag => "delete-tag",
            ProjectAction::DeleteBranch => "delete-branch",
            ProjectAction::SyncBranches => "sync-branches",
            ProjectAction::SyncTags => "sync-tags",
            ProjectAction::InitGit => "init-git",
            ProjectAction::SetRemote => "set-remote",
            ProjectAction::GithookConfig => "githook-config",
            ProjectAction::GithookSkipped => "githook-skipped",
            ProjectAction::AddProject => "add-project",
            ProjectAction::UpdateProject => "update-project",
            ProjectAction::DeleteProject => "delete-project",
        }
    }
}

/// Username recorded against machine-triggered mutations (webhook-driven
/// branch switches, tag deletions), as opposed to an authenticated operator.
pub const MACHINE_USERNAME: &str = "GitHook";

#[derive(Debug, Clone, FromRow)]
pub struct ProjectActionRecord {
    pub id: String,
    pub project_name: String,
    pub action: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub username: String,
    pub success: bool,
    pub error: Option<String>,
    pub commit_hash: Option<String>,
    pub description: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewProjectActionRecord {
    pub project_name: String,
    pub action: ProjectAction,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub username: String,
    pub success: bool,
    pub error: Option<String>,
    pub commit_hash: Option<String>,
    pub description: Option<String>,
    pub ip_address: Option<String>,
}

impl NewProjectActionRecord {
    /// Helper for actions driven by an inbound webhook rather than an
    /// authenticated operator.
    pub fn machine(
        project_name: impl Into<String>,
        action: ProjectAction,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Self {
        Self {
            project_name: project_name.into(),
            action,
            old_value,
            new_value,
            username: MACHINE_USERNAME.to_string(),
            success: true,
            error: None,
            commit_hash: None,
            description: None,
            ip_address: None,
        }
    }

    /// Attach a human-readable explanation (e.g. why a githook was skipped).
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectActionListResponse {
    pub actions: Vec<ProjectActionRecord>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProjectActionQuery {
    pub project: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl Serialize for ProjectActionRecord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("ProjectActionRecord", 11)?;
        s.serialize_field("id", &self.id)?;
        s.serialize_field("projectName", &self.project_name)?;
        s.serialize_field("action", &self.action)?;
        s.serialize_field("oldValue", &self.old_value)?;
        s.serialize_field("newValue", &self.new_value)?;
        s.serialize_field("username", &self.username)?;
        s.serialize_field("success", &self.success)?;
        s.serialize_field("error", &self.error)?;
        s.serialize_field("commitHash", &self.commit_hash)?;
        s.serialize_field("description", &self.description)?;
        s.serialize_field("ipAddress", &self.ip_address)?;
        s.end()
    }
}
