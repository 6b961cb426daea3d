//! `/version/*` admin endpoints (C9): project CRUD plus the branch/tag
//! control-plane operations, each following the same shape — authenticate,
//! resolve the addressable project, capture `previousState`, invoke the
//! `DeploymentController`, write a Project Action Record, broadcast an event.

use axum::{
    extract::{Extension, Path, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use std::path::Path as FsPath;
use std::sync::Arc;
use std::time::Duration;

use crate::api::error::ApiError;
use crate::api::rate_limit::extract_client_ip;
use crate::audit;
use crate::auth::AuthenticatedUser;
use crate::crypto;
use crate::db::{
    CreateProjectRequest, GithookConfigRequest, NewProjectActionRecord, Project, ProjectAction,
    ProjectResponse, RemoteResponse, SetRemoteRequest, SwitchBranchRequest, SwitchTagRequest,
    TagListQuery, TagListResponse, UpdateProjectRequest,
};
use crate::error::CoreError;
use crate::events::EventMessage;
use crate::git::{is_protected_branch, DeploymentController, GitRunner, StatusInfo};
use crate::AppState;

fn controller(state: &AppState) -> DeploymentController {
    let runner = GitRunner::new(
        state.config.git.binary.clone(),
        Duration::from_secs(state.config.git.command_timeout_secs),
    );
    DeploymentController::new(runner)
}

async fn fetch_project(state: &AppState, name: &str) -> Result<Project, ApiError> {
    sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE name = ?")
        .bind(name)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| CoreError::not_found("project", name).into())
}

/// Most mutating operations require the project to be addressable.
async fn fetch_addressable_project(state: &AppState, name: &str) -> Result<Project, ApiError> {
    let project = fetch_project(state, name).await?;
    if !project.is_addressable() {
        return Err(CoreError::PreconditionFailed(format!("project '{name}' is disabled")).into());
    }
    Ok(project)
}

async fn current_version_state(state: &AppState, project: &Project) -> Option<String> {
    controller(state)
        .get_status(FsPath::new(&project.path))
        .await
        .ok()
        .map(|s: StatusInfo| {
            if !s.current_tag.is_empty() {
                s.current_tag
            } else {
                s.current_branch
            }
        })
}

async fn record_action<T>(
    state: &AppState,
    project_name: &str,
    action: ProjectAction,
    old_value: Option<String>,
    new_value: Option<String>,
    username: &str,
    ip_address: Option<String>,
    result: &Result<T, CoreError>,
) {
    let (success, error) = match result {
        Ok(_) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    };

    let record = NewProjectActionRecord {
        project_name: project_name.to_string(),
        action,
        old_value,
        new_value,
        username: username.to_string(),
        success,
        error,
        commit_hash: None,
        description: None,
        ip_address,
    };

    if let Err(e) = audit::log_project_action(&state.db, record).await {
        tracing::error!(project = project_name, error = %e, "failed to write project action record");
    }

    state.event_bus.publish(EventMessage::ProjectManaged {
        project_name: project_name.to_string(),
        action: action.as_str().to_string(),
        actor: username.to_string(),
        at: Utc::now(),
    });
}

pub async fn list_projects(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ProjectResponse>>, ApiError> {
    let rows: Vec<Project> = sqlx::query_as("SELECT * FROM projects ORDER BY name")
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(rows.iter().map(ProjectResponse::from).collect()))
}

#[derive(serde::Serialize)]
pub struct ReloadConfigResponse {
    pub project_count: i64,
}

pub async fn reload_config(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReloadConfigResponse>, ApiError> {
    let paths: Vec<std::path::PathBuf> = std::fs::read_dir(&state.config.hooks.definitions_dir)
        .map_err(|e| ApiError::internal(format!("failed to scan hook definitions dir: {e}")))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();

    if let Err(e) = state.hook_store.reload_all(&paths) {
        tracing::warn!(error = %e, "reload-config encountered at least one invalid definition file");
    }

    let project_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects")
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(ReloadConfigResponse { project_count }))
}

pub async fn add_project(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    headers: HeaderMap,
    Json(body): Json<CreateProjectRequest>,
) -> Result<Json<ProjectResponse>, ApiError> {
    let ip = extract_client_ip(&headers).to_string();
    let now = Utc::now().to_rfc3339();
    let sync_json = body.sync.as_ref().map(|v| v.to_string());

    let result = sqlx::query(
        "INSERT INTO projects (name, path, description, enabled, hook_enabled, hook_mode, hook_branch, force_sync, sync_config, created_at, updated_at) \
         VALUES (?, ?, ?, 1, 0, 'branch', '*', 0, ?, ?, ?)",
    )
    .bind(&body.name)
    .bind(&body.path)
    .bind(&body.description)
    .bind(&sync_json)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await
    .map_err(ApiError::from)?;
    let _ = result;

    let outcome: Result<(), CoreError> = Ok(());
    record_action(
        &state,
        &body.name,
        ProjectAction::AddProject,
        None,
        Some(body.path.clone()),
        &user.username,
        Some(ip),
        &outcome,
    )
    .await;

    let project = fetch_project(&state, &body.name).await?;
    Ok(Json(ProjectResponse::from(&project)))
}

pub async fn update_project(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<UpdateProjectRequest>,
) -> Result<Json<ProjectResponse>, ApiError> {
    let ip = extract_client_ip(&headers).to_string();
    let existing = fetch_project(&state, &name).await?;

    let new_name = body.name.clone().unwrap_or_else(|| existing.name.clone());
    let new_path = body.path.clone().unwrap_or_else(|| existing.path.clone());
    let new_description = body.description.clone().or(existing.description.clone());
    let sync_json = body
        .sync
        .as_ref()
        .map(|v| v.to_string())
        .or(existing.sync_config.clone());
    let now = Utc::now().to_rfc3339();

    let result = sqlx::query(
        "UPDATE projects SET name = ?, path = ?, description = ?, sync_config = ?, updated_at = ? WHERE name = ?",
    )
    .bind(&new_name)
    .bind(&new_path)
    .bind(&new_description)
    .bind(&sync_json)
    .bind(&now)
    .bind(&name)
    .execute(&state.db)
    .await
    .map_err(ApiError::from)?;
    let _ = result;

    let outcome: Result<(), CoreError> = Ok(());
    record_action(
        &state,
        &new_name,
        ProjectAction::UpdateProject,
        Some(existing.path.clone()),
        Some(new_path.clone()),
        &user.username,
        Some(ip),
        &outcome,
    )
    .await;

    let project = fetch_project(&state, &new_name).await?;
    Ok(Json(ProjectResponse::from(&project)))
}

pub async fn delete_project(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ip = extract_client_ip(&headers).to_string();
    let existing = fetch_project(&state, &name).await?;

    sqlx::query("DELETE FROM projects WHERE name = ?")
        .bind(&name)
        .execute(&state.db)
        .await
        .map_err(ApiError::from)?;

    let outcome: Result<(), CoreError> = Ok(());
    record_action(
        &state,
        &name,
        ProjectAction::DeleteProject,
        Some(existing.path.clone()),
        None,
        &user.username,
        Some(ip),
        &outcome,
    )
    .await;

    Ok(Json(serde_json::json!({ "deleted": name })))
}

pub async fn list_branches(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Vec<crate::git::BranchInfo>>, ApiError> {
    let project = fetch_addressable_project(&state, &name).await?;
    let branches = controller(&state)
        .list_branches(FsPath::new(&project.path))
        .await
        .map_err(ApiError::from)?;
    Ok(Json(branches))
}

pub async fn list_tags(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<TagListQuery>,
) -> Result<Json<TagListResponse>, ApiError> {
    let project = fetch_addressable_project(&state, &name).await?;
    let mut tags = controller(&state)
        .list_tags(FsPath::new(&project.path))
        .await
        .map_err(ApiError::from)?;

    if let Some(prefix) = &query.filter {
        tags.retain(|t| t.name.starts_with(prefix.as_str()));
    }
    if let Some(substr) = &query.message_filter {
        let needle = substr.to_lowercase();
        tags.retain(|t| t.subject.to_lowercase().contains(&needle));
    }

    let total = tags.len();
    let page = query.page.filter(|&p| p >= 1).unwrap_or(1);
    let limit = match query.limit {
        Some(l) if l <= 0 => 20,
        Some(l) if l > 100 => 100,
        Some(l) => l,
        None => 20,
    };
    let offset = ((page - 1) * limit) as usize;
    let page_slice: Vec<_> = tags.into_iter().skip(offset).take(limit as usize).collect();
    let total_pages = ((total as i64) + limit - 1) / limit.max(1);

    Ok(Json(TagListResponse {
        tags: page_slice,
        total,
        page,
        limit,
        total_pages: total_pages.max(1),
        has_more: offset + (limit as usize) < total,
    }))
}

pub async fn switch_branch(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SwitchBranchRequest>,
) -> Result<Json<StatusInfo>, ApiError> {
    let ip = extract_client_ip(&headers).to_string();
    let project = fetch_addressable_project(&state, &name).await?;
    let previous = current_version_state(&state, &project).await;

    let result = controller(&state)
        .switch_branch(FsPath::new(&project.path), &body.branch, body.force)
        .await;

    record_action(
        &state,
        &name,
        ProjectAction::BranchSwitch,
        previous,
        Some(body.branch.clone()),
        &user.username,
        Some(ip),
        &result,
    )
    .await;

    result.map_err(ApiError::from)?;
    let status = controller(&state)
        .get_status(FsPath::new(&project.path))
        .await
        .map_err(ApiError::from)?;
    Ok(Json(status))
}

pub async fn switch_tag(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SwitchTagRequest>,
) -> Result<Json<StatusInfo>, ApiError> {
    let ip = extract_client_ip(&headers).to_string();
    let project = fetch_addressable_project(&state, &name).await?;
    let previous = current_version_state(&state, &project).await;

    let result = controller(&state)
        .switch_tag(FsPath::new(&project.path), &body.tag, body.force)
        .await;

    record_action(
        &state,
        &name,
        ProjectAction::SwitchTag,
        previous,
        Some(body.tag.clone()),
        &user.username,
        Some(ip),
        &result,
    )
    .await;

    result.map_err(ApiError::from)?;
    let status = controller(&state)
        .get_status(FsPath::new(&project.path))
        .await
        .map_err(ApiError::from)?;
    Ok(Json(status))
}

pub async fn delete_branch(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((name, branch)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ip = extract_client_ip(&headers).to_string();
    let project = fetch_addressable_project(&state, &name).await?;

    if is_protected_branch(&branch, &project.hook_branch) {
        let err: CoreError = CoreError::PreconditionFailed(format!("branch '{branch}' is protected"));
        let failed: Result<(), CoreError> = Err(err);
        record_action(
            &state,
            &name,
            ProjectAction::DeleteBranch,
            Some(branch.clone()),
            None,
            &user.username,
            Some(ip),
            &failed,
        )
        .await;
        return Err(failed.unwrap_err().into());
    }

    let result = controller(&state)
        .delete_branch(FsPath::new(&project.path), &branch)
        .await;

    record_action(
        &state,
        &name,
        ProjectAction::DeleteBranch,
        Some(branch.clone()),
        None,
        &user.username,
        Some(ip),
        &result,
    )
    .await;

    result.map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({ "deleted": branch })))
}

pub async fn delete_tag(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((name, tag)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ip = extract_client_ip(&headers).to_string();
    let project = fetch_addressable_project(&state, &name).await?;

    let result = controller(&state)
        .delete_tag(FsPath::new(&project.path), &tag)
        .await;

    record_action(
        &state,
        &name,
        ProjectAction::DeleteTag,
        Some(tag.clone()),
        None,
        &user.username,
        Some(ip),
        &result,
    )
    .await;

    result.map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({ "deleted": tag })))
}

pub async fn sync_branches(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ip = extract_client_ip(&headers).to_string();
    let project = fetch_addressable_project(&state, &name).await?;

    let result = controller(&state).sync_branches(FsPath::new(&project.path)).await;
    record_action(&state, &name, ProjectAction::SyncBranches, None, None, &user.username, Some(ip), &result).await;
    result.map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({ "synced": true })))
}

pub async fn sync_tags(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ip = extract_client_ip(&headers).to_string();
    let project = fetch_addressable_project(&state, &name).await?;

    let result = controller(&state).sync_tags(FsPath::new(&project.path)).await;
    record_action(&state, &name, ProjectAction::SyncTags, None, None, &user.username, Some(ip), &result).await;
    result.map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({ "synced": true })))
}

pub async fn init_git(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ip = extract_client_ip(&headers).to_string();
    let project = fetch_project(&state, &name).await?;

    let result = controller(&state).ensure_git_repo(FsPath::new(&project.path)).await;
    record_action(&state, &name, ProjectAction::InitGit, None, Some(project.path.clone()), &user.username, Some(ip), &result).await;
    result.map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({ "initialized": true })))
}

pub async fn set_remote(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SetRemoteRequest>,
) -> Result<Json<RemoteResponse>, ApiError> {
    let ip = extract_client_ip(&headers).to_string();
    let project = fetch_addressable_project(&state, &name).await?;

    let runner = GitRunner::new(
        state.config.git.binary.clone(),
        Duration::from_secs(state.config.git.command_timeout_secs),
    );
    let current = runner
        .run(FsPath::new(&project.path), &["remote", "get-url", "origin"])
        .await;
    let has_origin = matches!(&current, Ok(out) if out.success);

    let args: Vec<&str> = if has_origin {
        vec!["remote", "set-url", "origin", &body.remote_url]
    } else {
        vec!["remote", "add", "origin", &body.remote_url]
    };
    let outcome = runner.run(FsPath::new(&project.path), &args).await;
    let result: Result<(), CoreError> = match outcome {
        Ok(out) if out.success => Ok(()),
        Ok(out) => Err(CoreError::FatalGit(out.combined)),
        Err(e) => Err(CoreError::Other(e)),
    };

    record_action(
        &state,
        &name,
        ProjectAction::SetRemote,
        None,
        Some(body.remote_url.clone()),
        &user.username,
        Some(ip),
        &result,
    )
    .await;

    result.map_err(ApiError::from)?;
    Ok(Json(RemoteResponse { url: body.remote_url }))
}

pub async fn get_remote(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<RemoteResponse>, ApiError> {
    let project = fetch_addressable_project(&state, &name).await?;
    let runner = GitRunner::new(
        state.config.git.binary.clone(),
        Duration::from_secs(state.config.git.command_timeout_secs),
    );
    let out = runner
        .run(FsPath::new(&project.path), &["remote", "get-url", "origin"])
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if !out.success {
        return Err(CoreError::not_found("remote", "origin").into());
    }
    Ok(Json(RemoteResponse { url: out.combined.trim().to_string() }))
}

pub async fn githook_config(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<GithookConfigRequest>,
) -> Result<Json<ProjectResponse>, ApiError> {
    let ip = extract_client_ip(&headers).to_string();
    let existing = fetch_project(&state, &name).await?;

    body.hookmode
        .parse::<crate::db::HookMode>()
        .map_err(ApiError::bad_request)?;

    let stored_secret = match &body.hooksecret {
        Some(secret) if !secret.is_empty() => {
            let key = state.config.auth.encryption_key.as_deref().map(crypto::derive_key);
            Some(crypto::encrypt_if_key_available(secret, key.as_ref()).map_err(|e| ApiError::internal(e.to_string()))?)
        }
        Some(_) => None,
        None => existing.hook_secret.clone(),
    };
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "UPDATE projects SET hook_enabled = ?, hook_mode = ?, hook_branch = ?, hook_secret = ?, updated_at = ? WHERE name = ?",
    )
    .bind(body.enhook)
    .bind(&body.hookmode)
    .bind(&body.hookbranch)
    .bind(&stored_secret)
    .bind(&now)
    .bind(&name)
    .execute(&state.db)
    .await
    .map_err(ApiError::from)?;

    let outcome: Result<(), CoreError> = Ok(());
    record_action(
        &state,
        &name,
        ProjectAction::GithookConfig,
        Some(existing.hook_branch.clone()),
        Some(body.hookbranch.clone()),
        &user.username,
        Some(ip),
        &outcome,
    )
    .await;

    let project = fetch_project(&state, &name).await?;
    Ok(Json(ProjectResponse::from(&project)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_action_serializes_action_as_kebab_case() {
        assert_eq!(ProjectAction::GithookConfig.as_str(), "githook-config");
    }
}
