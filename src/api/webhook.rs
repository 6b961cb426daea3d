//! Inbound webhook entry points: `/githook/:name` (provider push events
//! driving the Git Deployment Controller) and `/hooks/:id` (generic hook
//! dispatch through the trigger-rule matcher and command executor).

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use std::collections::HashMap;
use std::path::Path as FsPath;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::api::error::ApiError;
use crate::api::metrics;
use crate::api::rate_limit::extract_client_ip;
use crate::audit;
use crate::crypto;
use crate::db::{HookMode, HookType, NewExecutionRecord, NewProjectActionRecord, Project, ProjectAction};
use crate::error::CoreError;
use crate::events::EventMessage;
use crate::git::{is_protected_branch, DeploymentController, GitRunner};
use crate::hooks::executor::CommandResolutionError;
use crate::hooks::{execute, extract_inputs, resolve_command, RequestView};
use crate::payload::{self, ParsedRef, RefType};
use crate::signature;
use crate::AppState;

struct HeaderMapLookup<'a>(&'a HeaderMap);

impl<'a> signature::HeaderLookup for HeaderMapLookup<'a> {
    fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|v| v.to_str().ok())
    }
}

fn controller(state: &AppState) -> DeploymentController {
    let runner = GitRunner::new(
        state.config.git.binary.clone(),
        Duration::from_secs(state.config.git.command_timeout_secs),
    );
    DeploymentController::new(runner)
}

fn parse_query_string(query: Option<&str>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if let Some(q) = query {
        for pair in q.split('&') {
            if let Some((k, v)) = pair.split_once('=') {
                out.insert(k.to_string(), v.to_string());
            }
        }
    }
    out
}

fn parse_form_body(content_type: Option<&str>, body: &[u8]) -> HashMap<String, String> {
    if content_type.map(|ct| ct.starts_with("application/x-www-form-urlencoded")) != Some(true) {
        return HashMap::new();
    }
    let decoded = String::from_utf8_lossy(body);
    decoded
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn header_multimap(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect()
}

fn headers_as_json(headers: &HeaderMap) -> serde_json::Value {
    serde_json::Value::Object(
        headers
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_string(), serde_json::Value::String(v.to_string())))
            })
            .collect(),
    )
}

fn user_agent_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn fetch_project(state: &AppState, name: &str) -> Result<Project, Response> {
    sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE name = ?")
        .bind(name)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| ApiError::from(e).into_response())?
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("project '{name}' not found")).into_response())
}

fn decrypt_secret(state: &AppState, project: &Project) -> anyhow::Result<String> {
    match &project.hook_secret {
        Some(secret) => {
            let key = state.config.auth.encryption_key.as_deref().map(crypto::derive_key);
            crypto::decrypt_if_encrypted(secret, key.as_ref())
        }
        None => Ok(String::new()),
    }
}

// ---------------------------------------------------------------------
// Provider webhooks: /githook/:name
// ---------------------------------------------------------------------

pub async fn githook(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let budget = Duration::from_secs(state.config.server.webhook_timeout_secs);
    match tokio::time::timeout(budget, handle_githook(state, name, headers, body)).await {
        Ok(response) => response,
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "githook request timed out").into_response(),
    }
}

async fn handle_githook(state: Arc<AppState>, name: String, headers: HeaderMap, body: Bytes) -> Response {
    let start = Instant::now();
    let ip = extract_client_ip(&headers).to_string();
    let user_agent = user_agent_of(&headers);

    let project = match fetch_project(&state, &name).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    if !project.is_addressable() || !project.hook_enabled {
        return (StatusCode::NOT_FOUND, "githook not configured for this project").into_response();
    }

    let secret = match decrypt_secret(&state, &project) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(project = %name, error = %e, "failed to decrypt hook secret");
            return (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response();
        }
    };

    if let Err(e) = signature::verify(&HeaderMapLookup(&headers), &secret, &body) {
        log_githook_execution(&state, &name, &ip, &user_agent, &headers, &body, false, Some(e.to_string()), start).await;
        return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
    }

    let json: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            let msg = format!("invalid JSON body: {e}");
            log_githook_execution(&state, &name, &ip, &user_agent, &headers, &body, false, Some(msg.clone()), start).await;
            return (StatusCode::BAD_REQUEST, msg).into_response();
        }
    };

    let parsed = match payload::parse(&json) {
        Ok(p) => p,
        Err(e) => {
            log_githook_execution(&state, &name, &ip, &user_agent, &headers, &body, false, Some(e.to_string()), start).await;
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let mode_matches = matches!(
        (project.hook_mode(), parsed.ref_type),
        (HookMode::Branch, RefType::Branch) | (HookMode::Tag, RefType::Tag)
    );
    if !mode_matches {
        let reason = format!(
            "hook mode is '{}' but ref '{}' is a {:?}",
            project.hook_mode().as_str(),
            parsed.ref_name,
            parsed.ref_type
        );
        return skip_githook(&state, &name, &ip, &user_agent, &headers, &body, &parsed, reason, start).await;
    }

    if parsed.ref_type == RefType::Branch && !project.matches_branch(&parsed.ref_name) {
        let reason = format!(
            "branch '{}' does not match configured hook branch '{}'",
            parsed.ref_name, project.hook_branch
        );
        return skip_githook(&state, &name, &ip, &user_agent, &headers, &body, &parsed, reason, start).await;
    }

    let result: Result<String, CoreError> = if parsed.deletion {
        handle_deletion(&state, &project, &parsed).await
    } else {
        handle_deploy(&state, &project, &parsed).await
    };

    let error = result.as_ref().err().map(|e| e.to_string());
    let success = result.is_ok();
    log_githook_execution(&state, &name, &ip, &user_agent, &headers, &body, success, error.clone(), start).await;

    state.event_bus.publish(EventMessage::GithookTriggered {
        project_name: name.clone(),
        branch: Some(parsed.ref_name.clone()),
        success,
        skipped: false,
        at: chrono::Utc::now(),
    });

    match result {
        Ok(msg) => Json(serde_json::json!({ "success": true, "skipped": false, "message": msg })).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// A githook request whose mode or branch doesn't match the project's
/// configuration is a no-op success, never a failure (DESIGN NOTES §9:
/// skip and failure must not be conflated).
#[allow(clippy::too_many_arguments)]
async fn skip_githook(
    state: &AppState,
    project_name: &str,
    ip: &str,
    user_agent: &Option<String>,
    headers: &HeaderMap,
    body: &Bytes,
    parsed: &ParsedRef,
    reason: String,
    start: Instant,
) -> Response {
    log_githook_execution(state, project_name, ip, user_agent, headers, body, true, None, start).await;

    let record = NewProjectActionRecord::machine(project_name, ProjectAction::GithookSkipped, None, Some(parsed.ref_name.clone()))
        .with_description(reason.clone());
    if let Err(e) = audit::log_project_action(&state.db, record).await {
        tracing::error!(project = project_name, error = %e, "failed to write project action record");
    }

    state.event_bus.publish(EventMessage::GithookTriggered {
        project_name: project_name.to_string(),
        branch: Some(parsed.ref_name.clone()),
        success: true,
        skipped: true,
        at: chrono::Utc::now(),
    });

    Json(serde_json::json!({ "success": true, "skipped": true, "message": reason })).into_response()
}

async fn record_machine_action<T>(
    state: &AppState,
    project_name: &str,
    action: ProjectAction,
    old_value: Option<String>,
    new_value: Option<String>,
    result: &Result<T, CoreError>,
) {
    let mut record = NewProjectActionRecord::machine(project_name, action, old_value, new_value);
    if let Err(e) = result {
        record.success = false;
        record.error = Some(e.to_string());
    }
    if let Err(e) = audit::log_project_action(&state.db, record).await {
        tracing::error!(project = project_name, error = %e, "failed to write project action record");
    }
}

/// `Deletion(tag) → TagDeleted`; `Deletion(branch) → BranchDeletionPolicy`.
async fn handle_deletion(state: &AppState, project: &Project, parsed: &ParsedRef) -> Result<String, CoreError> {
    let ctrl = controller(state);
    let path = FsPath::new(&project.path);

    match parsed.ref_type {
        RefType::Tag => {
            let result = ctrl.delete_tag(path, &parsed.ref_name).await;
            record_machine_action(state, &project.name, ProjectAction::DeleteTag, None, Some(parsed.ref_name.clone()), &result).await;
            result.map(|_| "tag deleted".to_string())
        }
        RefType::Branch => {
            if is_protected_branch(&parsed.ref_name, &project.hook_branch) {
                return Ok("branch deletion ignored: protected branch".to_string());
            }
            let result = ctrl.delete_branch(path, &parsed.ref_name).await;
            record_machine_action(state, &project.name, ProjectAction::DeleteBranch, Some(parsed.ref_name.clone()), None, &result).await;
            result.map(|_| "branch deleted".to_string())
        }
    }
}

/// `Normal → Deploying → {Deployed | DeployFailed}`.
async fn handle_deploy(state: &AppState, project: &Project, parsed: &ParsedRef) -> Result<String, CoreError> {
    let ctrl = controller(state);
    let path = FsPath::new(&project.path);

    let (result, action) = match parsed.ref_type {
        RefType::Branch => (
            ctrl.switch_branch_from_webhook(path, &parsed.ref_name, project.force_sync).await,
            ProjectAction::BranchSwitch,
        ),
        RefType::Tag => (
            ctrl.switch_tag(path, &parsed.ref_name, project.force_sync).await,
            ProjectAction::SwitchTag,
        ),
    };

    record_machine_action(state, &project.name, action, None, Some(parsed.ref_name.clone()), &result).await;
    result.map(|_| "deployed".to_string())
}

#[allow(clippy::too_many_arguments)]
async fn log_githook_execution(
    state: &AppState,
    project_name: &str,
    ip: &str,
    user_agent: &Option<String>,
    headers: &HeaderMap,
    body: &Bytes,
    success: bool,
    error: Option<String>,
    start: Instant,
) {
    let record = NewExecutionRecord {
        hook_id: project_name.to_string(),
        hook_name: Some(project_name.to_string()),
        hook_type: HookType::Githook,
        method: "POST".to_string(),
        remote_addr: Some(ip.to_string()),
        user_agent: user_agent.clone(),
        headers: headers_as_json(headers),
        body: Some(String::from_utf8_lossy(body).into_owned()),
        query_params: serde_json::json!({}),
        success,
        output: None,
        error,
        duration_ms: start.elapsed().as_millis() as i64,
    };
    if let Err(e) = audit::log_execution(&state.db, record).await {
        tracing::error!(project = project_name, error = %e, "failed to write execution record");
    }
    metrics::record_hook_execution(project_name, success, start.elapsed().as_secs_f64());
}

// ---------------------------------------------------------------------
// Generic hook dispatch: /hooks/:id
// ---------------------------------------------------------------------

pub async fn generic_hook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let budget = Duration::from_secs(state.config.server.webhook_timeout_secs);
    match tokio::time::timeout(budget, handle_generic_hook(state, id, method, uri, headers, body)).await {
        Ok(response) => response,
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "hook request timed out").into_response(),
    }
}

async fn handle_generic_hook(
    state: Arc<AppState>,
    id: String,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();
    let ip = extract_client_ip(&headers).to_string();
    let user_agent = user_agent_of(&headers);

    let Some(hook) = state.hook_store.find_by_id(&id) else {
        return (StatusCode::NOT_FOUND, format!("no hook definition with id '{id}'")).into_response();
    };

    if !hook.allows_method(method.as_str()) {
        return (StatusCode::BAD_REQUEST, format!("method {method} not allowed for this hook")).into_response();
    }

    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let parsed_json: Option<serde_json::Value> = if content_type.map(|ct| ct.starts_with("application/json")) == Some(true) {
        serde_json::from_slice(&body).ok()
    } else {
        None
    };

    let query_map = parse_query_string(uri.query());
    let form_map = parse_form_body(content_type, &body);
    let request = RequestView {
        headers: header_multimap(&headers),
        query: query_map,
        form: form_map,
        parsed_json: parsed_json.as_ref(),
        raw_body: &body,
    };

    if !hook.trigger_rule.evaluate(&request) {
        log_webhook_execution(&state, &hook.id, &method, &ip, &user_agent, &headers, &body, &request.query, true, None, None, start).await;
        return (StatusCode::OK, hook.response_message.clone()).into_response();
    }

    let command_path = match resolve_command(&hook) {
        Ok(p) => p,
        Err(CommandResolutionError::NotFound { hint }) => {
            let msg = hint.unwrap_or_else(|| format!("command `{}` not found", hook.execute_command));
            log_webhook_execution(&state, &hook.id, &method, &ip, &user_agent, &headers, &body, &request.query, false, Some(msg.clone()), None, start).await;
            return (StatusCode::BAD_REQUEST, msg).into_response();
        }
    };

    let inputs = extract_inputs(&hook, &request);
    let timeout = Duration::from_secs(state.config.server.webhook_timeout_secs);
    let exec_result = execute(&hook, &command_path, &inputs, timeout).await;

    let (success, output, error) = match &exec_result {
        Ok(outcome) => (
            outcome.success,
            Some(outcome.combined_output.clone()),
            (!outcome.success).then(|| format!("command exited with {:?}", outcome.exit_code)),
        ),
        Err(e) => (false, None, Some(e.to_string())),
    };

    log_webhook_execution(&state, &hook.id, &method, &ip, &user_agent, &headers, &body, &request.query, success, error, output.clone(), start).await;

    state.event_bus.publish(EventMessage::HookTriggered {
        hook_id: hook.id.clone(),
        project_name: None,
        success,
        at: chrono::Utc::now(),
    });

    if success {
        (StatusCode::OK, hook.response_message.clone()).into_response()
    } else {
        let detail = output.unwrap_or_default();
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{}\n{}", hook.response_message, detail)).into_response()
    }
}

#[allow(clippy::too_many_arguments)]
async fn log_webhook_execution(
    state: &AppState,
    hook_id: &str,
    method: &Method,
    ip: &str,
    user_agent: &Option<String>,
    headers: &HeaderMap,
    body: &Bytes,
    query: &HashMap<String, String>,
    success: bool,
    error: Option<String>,
    output: Option<String>,
    start: Instant,
) {
    let query_json = serde_json::to_value(query).unwrap_or_else(|_| serde_json::json!({}));
    let record = NewExecutionRecord {
        hook_id: hook_id.to_string(),
        hook_name: None,
        hook_type: HookType::Webhook,
        method: method.as_str().to_string(),
        remote_addr: Some(ip.to_string()),
        user_agent: user_agent.clone(),
        headers: headers_as_json(headers),
        body: Some(String::from_utf8_lossy(body).into_owned()),
        query_params: query_json,
        success,
        output,
        error,
        duration_ms: start.elapsed().as_millis() as i64,
    };
    if let Err(e) = audit::log_execution(&state.db, record).await {
        tracing::error!(hook_id, error = %e, "failed to write execution record");
    }
    metrics::record_hook_execution(hook_id, success, start.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_string_parses_simple_pairs() {
        let parsed = parse_query_string(Some("filter=main&page=2"));
        assert_eq!(parsed.get("filter"), Some(&"main".to_string()));
        assert_eq!(parsed.get("page"), Some(&"2".to_string()));
    }

    #[test]
    fn form_body_is_empty_for_non_form_content_types() {
        let parsed = parse_form_body(Some("application/json"), b"a=b");
        assert!(parsed.is_empty());
    }

    #[test]
    fn skip_is_recorded_as_success_never_failure() {
        let record = NewProjectActionRecord::machine("beta", ProjectAction::GithookSkipped, None, Some("feature-x".into()))
            .with_description("branch mismatch");
        assert!(record.success, "skip must record success=true, never conflated with failure");
        assert_eq!(record.description.as_deref(), Some("branch mismatch"));
        assert_eq!(ProjectAction::GithookSkipped.as_str(), "githook-skipped");
    }

    #[test]
    fn form_body_parses_urlencoded_pairs() {
        let parsed = parse_form_body(Some("application/x-www-form-urlencoded"), b"name=demo&env=prod");
        assert_eq!(parsed.get("name"), Some(&"demo".to_string()));
        assert_eq!(parsed.get("env"), Some(&"prod".to_string()));
    }
}
