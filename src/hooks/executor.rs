//! Hook matching and execution (C6): resolve the command to run, extract
//! arguments/env/files from the inbound request as a pure function, then
//! spawn the child process and capture its output.

use crate::error::CoreError;
use crate::hooks::def::{HookDef, ValueSource};
use crate::utils::{short_id, truncate_output};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// A read-only view over an inbound request, used by trigger rule evaluation
/// and by template extraction. Borrows from the caller's parsed request so no
/// copying happens before a hook is known to match.
#[derive(Debug, Clone)]
pub struct RequestView<'a> {
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub form: HashMap<String, String>,
    pub parsed_json: Option<&'a serde_json::Value>,
    pub raw_body: &'a [u8],
}

impl<'a> RequestView<'a> {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn form(&self, name: &str) -> Option<&str> {
        self.form.get(name).map(String::as_str)
    }
}

/// A non-fatal problem hit while extracting a value from a template; the
/// extraction continues, but the hook invocation carries this forward so it
/// can be surfaced in the execution record.
#[derive(Debug, Clone)]
pub struct ExtractionWarning {
    pub template_index: usize,
    pub reason: String,
}

/// Output of the pure extraction step: ordered argument strings, an ordered
/// list of env var assignments, and file contents keyed by the env var that
/// will carry each generated temp file's path.
#[derive(Debug, Clone, Default)]
pub struct ExtractedInputs {
    pub arguments: Vec<String>,
    pub env: Vec<(String, String)>,
    pub files: Vec<(String, String)>,
    pub warnings: Vec<ExtractionWarning>,
}

fn resolve_value(source: &ValueSource, request: &RequestView) -> Option<String> {
    match source {
        ValueSource::Static { value } => Some(value.clone()),
        ValueSource::Header { name } => request.header(name).map(str::to_string),
        ValueSource::Query { name } => request.query(name).map(str::to_string),
        ValueSource::PayloadForm { name } => request.form(name).map(str::to_string),
        ValueSource::PayloadJsonPath { path } => {
            let json = request.parsed_json?;
            let mut current = json;
            for segment in path.split('.') {
                current = current.get(segment)?;
            }
            Some(match current {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        }
        ValueSource::RawBody => Some(String::from_utf8_lossy(request.raw_body).into_owned()),
    }
}

/// Pure: walks the hook definition's templates against the request and
/// returns what would be passed to the child process. Never touches the
/// filesystem or mutates `hook`.
pub fn extract_inputs(hook: &HookDef, request: &RequestView) -> ExtractedInputs {
    let mut out = ExtractedInputs::default();

    for (i, tmpl) in hook.argument_templates.iter().enumerate() {
        match resolve_value(&tmpl.source, request) {
            Some(v) => out.arguments.push(v),
            None => out.warnings.push(ExtractionWarning {
                template_index: i,
                reason: "argument template resolved to no value".to_string(),
            }),
        }
    }

    for (i, tmpl) in hook.env_templates.iter().enumerate() {
        match resolve_value(&tmpl.source, request) {
            Some(v) => out.env.push((tmpl.name.clone(), v)),
            None => out.warnings.push(ExtractionWarning {
                template_index: i,
                reason: format!("env template `{}` resolved to no value", tmpl.name),
            }),
        }
    }

    for (i, tmpl) in hook.file_templates.iter().enumerate() {
        match resolve_value(&tmpl.source, request) {
            Some(v) => out.files.push((tmpl.env_var.clone(), v)),
            None => out.warnings.push(ExtractionWarning {
                template_index: i,
                reason: format!("file template `{}` resolved to no value", tmpl.env_var),
            }),
        }
    }

    out
}

#[derive(Debug)]
pub enum CommandResolutionError {
    NotFound { hint: Option<String> },
}

/// Resolve `execute_command` to a runnable path: absolute paths are used
/// as-is; relative paths are joined with `working_directory`; anything else
/// is looked up on `PATH`. A command string containing a space is very
/// likely an attempt to pass arguments inline, which this system does not
/// support — arguments must go through the argument-template mechanism.
pub fn resolve_command(hook: &HookDef) -> Result<PathBuf, CommandResolutionError> {
    let raw = hook.execute_command.trim();

    if raw.contains(' ') {
        return Err(CommandResolutionError::NotFound {
            hint: Some(
                "executeCommand must name a single executable; pass arguments via argumentTemplates"
                    .to_string(),
            ),
        });
    }

    let candidate = Path::new(raw);
    if candidate.is_absolute() {
        return Ok(candidate.to_path_buf());
    }

    let joined = Path::new(&hook.working_directory).join(candidate);
    if joined.is_file() {
        return Ok(joined);
    }

    which(raw).ok_or(CommandResolutionError::NotFound { hint: None })
}

fn which(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub exit_code: Option<i32>,
    pub combined_output: String,
    pub success: bool,
    pub warnings: Vec<String>,
}

const MAX_CAPTURED_OUTPUT_BYTES: usize = 64 * 1024;

/// Write each extracted file to a fresh temp path, run the hook's command
/// with extracted arguments/env plus `FILE_*` env vars pointing at those
/// temp files, then remove them best-effort regardless of outcome.
pub async fn execute(
    hook: &HookDef,
    command_path: &Path,
    inputs: &ExtractedInputs,
    timeout: Duration,
) -> Result<ExecutionOutcome> {
    let mut temp_paths = Vec::new();
    let mut env_vars: Vec<(String, String)> = inputs.env.clone();

    for (env_var, contents) in &inputs.files {
        let path = std::env::temp_dir().join(format!("forgehook-{}-{}", hook.id, short_id()));
        tokio::fs::write(&path, contents)
            .await
            .with_context(|| format!("failed to write temp file for `{env_var}`"))?;
        env_vars.push((env_var.clone(), path.to_string_lossy().into_owned()));
        temp_paths.push(path);
    }

    let result = run_child(command_path, &hook.working_directory, &inputs.arguments, &env_vars, timeout).await;

    for path in &temp_paths {
        let _ = tokio::fs::remove_file(path).await;
    }

    let mut outcome = result?;
    outcome
        .warnings
        .extend(inputs.warnings.iter().map(|w| w.reason.clone()));
    Ok(outcome)
}

/// Spawn the hook's command, racing its completion against a per-call
/// cancellation token that fires when `timeout` elapses. `kill_on_drop`
/// makes losing the race actually terminate the child instead of merely
/// abandoning the future that was reading its output.
async fn run_child(
    command_path: &Path,
    working_directory: &str,
    arguments: &[String],
    env_vars: &[(String, String)],
    timeout: Duration,
) -> Result<ExecutionOutcome> {
    let child = Command::new(command_path)
        .args(arguments)
        .current_dir(working_directory)
        .envs(env_vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn `{}`", command_path.display()))?;

    let cancel = CancellationToken::new();
    let timer_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        timer_cancel.cancel();
    });

    let output = tokio::select! {
        res = child.wait_with_output() => {
            res.with_context(|| format!("`{}` did not complete", command_path.display()))?
        }
        _ = cancel.cancelled() => {
            return Err(anyhow::Error::new(CoreError::Cancelled))
                .with_context(|| format!("hook command timed out after {timeout:?}"));
        }
    };

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok(ExecutionOutcome {
        exit_code: output.status.code(),
        combined_output: truncate_output(&combined, MAX_CAPTURED_OUTPUT_BYTES),
        success: output.status.success(),
        warnings: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::rule::{MatchOp, MatchSource, TriggerRule};

    fn sample_hook() -> HookDef {
        HookDef {
            id: "test-hook".to_string(),
            execute_command: "/usr/bin/true".to_string(),
            working_directory: "/tmp".to_string(),
            response_message: String::new(),
            http_methods: vec!["POST".to_string()],
            trigger_rule: TriggerRule::Match {
                source: MatchSource::Header,
                name: Some("X-Test".into()),
                op: MatchOp::Equals { value: "y".into() },
            },
            argument_templates: vec![],
            env_templates: vec![],
            file_templates: vec![],
        }
    }

    fn empty_request(raw_body: &'static [u8]) -> RequestView<'static> {
        RequestView {
            headers: HashMap::new(),
            query: HashMap::new(),
            form: HashMap::new(),
            parsed_json: None,
            raw_body,
        }
    }

    #[test]
    fn request_view_header_lookup_is_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("X-Event".to_string(), "push".to_string());
        let request = RequestView {
            headers,
            query: HashMap::new(),
            form: HashMap::new(),
            parsed_json: None,
            raw_body: b"",
        };
        assert_eq!(request.header("x-event"), Some("push"));
    }

    #[test]
    fn extract_inputs_reports_missing_header_as_warning_not_error() {
        let mut hook = sample_hook();
        hook.argument_templates.push(crate::hooks::def::ArgumentTemplate {
            source: ValueSource::Header {
                name: "X-Missing".to_string(),
            },
        });
        let inputs = extract_inputs(&hook, &empty_request(b""));
        assert!(inputs.arguments.is_empty());
        assert_eq!(inputs.warnings.len(), 1);
    }

    #[test]
    fn extract_inputs_resolves_static_and_json_path_sources() {
        let mut hook = sample_hook();
        hook.argument_templates.push(crate::hooks::def::ArgumentTemplate {
            source: ValueSource::Static {
                value: "deploy".to_string(),
            },
        });
        hook.env_templates.push(crate::hooks::def::EnvTemplate {
            name: "BRANCH".to_string(),
            source: ValueSource::PayloadJsonPath {
                path: "ref".to_string(),
            },
        });
        let payload = serde_json::json!({"ref": "refs/heads/main"});
        let request = RequestView {
            headers: HashMap::new(),
            query: HashMap::new(),
            form: HashMap::new(),
            parsed_json: Some(&payload),
            raw_body: b"",
        };
        let inputs = extract_inputs(&hook, &request);
        assert_eq!(inputs.arguments, vec!["deploy"]);
        assert_eq!(inputs.env, vec![("BRANCH".to_string(), "refs/heads/main".to_string())]);
        assert!(inputs.warnings.is_empty());
    }

    #[test]
    fn resolve_command_rejects_command_strings_with_spaces() {
        let mut hook = sample_hook();
        hook.execute_command = "/usr/bin/env echo hi".to_string();
        let err = resolve_command(&hook).unwrap_err();
        match err {
            CommandResolutionError::NotFound { hint } => assert!(hint.is_some()),
        }
    }

    #[test]
    fn resolve_command_accepts_absolute_path() {
        let hook = sample_hook();
        let resolved = resolve_command(&hook).unwrap();
        assert_eq!(resolved, Path::new("/usr/bin/true"));
    }

    #[tokio::test]
    async fn execute_runs_command_and_captures_success() {
        let hook = sample_hook();
        let command_path = resolve_command(&hook).unwrap();
        let inputs = ExtractedInputs::default();
        let outcome = execute(&hook, &command_path, &inputs, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn execute_writes_and_cleans_up_temp_files() {
        let hook = sample_hook();
        let command_path = resolve_command(&hook).unwrap();
        let inputs = ExtractedInputs {
            files: vec![("PAYLOAD_FILE".to_string(), "hello".to_string())],
            ..Default::default()
        };
        execute(&hook, &command_path, &inputs, Duration::from_secs(5))
            .await
            .unwrap();

        let leftover = std::env::temp_dir()
            .read_dir()
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().starts_with(&format!("forgehook-{}-", hook.id)));
        assert!(!leftover);
    }
}
