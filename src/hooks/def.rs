//! Hook definition: the declarative record loaded from a definition file.

use crate::hooks::rule::TriggerRule;
use serde::{Deserialize, Serialize};

/// Where a template pulls its value from when extracting arguments, env
/// entries, or file contents from an inbound request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum ValueSource {
    Static { value: String },
    Header { name: String },
    Query { name: String },
    PayloadJsonPath { path: String },
    PayloadForm { name: String },
    RawBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgumentTemplate {
    #[serde(flatten)]
    pub source: ValueSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvTemplate {
    pub name: String,
    #[serde(flatten)]
    pub source: ValueSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTemplate {
    /// Name of the env var that will carry the generated temp file's path.
    pub env_var: String,
    #[serde(flatten)]
    pub source: ValueSource,
}

fn default_http_methods() -> Vec<String> {
    vec!["POST".to_string(), "GET".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookDef {
    pub id: String,
    pub execute_command: String,
    pub working_directory: String,
    #[serde(default)]
    pub response_message: String,
    #[serde(default = "default_http_methods")]
    pub http_methods: Vec<String>,
    pub trigger_rule: TriggerRule,
    #[serde(default)]
    pub argument_templates: Vec<ArgumentTemplate>,
    #[serde(default)]
    pub env_templates: Vec<EnvTemplate>,
    #[serde(default)]
    pub file_templates: Vec<FileTemplate>,
}

impl HookDef {
    pub fn allows_method(&self, method: &str) -> bool {
        self.http_methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }
}

/// Parse a hook definition file's contents: a JSON array of hook objects.
/// If `templating_enabled`, `${VAR}` references are rendered against the
/// process environment before parsing.
pub fn parse_definitions(raw: &str, templating_enabled: bool) -> Result<Vec<HookDef>, String> {
    let rendered = if templating_enabled {
        render_env_template(raw)
    } else {
        raw.to_string()
    };

    serde_json::from_str(&rendered).map_err(|e| format!("invalid hook definition file: {e}"))
}

fn render_env_template(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '$' && raw[i..].starts_with("${") {
            if let Some(end) = raw[i..].find('}') {
                let var_name = &raw[i + 2..i + end];
                let value = std::env::var(var_name).unwrap_or_default();
                out.push_str(&value);
                for _ in 0..end {
                    chars.next();
                }
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// `id` must be unique across the union of all currently loaded files.
/// Returns the first duplicate id found, if any.
pub fn find_duplicate_id<'a>(new_set: &'a [HookDef], loaded_elsewhere: &[String]) -> Option<&'a str> {
    let mut seen_in_new = std::collections::HashSet::new();
    for hook in new_set {
        if !seen_in_new.insert(hook.id.as_str()) {
            return Some(hook.id.as_str());
        }
        if loaded_elsewhere.iter().any(|id| id == &hook.id) {
            return Some(hook.id.as_str());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"[
            {
                "id": "deploy",
                "executeCommand": "/usr/local/bin/deploy.sh",
                "workingDirectory": "/srv/app",
                "responseMessage": "deployed",
                "triggerRule": { "type": "match", "source": "header", "name": "X-Event", "op": "equals", "value": "push" }
            }
        ]"#
    }

    #[test]
    fn parses_a_minimal_definition_file() {
        let hooks = parse_definitions(sample_json(), false).unwrap();
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].id, "deploy");
        assert_eq!(hooks[0].http_methods, vec!["POST", "GET"]);
    }

    #[test]
    fn templating_substitutes_env_vars_before_parsing() {
        std::env::set_var("FORGEHOOK_TEST_CMD", "/usr/bin/echo");
        let raw = r#"[{"id":"x","executeCommand":"${FORGEHOOK_TEST_CMD}","workingDirectory":"/tmp","triggerRule":{"type":"match","source":"header","name":"X","op":"equals","value":"y"}}]"#;
        let hooks = parse_definitions(raw, true).unwrap();
        assert_eq!(hooks[0].execute_command, "/usr/bin/echo");
        std::env::remove_var("FORGEHOOK_TEST_CMD");
    }

    #[test]
    fn duplicate_id_within_new_set_is_detected() {
        let json = r#"[
            {"id":"dup","executeCommand":"a","workingDirectory":"/tmp","triggerRule":{"type":"match","source":"header","name":"X","op":"equals","value":"y"}},
            {"id":"dup","executeCommand":"b","workingDirectory":"/tmp","triggerRule":{"type":"match","source":"header","name":"X","op":"equals","value":"y"}}
        ]"#;
        let hooks = parse_definitions(json, false).unwrap();
        assert_eq!(find_duplicate_id(&hooks, &[]), Some("dup"));
    }

    #[test]
    fn duplicate_id_across_other_files_is_detected() {
        let hooks = parse_definitions(sample_json(), false).unwrap();
        assert_eq!(
            find_duplicate_id(&hooks, &["deploy".to_string()]),
            Some("deploy")
        );
    }

    #[test]
    fn allows_method_is_case_insensitive() {
        let hooks = parse_definitions(sample_json(), false).unwrap();
        assert!(hooks[0].allows_method("post"));
        assert!(hooks[0].allows_method("GET"));
        assert!(!hooks[0].allows_method("DELETE"));
    }
}
