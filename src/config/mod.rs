use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
    #[serde(default)]
    pub events: EventBusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Path prefix generic hooks are served under, e.g. "/hooks".
    #[serde(default = "default_hook_prefix")]
    pub hook_prefix: String,
    /// End-to-end budget for a single webhook request, in seconds.
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            hook_prefix: default_hook_prefix(),
            webhook_timeout_secs: default_webhook_timeout_secs(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_hook_prefix() -> String {
    "/hooks".to_string()
}

fn default_webhook_timeout_secs() -> u64 {
    60
}

/// A single admin credential. Tokens are configured ahead of time and
/// verified in-memory — there is no login flow or session store.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminToken {
    /// SHA-256 hex digest of the bearer token, never the token itself.
    pub token_hash: String,
    pub username: String,
    #[serde(default = "default_role")]
    pub role: String,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

fn default_role() -> String {
    "user".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: Vec<AdminToken>,
    /// Passphrase used to derive the AES-256-GCM key that encrypts
    /// `hook_secret` at rest. Secrets are stored in plaintext if absent.
    #[serde(default)]
    pub encryption_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitConfig {
    /// Per-`git` invocation timeout, in seconds.
    #[serde(default = "default_git_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Path to the `git` binary, resolved via PATH if relative.
    #[serde(default = "default_git_binary")]
    pub binary: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_git_timeout_secs(),
            binary: default_git_binary(),
        }
    }
}

fn default_git_timeout_secs() -> u64 {
    30
}

fn default_git_binary() -> String {
    "git".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HooksConfig {
    /// Directory scanned for hook definition files (`*.json`).
    #[serde(default = "default_hooks_dir")]
    pub definitions_dir: PathBuf,
    /// Render `${VAR}` references against the process environment before
    /// parsing a definition file.
    #[serde(default)]
    pub templating_enabled: bool,
    /// Settle delay after a rename event, before deciding reload vs remove.
    #[serde(default = "default_watcher_settle_ms")]
    pub watcher_settle_ms: u64,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            definitions_dir: default_hooks_dir(),
            templating_enabled: false,
            watcher_settle_ms: default_watcher_settle_ms(),
        }
    }
}

fn default_hooks_dir() -> PathBuf {
    PathBuf::from("./data/hooks")
}

fn default_watcher_settle_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventBusConfig {
    /// Per-subscriber buffer capacity before messages are dropped for it.
    #[serde(default = "default_event_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_event_buffer_capacity(),
        }
    }
}

fn default_event_buffer_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_requests_per_window")]
    pub api_requests_per_window: u32,
    #[serde(default = "default_webhook_requests_per_window")]
    pub webhook_requests_per_window: u32,
    #[serde(default = "default_auth_requests_per_window")]
    pub auth_requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_api_requests_per_window() -> u32 {
    100
}

fn default_webhook_requests_per_window() -> u32 {
    500
}

fn default_auth_requests_per_window() -> u32 {
    20
}

fn default_window_seconds() -> u64 {
    60
}

fn default_cleanup_interval() -> u64 {
    300
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            api_requests_per_window: default_api_requests_per_window(),
            webhook_requests_per_window: default_webhook_requests_per_window(),
            auth_requests_per_window: default_auth_requests_per_window(),
            window_seconds: default_window_seconds(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| "Failed to parse configuration file")?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            git: GitConfig::default(),
            hooks: HooksConfig::default(),
            events: EventBusConfig::default(),
            logging: LoggingConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_admin_tokens() {
        let cfg = Config::default();
        assert!(cfg.auth.tokens.is_empty());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = Config::load(Path::new("/nonexistent/forgehook.toml")).unwrap();
        assert_eq!(cfg.server.port, 9000);
    }

    #[test]
    fn parses_minimal_toml() {
        let toml_src = r#"
            [server]
            port = 9100

            [[auth.tokens]]
            token_hash = "abc123"
            username = "alice"
            role = "admin"
        "#;
        let cfg: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.auth.tokens.len(), 1);
        assert_eq!(cfg.auth.tokens[0].username, "alice");
    }
}
