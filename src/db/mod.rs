pub mod models;

pub use models::*;

use anyhow::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

pub type DbPool = SqlitePool;

const MIGRATION_001_INITIAL: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    name TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    description TEXT,
    enabled INTEGER NOT NULL DEFAULT 1,
    hook_enabled INTEGER NOT NULL DEFAULT 0,
    hook_mode TEXT NOT NULL DEFAULT 'branch',
    hook_branch TEXT NOT NULL DEFAULT '*',
    hook_secret TEXT,
    force_sync INTEGER NOT NULL DEFAULT 0,
    sync_config TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS hook_executions (
    id TEXT PRIMARY KEY,
    hook_id TEXT NOT NULL,
    hook_name TEXT,
    hook_type TEXT NOT NULL,
    method TEXT NOT NULL,
    remote_addr TEXT,
    user_agent TEXT,
    headers TEXT,
    body TEXT,
    query_params TEXT,
    success INTEGER NOT NULL,
    output TEXT,
    error TEXT,
    duration_ms INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_hook_executions_created_at ON hook_executions (created_at DESC, id DESC);

CREATE TABLE IF NOT EXISTS project_actions (
    id TEXT PRIMARY KEY,
    project_name TEXT NOT NULL,
    action TEXT NOT NULL,
    old_value TEXT,
    new_value TEXT,
    username TEXT NOT NULL,
    success INTEGER NOT NULL,
    error TEXT,
    commit_hash TEXT,
    description TEXT,
    ip_address TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_project_actions_created_at ON project_actions (created_at DESC, id DESC);
CREATE INDEX IF NOT EXISTS idx_project_actions_project ON project_actions (project_name);
"#;

/// Execute a SQL migration script, properly handling comments
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

pub async fn init(data_dir: &Path) -> Result<DbPool> {
    let db_path = data_dir.join("forgehook.db");
    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    info!("Initializing database at {}", db_path.display());

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    let has_projects_table: Option<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type='table' AND name='projects'",
    )
    .fetch_optional(pool)
    .await?;
    if has_projects_table.is_none() {
        execute_sql(pool, MIGRATION_001_INITIAL).await?;
    }

    // force_sync was added after the initial rollout on deployments that
    // bootstrapped from an older schema snapshot.
    let has_force_sync: Option<(String,)> = sqlx::query_as(
        "SELECT name FROM pragma_table_info('projects') WHERE name = 'force_sync'",
    )
    .fetch_optional(pool)
    .await?;
    if has_force_sync.is_none() {
        execute_sql(
            pool,
            "ALTER TABLE projects ADD COLUMN force_sync INTEGER NOT NULL DEFAULT 0",
        )
        .await?;
    }

    info!("Database migrations complete");
    Ok(())
}
