//! Audit sink (C8): append-only writers and paginated readers over the two
//! history tables (`hook_executions`, `project_actions`).

use crate::db::{
    DbPool, ExecutionListResponse, ExecutionRecord, ExecutionSummary, ListQuery, NewExecutionRecord,
    NewProjectActionRecord, ProjectActionListResponse, ProjectActionQuery, ProjectActionRecord,
};
use crate::utils::short_id;

pub async fn log_execution(db: &DbPool, record: NewExecutionRecord) -> Result<(), sqlx::Error> {
    let id = short_id();
    let now = chrono::Utc::now().to_rfc3339();
    let headers_json = record.headers.to_string();
    let query_json = record.query_params.to_string();

    sqlx::query(
        r#"
        INSERT INTO hook_executions
            (id, hook_id, hook_name, hook_type, method, remote_addr, user_agent, headers, body, query_params, success, output, error, duration_ms, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&record.hook_id)
    .bind(&record.hook_name)
    .bind(record.hook_type.as_str())
    .bind(&record.method)
    .bind(&record.remote_addr)
    .bind(&record.user_agent)
    .bind(&headers_json)
    .bind(&record.body)
    .bind(&query_json)
    .bind(record.success)
    .bind(&record.output)
    .bind(&record.error)
    .bind(record.duration_ms)
    .bind(&now)
    .execute(db)
    .await?;

    tracing::debug!(hook_id = %record.hook_id, success = record.success, "hook execution recorded");
    Ok(())
}

pub async fn list_executions(db: &DbPool, query: &ListQuery) -> Result<ExecutionListResponse, sqlx::Error> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM hook_executions")
        .fetch_one(db)
        .await?;

    let rows: Vec<ExecutionRecord> = sqlx::query_as(
        "SELECT * FROM hook_executions ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
    )
    .bind(query.limit())
    .bind(query.offset())
    .fetch_all(db)
    .await?;

    Ok(ExecutionListResponse {
        executions: rows.iter().map(ExecutionSummary::from).collect(),
        total,
        page: query.page(),
        limit: query.limit(),
    })
}

pub async fn log_project_action(db: &DbPool, record: NewProjectActionRecord) -> Result<(), sqlx::Error> {
    let id = short_id();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO project_actions
            (id, project_name, action, old_value, new_value, username, success, error, commit_hash, description, ip_address, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&record.project_name)
    .bind(record.action.as_str())
    .bind(&record.old_value)
    .bind(&record.new_value)
    .bind(&record.username)
    .bind(record.success)
    .bind(&record.error)
    .bind(&record.commit_hash)
    .bind(&record.description)
    .bind(&record.ip_address)
    .bind(&now)
    .execute(db)
    .await?;

    tracing::debug!(
        project = %record.project_name,
        action = record.action.as_str(),
        username = %record.username,
        "project action recorded"
    );
    Ok(())
}

pub async fn list_project_actions(
    db: &DbPool,
    query: &ProjectActionQuery,
) -> Result<ProjectActionListResponse, sqlx::Error> {
    let page = query.page.filter(|&p| p >= 1).unwrap_or(1);
    let limit = match query.limit {
        Some(l) if l <= 0 => 20,
        Some(l) if l > 100 => 100,
        Some(l) => l,
        None => 20,
    };
    let offset = (page - 1) * limit;

    let (total, rows): (i64, Vec<ProjectActionRecord>) = if let Some(project) = &query.project {
        let total = sqlx::query_scalar("SELECT COUNT(*) FROM project_actions WHERE project_name = ?")
            .bind(project)
            .fetch_one(db)
            .await?;
        let rows = sqlx::query_as(
            "SELECT * FROM project_actions WHERE project_name = ? ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(project)
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await?;
        (total, rows)
    } else {
        let total = sqlx::query_scalar("SELECT COUNT(*) FROM project_actions")
            .fetch_one(db)
            .await?;
        let rows = sqlx::query_as(
            "SELECT * FROM project_actions ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await?;
        (total, rows)
    };

    Ok(ProjectActionListResponse {
        actions: rows,
        total,
        page,
        limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::HookType;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> DbPool {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(
            r#"CREATE TABLE hook_executions (
                id TEXT PRIMARY KEY, hook_id TEXT NOT NULL, hook_name TEXT, hook_type TEXT NOT NULL,
                method TEXT NOT NULL, remote_addr TEXT, user_agent TEXT, headers TEXT, body TEXT,
                query_params TEXT, success INTEGER NOT NULL, output TEXT, error TEXT,
                duration_ms INTEGER NOT NULL, created_at TEXT NOT NULL
            )"#,
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            r#"CREATE TABLE project_actions (
                id TEXT PRIMARY KEY, project_name TEXT NOT NULL, action TEXT NOT NULL,
                old_value TEXT, new_value TEXT, username TEXT NOT NULL, success INTEGER NOT NULL,
                error TEXT, commit_hash TEXT, description TEXT, ip_address TEXT, created_at TEXT NOT NULL
            )"#,
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn log_then_list_execution_round_trips() {
        let pool = test_pool().await;
        log_execution(
            &pool,
            NewExecutionRecord {
                hook_id: "deploy".to_string(),
                hook_name: Some("Deploy".to_string()),
                hook_type: HookType::Webhook,
                method: "POST".to_string(),
                remote_addr: Some("127.0.0.1".to_string()),
                user_agent: None,
                headers: serde_json::json!({}),
                body: None,
                query_params: serde_json::json!({}),
                success: true,
                output: Some("ok".to_string()),
                error: None,
                duration_ms: 42,
            },
        )
        .await
        .unwrap();

        let list = list_executions(&pool, &ListQuery::default()).await.unwrap();
        assert_eq!(list.total, 1);
        assert_eq!(list.executions[0].hook_id, "deploy");
    }

    #[tokio::test]
    async fn list_project_actions_filters_by_project_name() {
        let pool = test_pool().await;
        log_project_action(
            &pool,
            crate::db::NewProjectActionRecord::machine(
                "alpha",
                crate::db::ProjectAction::BranchSwitch,
                Some("develop".into()),
                Some("main".into()),
            ),
        )
        .await
        .unwrap();
        log_project_action(
            &pool,
            crate::db::NewProjectActionRecord::machine(
                "beta",
                crate::db::ProjectAction::BranchSwitch,
                None,
                Some("main".into()),
            ),
        )
        .await
        .unwrap();

        let filtered = list_project_actions(
            &pool,
            &ProjectActionQuery {
                project: Some("alpha".to_string()),
                page: None,
                limit: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(filtered.total, 1);
        assert_eq!(filtered.actions[0].project_name, "alpha");
    }
}
