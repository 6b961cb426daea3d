//! Append-only record of every hook invocation, webhook or generic.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookType {
    Webhook,
    Githook,
}

impl HookType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookType::Webhook => "webhook",
            HookType::Githook => "githook",
        }
    }
}

/// One row of `hook_executions`. Never updated after insert.
#[derive(Debug, Clone, FromRow)]
pub struct ExecutionRecord {
    pub id: String,
    pub hook_id: String,
    pub hook_name: Option<String>,
    pub hook_type: String,
    pub method: String,
    pub remote_addr: Option<String>,
    pub user_agent: Option<String>,
    pub headers: Option<String>,
    pub body: Option<String>,
    pub query_params: Option<String>,
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub created_at: String,
}

/// Builder for a new execution record prior to insertion — separates
/// "what happened" from "what the store assigned" (id, created_at).
#[derive(Debug, Clone)]
pub struct NewExecutionRecord {
    pub hook_id: String,
    pub hook_name: Option<String>,
    pub hook_type: HookType,
    pub method: String,
    pub remote_addr: Option<String>,
    pub user_agent: Option<String>,
    pub headers: serde_json::Value,
    pub body: Option<String>,
    pub query_params: serde_json::Value,
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionListResponse {
    pub executions: Vec<ExecutionSummary>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub id: String,
    pub hook_id: String,
    pub hook_name: Option<String>,
    pub hook_type: String,
    pub method: String,
    pub remote_addr: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub created_at: String,
}

impl From<&ExecutionRecord> for ExecutionSummary {
    fn from(r: &ExecutionRecord) -> Self {
        Self {
            id: r.id.clone(),
            hook_id: r.hook_id.clone(),
            hook_name: r.hook_name.clone(),
            hook_type: r.hook_type.clone(),
            method: r.method.clone(),
            remote_addr: r.remote_addr.clone(),
            success: r.success,
            error: r.error.clone(),
            duration_ms: r.duration_ms,
            created_at: r.created_at.clone(),
        }
    }
}

/// Pagination request shared by the execution and action-log listing endpoints.
/// `page<1` clamps to 1; `limit` clamps to `[1,100]`, default 20.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl ListQuery {
    pub fn page(&self) -> i64 {
        self.page.filter(|&p| p >= 1).unwrap_or(1)
    }

    pub fn limit(&self) -> i64 {
        match self.limit {
            Some(l) if l <= 0 => 20,
            Some(l) if l > 100 => 100,
            Some(l) => l,
            None => 20,
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.limit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_below_one_clamps_to_one() {
        let q = ListQuery {
            page: Some(0),
            limit: None,
        };
        assert_eq!(q.page(), 1);
        let q = ListQuery {
            page: Some(-5),
            limit: None,
        };
        assert_eq!(q.page(), 1);
    }

    #[test]
    fn limit_clamps_to_one_hundred_and_defaults_to_twenty() {
        let q = ListQuery {
            page: Some(1),
            limit: Some(500),
        };
        assert_eq!(q.limit(), 100);
        let q = ListQuery {
            page: Some(1),
            limit: Some(0),
        };
        assert_eq!(q.limit(), 20);
        let q = ListQuery {
            page: Some(1),
            limit: None,
        };
        assert_eq!(q.limit(), 20);
    }

    #[test]
    fn offset_derives_from_page_and_limit() {
        let q = ListQuery {
            page: Some(3),
            limit: Some(10),
        };
        assert_eq!(q.offset(), 20);
    }
}
