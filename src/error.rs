//! Error taxonomy for the core engine, independent of the HTTP surface.
//!
//! Handlers convert a `CoreError` into an `ApiError` (see `api::error`) at
//! the boundary; nothing below that boundary should construct an `ApiError`
//! directly.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("authentication required")]
    AuthMissing,

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("{resource} not found: {name}")]
    NotFound { resource: &'static str, name: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// The working directory isn't a Git repository at all — an
    /// infrastructure failure, not a resolvable client-side conflict.
    #[error("not a git repository: {0}")]
    NotAGitRepo(String),

    #[error("git command failed: {0}")]
    FatalGit(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    pub fn not_found(resource: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            name: name.into(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

impl From<CoreError> for crate::api::error::ApiError {
    fn from(err: CoreError) -> Self {
        use crate::api::error::ApiError;
        match err {
            CoreError::AuthMissing => ApiError::unauthorized("authentication required"),
            CoreError::AuthFailed(msg) => ApiError::unauthorized(msg),
            CoreError::NotFound { resource, name } => {
                ApiError::not_found(format!("{resource} '{name}' not found"))
            }
            CoreError::InvalidArgument(msg) => ApiError::bad_request(msg),
            CoreError::Conflict(msg) => ApiError::conflict(msg),
            CoreError::PreconditionFailed(msg) => ApiError::conflict(msg),
            CoreError::NotAGitRepo(msg) => ApiError::internal(msg),
            CoreError::FatalGit(msg) => ApiError::internal(msg),
            CoreError::Cancelled => ApiError::internal("operation cancelled"),
            CoreError::Other(err) => {
                tracing::error!(error = %err, "unhandled core error");
                ApiError::internal("internal error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_formats_resource_and_name() {
        let err = CoreError::not_found("project", "alpha");
        assert_eq!(err.to_string(), "project not found: alpha");
    }

    #[test]
    fn not_a_git_repo_maps_to_internal_not_conflict() {
        use axum::response::IntoResponse;
        let err = CoreError::NotAGitRepo("/srv/apps/demo".to_string());
        let response = crate::api::error::ApiError::from(err).into_response();
        assert_eq!(response.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn precondition_failed_still_maps_to_conflict() {
        use axum::response::IntoResponse;
        let err = CoreError::PreconditionFailed("cannot delete the current branch: main".to_string());
        let response = crate::api::error::ApiError::from(err).into_response();
        assert_eq!(response.status(), axum::http::StatusCode::CONFLICT);
    }
}
