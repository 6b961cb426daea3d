//! Admin token verification: tokens are configured ahead of time and
//! compared against SHA-256 digests in-memory. No login flow, no session
//! store — credential issuance happens out of band.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;

pub const TOKEN_HEADER: &str = "x-gohook-key";

use crate::config::AdminToken;
use crate::AppState;

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub username: String,
    pub role: String,
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Find the configured token whose hash matches `presented`, honoring any
/// `expires_at`. Constant-time over the digest comparison, not the scan
/// itself — digests are not secrets, the token is.
pub fn authenticate(tokens: &[AdminToken], presented: &str) -> Option<AuthenticatedUser> {
    let presented_hash = hash_token(presented);
    let now = chrono::Utc::now();

    tokens
        .iter()
        .find(|t| {
            let matches = t.token_hash.as_bytes().ct_eq(presented_hash.as_bytes()).into();
            let not_expired = t.expires_at.map(|exp| exp > now).unwrap_or(true);
            matches && not_expired
        })
        .map(|t| AuthenticatedUser {
            username: t.username.clone(),
            role: t.role.clone(),
        })
}

/// Pull the presented token out of a request: `X-GoHook-Key` header first,
/// falling back to a `?token=` query parameter for endpoints (SSE streams)
/// that can't set custom headers.
pub fn extract_presented_token(request: &Request<Body>) -> Option<String> {
    if let Some(v) = request
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        return Some(v.to_string());
    }

    request.uri().query().and_then(|q| {
        q.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == "token").then(|| v.to_string())
        })
    })
}

pub async fn require_admin_token(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = extract_presented_token(&request) else {
        return (StatusCode::UNAUTHORIZED, "missing X-GoHook-Key token").into_response();
    };

    match authenticate(&state.config.auth.tokens, &token) {
        Some(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None => (StatusCode::UNAUTHORIZED, "invalid or expired token").into_response(),
    }
}

/// Gate mutating endpoints to `role=admin`. Read-only endpoints only need a
/// valid token, any role. Must be layered so it runs after
/// `require_admin_token` has inserted the `AuthenticatedUser` extension.
pub async fn require_admin_role(request: Request<Body>, next: Next) -> Response {
    match request.extensions().get::<AuthenticatedUser>() {
        Some(user) if user.role == "admin" => next.run(request).await,
        Some(user) => {
            crate::api::error::ApiError::forbidden(format!(
                "role '{}' may not perform this operation, admin required",
                user.role
            ))
            .into_response()
        }
        None => (StatusCode::UNAUTHORIZED, "missing authentication").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(username: &str, raw: &str, expires_at: Option<chrono::DateTime<chrono::Utc>>) -> AdminToken {
        AdminToken {
            token_hash: hash_token(raw),
            username: username.to_string(),
            role: "admin".to_string(),
            expires_at,
        }
    }

    #[test]
    fn correct_token_authenticates() {
        let tokens = vec![token("alice", "secret-token", None)];
        let user = authenticate(&tokens, "secret-token").unwrap();
        assert_eq!(user.username, "alice");
    }

    #[test]
    fn wrong_token_is_rejected() {
        let tokens = vec![token("alice", "secret-token", None)];
        assert!(authenticate(&tokens, "wrong").is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        let past = chrono::Utc::now() - chrono::Duration::hours(1);
        let tokens = vec![token("alice", "secret-token", Some(past))];
        assert!(authenticate(&tokens, "secret-token").is_none());
    }

    #[test]
    fn unexpired_token_with_future_expiry_is_accepted() {
        let future = chrono::Utc::now() + chrono::Duration::hours(1);
        let tokens = vec![token("alice", "secret-token", Some(future))];
        assert!(authenticate(&tokens, "secret-token").is_some());
    }

    #[test]
    fn extracts_token_from_header_over_query_param() {
        let request = Request::builder()
            .uri("/events/stream?token=from-query")
            .header(TOKEN_HEADER, "from-header")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_presented_token(&request), Some("from-header".to_string()));
    }

    #[test]
    fn falls_back_to_query_param_when_header_absent() {
        let request = Request::builder()
            .uri("/events/stream?token=from-query")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_presented_token(&request), Some("from-query".to_string()));
    }

    #[test]
    fn admin_role_is_recognized() {
        let tokens = vec![AdminToken {
            token_hash: hash_token("op-token"),
            username: "ops".to_string(),
            role: "admin".to_string(),
            expires_at: None,
        }];
        let user = authenticate(&tokens, "op-token").unwrap();
        assert_eq!(user.role, "admin");
    }

    #[test]
    fn user_role_is_distinct_from_admin() {
        let tokens = vec![AdminToken {
            token_hash: hash_token("viewer-token"),
            username: "viewer".to_string(),
            role: "user".to_string(),
            expires_at: None,
        }];
        let user = authenticate(&tokens, "viewer-token").unwrap();
        assert_eq!(user.role, "user");
        assert_ne!(user.role, "admin");
    }
}
