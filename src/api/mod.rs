pub mod admin_version;
pub mod error;
pub mod metrics;
pub mod rate_limit;
pub mod stream;
pub mod webhook;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::{require_admin_role, require_admin_token};
use crate::AppState;
use rate_limit::{rate_limit_api, rate_limit_webhook};

pub fn create_router(state: Arc<AppState>) -> Router {
    // Read-only admin endpoints: any valid token, `role=user` included.
    let read_routes = Router::new()
        .route("/version", get(admin_version::list_projects))
        .route("/version/:name/branches", get(admin_version::list_branches))
        .route("/version/:name/tags", get(admin_version::list_tags))
        .route("/version/:name/remote", get(admin_version::get_remote))
        .layer(middleware::from_fn_with_state(state.clone(), require_admin_token));

    // Mutating admin endpoints: require `role=admin`, 403 otherwise.
    let mutating_routes = Router::new()
        .route("/version/reload-config", post(admin_version::reload_config))
        .route("/version/add-project", post(admin_version::add_project))
        .route("/version/:name", put(admin_version::update_project))
        .route("/version/:name", delete(admin_version::delete_project))
        .route("/version/:name/switch-branch", post(admin_version::switch_branch))
        .route("/version/:name/switch-tag", post(admin_version::switch_tag))
        .route("/version/:name/branches/:branch", delete(admin_version::delete_branch))
        .route("/version/:name/tags/:tag", delete(admin_version::delete_tag))
        .route("/version/:name/sync-branches", post(admin_version::sync_branches))
        .route("/version/:name/sync-tags", post(admin_version::sync_tags))
        .route("/version/:name/init-git", post(admin_version::init_git))
        .route("/version/:name/set-remote", post(admin_version::set_remote))
        .route("/version/:name/githook", post(admin_version::githook_config))
        .layer(middleware::from_fn(require_admin_role))
        .layer(middleware::from_fn_with_state(state.clone(), require_admin_token));

    let admin_routes = read_routes
        .merge(mutating_routes)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_api));

    // Event stream: auth handled inline (header or `?token=` query param).
    let stream_routes = Router::new().route("/events/stream", get(stream::stream_events));

    // Inbound webhooks: webhook-tier rate limiting, auth is per-hook (HMAC
    // signature or trigger-rule evaluation), not the admin bearer token.
    let webhook_routes = Router::new()
        .route(&format!("{}/:id", state.config.server.hook_prefix), post(webhook::generic_hook))
        .route("/githook/:name", post(webhook::githook))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_webhook));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_endpoint))
        .merge(admin_routes)
        .merge(stream_routes)
        .merge(webhook_routes)
        .layer(middleware::from_fn(metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
