pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod events;
pub mod git;
pub mod hooks;
pub mod payload;
pub mod signature;
pub mod utils;

pub use db::DbPool;

use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::api::rate_limit::RateLimiter;
use crate::events::EventBus;
use crate::hooks::HookStore;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub event_bus: Arc<EventBus>,
    pub hook_store: Arc<HookStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool, event_bus: Arc<EventBus>, hook_store: Arc<HookStore>) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        Self {
            config,
            db,
            event_bus,
            hook_store,
            rate_limiter,
            metrics_handle: None,
        }
    }

    /// Set the Prometheus metrics handle.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}
