use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use forgehook::api::rate_limit::spawn_cleanup_task;
use forgehook::config::Config;
use forgehook::events::EventBus;
use forgehook::hooks::{HookStore, HookWatcher};
use forgehook::AppState;

#[derive(Parser, Debug)]
#[command(name = "forgehook")]
#[command(author, version, about = "Webhook-driven deployment and version-control orchestrator", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "forgehook.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;

    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting forgehook v{}", env!("CARGO_PKG_VERSION"));

    let metrics_handle = forgehook::api::metrics::init_metrics();
    tracing::info!("Prometheus metrics initialized at /metrics");

    forgehook::utils::ensure_dir(&config.server.data_dir)?;
    forgehook::utils::ensure_dir(&config.hooks.definitions_dir)?;

    let db = forgehook::db::init(&config.server.data_dir).await?;

    let hook_store = Arc::new(HookStore::new(config.hooks.templating_enabled));
    let definition_files = scan_definition_files(&config.hooks.definitions_dir)?;
    if let Err(e) = hook_store.reload_all(&definition_files) {
        tracing::warn!(error = %e, "one or more hook definition files failed to load at startup");
    }
    tracing::info!(
        "Loaded {} hook definitions from {} files",
        hook_store.all().len(),
        hook_store.loaded_file_count(),
    );

    let _watcher = HookWatcher::start(
        config.hooks.definitions_dir.clone(),
        hook_store.clone(),
        std::time::Duration::from_millis(config.hooks.watcher_settle_ms),
    )?;

    let event_bus = Arc::new(EventBus::new(config.events.buffer_capacity));

    let state = Arc::new(
        AppState::new(config.clone(), db.clone(), event_bus, hook_store).with_metrics(metrics_handle),
    );

    spawn_cleanup_task(state.rate_limiter.clone(), config.rate_limit.cleanup_interval);
    tracing::info!(
        "Rate limiting enabled: {} req/min (API), {} req/min (webhooks), {} req/min (auth)",
        config.rate_limit.api_requests_per_window,
        config.rate_limit.webhook_requests_per_window,
        config.rate_limit.auth_requests_per_window
    );

    let app = forgehook::api::create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .expect("invalid server address");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn scan_definition_files(dir: &std::path::Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    Ok(paths)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining in-flight requests");
}
