//! Emas back office: inventory intake, sales, lebur and daily reporting for
//! a jewelry shop, served as an HTTP+JSON API over a local SQLite database.
//!
//! Both operating modes (emas tua, emas muda) share one schema and one
//! implementation; see [`mode::Mode`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod categories;
pub mod codegen;
pub mod commands;
pub mod config;
pub mod customers;
pub mod data_helpers;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod groceries;
pub mod lebur;
pub mod mode;
pub mod outgoing;
pub mod purchases;
pub mod sales;
pub mod summary;
pub mod washing;

use config::AppConfig;
use db::DbState;

/// Unix seconds at startup, for the uptime reported by `/api/health`.
pub(crate) static APP_START_EPOCH: AtomicU64 = AtomicU64::new(0);

/// State shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbState>,
    pub config: Arc<AppConfig>,
}

// ============================================================================
// Logging
// ============================================================================

/// Console + daily rolling file logging. The returned guard must be kept
/// alive; dropping it flushes and stops the file writer.
pub fn init_tracing(config: &AppConfig) -> WorkerGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,emas_backoffice_lib=debug,tower_http=info"));

    let log_dir = diagnostics::get_log_dir(&config.log_dir);
    diagnostics::prune_old_logs(&log_dir);

    let file_appender = tracing_appender::rolling::daily(&log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let (console_json, console_plain) = if config.log_json {
        (Some(fmt::layer().json().with_target(true)), None)
    } else {
        (None, Some(fmt::layer().with_target(true)))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_json)
        .with(console_plain)
        .with(file_layer)
        .init();

    guard
}

// ============================================================================
// App entry point
// ============================================================================

/// Build the full HTTP application around an opened database.
pub fn build_app(state: AppState) -> axum::Router {
    let cors = if state.config.cors_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    commands::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub async fn run() -> anyhow::Result<()> {
    let epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    APP_START_EPOCH.store(epoch, Ordering::Relaxed);

    let config = AppConfig::from_env();
    let _guard = init_tracing(&config);

    info!("Starting Emas Back Office v{}", env!("CARGO_PKG_VERSION"));

    let db_path = config.db_path();
    let db_state = {
        let timeout = config.tx_timeout;
        tokio::task::spawn_blocking(move || db::init(&db_path, timeout))
            .await
            .context("database init task")??
    };

    let state = AppState {
        db: Arc::new(db_state),
        config: Arc::new(config.clone()),
    };
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .context("server failed")?;

    info!("Emas Back Office stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = sigint.recv() => {}
                }
            }
            _ => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received");
}
