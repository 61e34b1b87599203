use anyhow::Result;
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use dashmon_datasource::DataSourceRegistry;
use dashmon_server::alerting::AlertScheduler;
use dashmon_server::app;
use dashmon_server::clock::{Clock, SystemClock};
use dashmon_server::config::ServerConfig;
use dashmon_server::service::DashboardService;
use dashmon_server::state::AppState;
use dashmon_storage::AlertStore;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  dashmon-server [config.toml]    Start the server (default: config/server.toml)");
}

#[tokio::main]
async fn main() -> Result<()> {
    dashmon_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("dashmon=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(|s| s.as_str()) {
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        other => run_server(other.unwrap_or("config/server.toml")).await,
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutting down gracefully");
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;

    tracing::info!(
        http_port = config.http_port,
        data_dir = %config.data_dir,
        db = %config.redacted_url(),
        "dashmon-server starting"
    );

    if config.database_url.trim().is_empty() {
        std::fs::create_dir_all(&config.data_dir)?;
    }
    let store = Arc::new(AlertStore::new(&config.connection_url()).await?);

    let mut registry = DataSourceRegistry::new(config.alerting.query_timeout());
    registry.initialize(&config.datasources).await;
    let registry = Arc::new(registry);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let service = Arc::new(DashboardService::new(
        store.clone(),
        registry.clone(),
        clock.clone(),
        config.alerting.history_limit,
    ));

    let shutdown = CancellationToken::new();
    let scheduler_handle = if config.alerting.enabled {
        let scheduler = AlertScheduler::new(
            store.clone(),
            registry.clone(),
            clock.clone(),
            &config.alerting,
        );
        let token = shutdown.clone();
        Some(tokio::spawn(async move {
            scheduler.run(token).await;
        }))
    } else {
        tracing::info!("Alert scheduler disabled");
        None
    };

    let config = Arc::new(config);
    let state = AppState {
        service,
        config: config.clone(),
        start_time: Utc::now(),
    };

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let app = app::build_http_app(state);
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!(http = %http_addr, "Server started");

    if let Err(e) = axum::serve(http_listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "HTTP server error");
    }

    shutdown.cancel();
    if let Some(handle) = scheduler_handle {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Alert scheduler task failed");
        }
    }
    registry.close().await;
    tracing::info!("Server stopped");

    Ok(())
}
