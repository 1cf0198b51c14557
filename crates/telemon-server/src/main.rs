use anyhow::{Context, Result};
use std::net::SocketAddr;
use telemon_common::proto::metrics_server::MetricsServer;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server as TonicServer;
use tracing_subscriber::EnvFilter;

use telemon_server::app;
use telemon_server::config::ServerConfig;
use telemon_server::grpc::MetricsService;
use telemon_server::persistence::PersistenceScheduler;
use telemon_server::state::AppState;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  telemon-server [config.toml]    Start the collector (default: config/server.toml)");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("telemon=info".parse()?))
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

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    tracing::info!(
        http_addr = %config.http_addr,
        grpc_addr = ?config.grpc_addr,
        dsn = %config.database_dsn,
        "telemon-server starting"
    );

    let storage = telemon_storage::open_storage(&config.database_dsn)
        .with_context(|| format!("failed to open storage '{}'", config.database_dsn))?;

    let persistence = PersistenceScheduler::from_config(storage.clone(), &config.snapshot);
    if let Some(scheduler) = &persistence {
        if config.snapshot.restore {
            scheduler
                .restore()
                .with_context(|| format!("failed to restore snapshot {}", scheduler.path().display()))?;
        }
    }

    let state = AppState::from_config(&config, storage.clone(), persistence.clone())?;
    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();

    let persistence_handle = persistence.map(|scheduler| scheduler.spawn(cancel.clone()));

    // HTTP
    let http_addr: SocketAddr = config
        .http_addr
        .parse()
        .with_context(|| format!("invalid http_addr '{}'", config.http_addr))?;
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!(addr = %http_addr, "HTTP listener bound");
    let http_app = app::build_http_app(state.clone());
    let http_cancel = cancel.clone();
    tasks.spawn(async move {
        axum::serve(
            http_listener,
            http_app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { http_cancel.cancelled().await })
        .await
        .context("HTTP server failed")
    });

    // gRPC
    if let Some(addr) = config.grpc_addr.as_deref() {
        let grpc_addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("invalid grpc_addr '{addr}'"))?;
        tracing::info!(addr = %grpc_addr, "gRPC listener starting");
        let service = MetricsServer::new(MetricsService::new(state.clone()));
        let grpc_cancel = cancel.clone();
        tasks.spawn(async move {
            TonicServer::builder()
                .add_service(service)
                .serve_with_shutdown(grpc_addr, async move { grpc_cancel.cancelled().await })
                .await
                .context("gRPC server failed")
        });
    }

    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
        Some(joined) = tasks.join_next() => {
            match joined {
                Ok(Ok(())) => tracing::warn!("Server stopped unexpectedly"),
                Ok(Err(e)) => tracing::error!(error = %e, "Server error"),
                Err(e) => tracing::error!(error = %e, "Server task panicked"),
            }
        }
    }

    cancel.cancel();
    let grace = config.shutdown_grace();
    let drain = async {
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Err(e)) = joined {
                tracing::error!(error = %e, "Server error during shutdown");
            }
        }
        if let Some(handle) = persistence_handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Persistence task panicked");
            }
        }
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        tracing::warn!(grace_secs = grace.as_secs(), "Shutdown grace period elapsed");
    }

    if let Err(e) = storage.close() {
        tracing::error!(error = %e, "Failed to close storage");
    }
    tracing::info!("telemon-server stopped");
    Ok(())
}
