//! lite-registry — service-discovery cache daemon.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use lite_registry::http::build_router;
use lite_registry::{RegistryConfig, RouteRegistry};
use paas_cluster::MemoryCluster;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,lite_registry=debug".parse().unwrap()),
        )
        .init();

    let cfg = RegistryConfig::from_env();
    info!(
        namespace = %cfg.namespace,
        resync_seconds = cfg.resync_seconds,
        "starting"
    );

    // External cluster adapters are wired at deployment time; this build
    // carries the in-process backend.
    warn!("no external cluster adapter in this build, using the in-process backend");
    let cluster = Arc::new(MemoryCluster::new());

    let registry = Arc::new(RouteRegistry::new(cluster));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.run(shutdown_rx).await })
    };

    let router = build_router(registry);
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "lite-registry listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Give the watcher the shutdown budget to drain.
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, watcher).await;
    info!("lite-registry stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
