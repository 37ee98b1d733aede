//! api-gateway — lane-aware reverse-proxy daemon.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use api_gateway::proxy::build_router;
use api_gateway::{routes, Gateway, GatewayConfig, Matcher, RegistryClient};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,api_gateway=debug".parse().unwrap()),
        )
        .init();

    let cfg = GatewayConfig::from_env();

    let route_table = match routes::load_from_file(&cfg.routes_config) {
        Ok(routes) => routes,
        Err(err) => {
            warn!(path = %cfg.routes_config, error = %err, "failed to load routes config, using fallback");
            routes::fallback_routes()
        }
    };
    info!(count = route_table.len(), "routes loaded");

    let registry = Arc::new(RegistryClient::new(&cfg.registry_url));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = {
        let registry = registry.clone();
        let interval = Duration::from_secs(cfg.poll_interval_seconds);
        tokio::spawn(async move { registry.run(interval, shutdown_rx).await })
    };

    let gateway = Arc::new(Gateway::new(
        Matcher::new(route_table),
        registry,
        Duration::from_secs(cfg.proxy_timeout_seconds),
    ));
    let router = build_router(gateway);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "api-gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Give the poller the shutdown budget to drain.
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, poller).await;
    info!("api-gateway stopped");
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
