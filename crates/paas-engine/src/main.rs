//! paas-engine — control-plane daemon.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use paas_cluster::{BuildJobConfig, JobBuildExecutor, MemoryCluster, TrafficReconciler, WorkloadDeployer};
use paas_domain::ports::{BuildExecutor, Deployer, LogQuerier, RouteRuleReconciler};
use paas_engine::apps::AppService;
use paas_engine::builds::{status_callback, BuildEngine};
use paas_engine::http::{build_router, EngineState};
use paas_engine::image_repos::ImageRepoService;
use paas_engine::lanes::LaneService;
use paas_engine::logs::LogService;
use paas_engine::releases::ReleaseService;
use paas_engine::EngineConfig;
use paas_loki::LokiClient;
use paas_store::PaasStore;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,paas_engine=debug".parse().unwrap()),
        )
        .init();

    let cfg = EngineConfig::from_env();

    // Storage.
    if let Some(parent) = Path::new(&cfg.database_url).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = PaasStore::open(Path::new(&cfg.database_url))
        .map_err(|e| anyhow::anyhow!("open store at {}: {e}", cfg.database_url))?;
    info!(path = %cfg.database_url, "store opened");

    // Cluster backend. External adapters are wired at deployment time;
    // this build carries the in-process backend.
    if !cfg.kubeconfig.is_empty() {
        warn!(
            kubeconfig = %cfg.kubeconfig,
            "no external cluster adapter in this build, using the in-process backend"
        );
    }
    let cluster = Arc::new(MemoryCluster::new());

    let deployer: Arc<dyn Deployer> = Arc::new(WorkloadDeployer::new(cluster.clone()));
    let traffic: Arc<dyn RouteRuleReconciler> = Arc::new(TrafficReconciler::new(cluster.clone()));
    let executor = Arc::new(JobBuildExecutor::new(
        cluster.clone(),
        BuildJobConfig {
            builder_image: cfg.builder_image.clone(),
            registry_secret: Some(cfg.registry_secret.clone()).filter(|s| !s.is_empty()),
            registry_mirrors: cfg.registry_mirrors.clone(),
            insecure_registries: cfg.insecure_registries.clone(),
            cache_repo: Some(cfg.build_cache_repo.clone()).filter(|s| !s.is_empty()),
            http_proxy: Some(cfg.build_http_proxy.clone()).filter(|s| !s.is_empty()),
            no_proxy: Some(cfg.build_no_proxy.clone()).filter(|s| !s.is_empty()),
        },
    ));

    let loki: Arc<dyn LogQuerier> = Arc::new(
        LokiClient::new(&cfg.loki_url).map_err(|e| anyhow::anyhow!("loki client: {e}"))?,
    );

    // Services.
    let apps = Arc::new(AppService::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    ));
    let lanes = Arc::new(LaneService::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    ));
    let image_repos = Arc::new(ImageRepoService::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    ));
    let builds = Arc::new(BuildEngine::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Some(executor.clone() as Arc<dyn BuildExecutor>),
        Some(loki.clone()),
        &cfg.build_namespace,
    ));
    let releases = Arc::new(ReleaseService::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Some(deployer),
        Some(traffic),
    ));
    let logs = Arc::new(LogService::new(
        Arc::new(store.clone()),
        loki,
        &cfg.deploy_namespace,
    ));

    lanes.ensure_default_lane().await
        .map_err(|e| anyhow::anyhow!("ensure default lane: {e}"))?;
    info!("default lane ensured");

    // Build job watcher.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = {
        let executor = executor.clone();
        let callback = status_callback(builds.clone());
        tokio::spawn(async move { executor.watch(callback, shutdown_rx).await })
    };

    // HTTP server.
    let state = EngineState {
        apps,
        lanes,
        image_repos,
        builds,
        releases,
        logs,
        api_token: Arc::new(cfg.api_token.clone()),
    };
    let router = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "paas-engine listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Give the watcher the shutdown budget to drain.
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, watcher).await;
    info!("paas-engine stopped");
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
