//! Engine configuration — loaded from environment variables.

/// Runtime configuration of the paas-engine process.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// HTTP listen port.
    pub http_port: u16,
    /// Path of the embedded database file.
    pub database_url: String,
    /// Kubeconfig path for the cluster adapter; empty means in-process.
    pub kubeconfig: String,
    /// Namespace workloads and services are applied into.
    pub deploy_namespace: String,
    /// Namespace build jobs run in.
    pub build_namespace: String,
    /// Image of the kaniko-style builder container.
    pub builder_image: String,
    /// Secret with registry push credentials.
    pub registry_secret: String,
    pub registry_mirrors: Vec<String>,
    pub insecure_registries: Vec<String>,
    /// Remote layer-cache repository for builds.
    pub build_cache_repo: String,
    pub build_http_proxy: String,
    pub build_no_proxy: String,
    /// API key gating `/api/v1`; empty disables auth.
    pub api_token: String,
    /// Base URL of the Loki-compatible log backend.
    pub loki_url: String,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            http_port: env_parsed("HTTP_PORT", 8080),
            database_url: env_or("DATABASE_URL", "/var/lib/paas-engine/paas.redb"),
            kubeconfig: env_or("KUBECONFIG", ""),
            deploy_namespace: env_or("DEPLOY_NAMESPACE", "default"),
            build_namespace: env_or("KANIKO_NAMESPACE", "paas-builds"),
            builder_image: env_or("KANIKO_IMAGE", "harbor.local/tools/kaniko:latest"),
            registry_secret: env_or("REGISTRY_SECRET", "harbor-secret"),
            registry_mirrors: env_csv("REGISTRY_MIRRORS"),
            insecure_registries: env_csv("INSECURE_REGISTRIES"),
            build_cache_repo: env_or("KANIKO_CACHE_REPO", ""),
            build_http_proxy: env_or("BUILD_HTTP_PROXY", ""),
            build_no_proxy: env_or("BUILD_NO_PROXY", ""),
            api_token: env_or("API_TOKEN", ""),
            loki_url: env_or(
                "LOKI_URL",
                "http://loki-gateway.monitoring.svc.cluster.local",
            ),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_csv(key: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
