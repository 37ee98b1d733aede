//! Gateway configuration — loaded from environment variables.

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub http_port: u16,
    /// Base URL of the lite-registry service.
    pub registry_url: String,
    /// Path of the YAML route table.
    pub routes_config: String,
    /// Registry poll cadence in seconds.
    pub poll_interval_seconds: u64,
    /// Upstream response timeout in seconds.
    pub proxy_timeout_seconds: u64,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            http_port: parsed("HTTP_PORT", 8080),
            registry_url: string_or("REGISTRY_URL", "http://lite-registry:8080"),
            routes_config: string_or("ROUTES_CONFIG", "/etc/api-gateway/routes.yaml"),
            poll_interval_seconds: parsed("POLL_INTERVAL_SECONDS", 30),
            proxy_timeout_seconds: parsed("PROXY_TIMEOUT_SECONDS", 60),
        }
    }
}

fn string_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
