//! Registry configuration — loaded from environment variables.

#[derive(Clone, Debug)]
pub struct RegistryConfig {
    pub http_port: u16,
    /// Namespace whose Services are mirrored.
    pub namespace: String,
    /// Full-relist interval of the underlying watcher, in seconds.
    pub resync_seconds: u64,
}

impl RegistryConfig {
    pub fn from_env() -> Self {
        Self {
            http_port: parsed("HTTP_PORT", 8080),
            namespace: std::env::var("NAMESPACE")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "prod".to_string()),
            resync_seconds: parsed("RESYNC_SECONDS", 60),
        }
    }
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
