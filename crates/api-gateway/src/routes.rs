//! Route table — loaded from YAML, with a compiled-in fallback.

use serde::Deserialize;

/// One proxy route. `prefix` must end in `/`; a non-empty `strip_prefix`
/// replaces that literal prefix of the request path with
/// `rewrite_prefix` before dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Route {
    pub prefix: String,
    pub service: String,
    pub port: u16,
    #[serde(default)]
    pub strip_prefix: String,
    #[serde(default)]
    pub rewrite_prefix: String,
}

#[derive(Deserialize)]
struct RoutesFile {
    routes: Vec<Route>,
}

/// Load and parse a YAML route table from disk.
pub fn load_from_file(path: &str) -> anyhow::Result<Vec<Route>> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("read routes config {path}: {e}"))?;
    parse(&data)
}

/// Parse YAML into routes, sorted longest-prefix-first. An empty route
/// list is a parse error so the caller falls back.
pub fn parse(data: &str) -> anyhow::Result<Vec<Route>> {
    let file: RoutesFile =
        serde_yaml::from_str(data).map_err(|e| anyhow::anyhow!("parse routes config: {e}"))?;
    if file.routes.is_empty() {
        anyhow::bail!("routes config: no routes defined");
    }
    let mut routes = file.routes;
    sort_routes(&mut routes);
    Ok(routes)
}

/// Longest prefix first, so the matcher can take the first hit.
pub fn sort_routes(routes: &mut [Route]) {
    routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
}

/// Hardcoded table used when the YAML config is missing or unparseable.
pub fn fallback_routes() -> Vec<Route> {
    let mut routes = vec![
        Route {
            prefix: "/api/paas/".into(),
            service: "paas-engine".into(),
            port: 8080,
            strip_prefix: "/api/paas".into(),
            rewrite_prefix: "/api/v1".into(),
        },
        Route {
            prefix: "/webhook/".into(),
            service: "lark-proxy".into(),
            port: 3003,
            ..Route::default()
        },
        Route {
            prefix: "/dashboard/api/".into(),
            service: "monitor-dashboard".into(),
            port: 3002,
            ..Route::default()
        },
        Route {
            prefix: "/dashboard/".into(),
            service: "monitor-dashboard-web".into(),
            port: 80,
            ..Route::default()
        },
    ];
    sort_routes(&mut routes);
    routes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sorts_by_prefix_length() {
        let routes = parse(
            r#"
routes:
  - prefix: /webhook/
    service: lark-proxy
    port: 3003
  - prefix: /dashboard/api/
    service: monitor-dashboard
    port: 3002
  - prefix: /dashboard/
    service: monitor-dashboard-web
    port: 80
"#,
        )
        .unwrap();

        assert_eq!(routes[0].prefix, "/dashboard/api/");
        assert_eq!(routes[1].prefix, "/dashboard/");
        assert_eq!(routes[2].prefix, "/webhook/");
    }

    #[test]
    fn parse_reads_rewrite_fields() {
        let routes = parse(
            r#"
routes:
  - prefix: /api/paas/
    service: paas-engine
    port: 8080
    strip_prefix: /api/paas
    rewrite_prefix: /api/v1
"#,
        )
        .unwrap();
        assert_eq!(routes[0].strip_prefix, "/api/paas");
        assert_eq!(routes[0].rewrite_prefix, "/api/v1");
    }

    #[test]
    fn empty_route_list_is_an_error() {
        assert!(parse("routes: []").is_err());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse("not yaml at all: [").is_err());
        assert!(load_from_file("/nonexistent/routes.yaml").is_err());
    }

    #[test]
    fn fallback_is_sorted() {
        let routes = fallback_routes();
        assert_eq!(routes[0].prefix, "/dashboard/api/");
        for pair in routes.windows(2) {
            assert!(pair[0].prefix.len() >= pair[1].prefix.len());
        }
    }
}
