//! Longest-prefix route matching and path rewriting.

use crate::routes::Route;

/// Matches request paths against a pre-sorted route table.
pub struct Matcher {
    routes: Vec<Route>,
}

/// Outcome of a match. `redirect` signals a 301 to `path + "/"`: the
/// path equalled a route prefix minus its trailing slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub route: Route,
    pub redirect: bool,
}

impl Matcher {
    /// Routes must already be sorted longest-prefix-first.
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// First route whose prefix matches wins. `/dashboard` matches the
    /// `/dashboard/` route as a redirect.
    pub fn matches(&self, path: &str) -> Option<MatchResult> {
        for route in &self.routes {
            if path.starts_with(&route.prefix) {
                return Some(MatchResult {
                    route: route.clone(),
                    redirect: false,
                });
            }
            if let Some(bare) = route.prefix.strip_suffix('/') {
                if path == bare {
                    return Some(MatchResult {
                        route: route.clone(),
                        redirect: true,
                    });
                }
            }
        }
        None
    }
}

/// Apply `strip_prefix`/`rewrite_prefix`. An empty `strip_prefix`
/// passes the path through unchanged.
pub fn rewrite_path(path: &str, route: &Route) -> String {
    if route.strip_prefix.is_empty() {
        return path.to_string();
    }
    let trimmed = path.strip_prefix(&route.strip_prefix).unwrap_or(path);
    format!("{}{}", route.rewrite_prefix, trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::sort_routes;

    fn test_matcher() -> Matcher {
        let mut routes = vec![
            Route {
                prefix: "/dashboard/api/".into(),
                service: "monitor-dashboard".into(),
                port: 3002,
                strip_prefix: "/dashboard/api".into(),
                rewrite_prefix: "/dashboard".into(),
            },
            Route {
                prefix: "/dashboard/".into(),
                service: "monitor-dashboard-web".into(),
                port: 80,
                ..Route::default()
            },
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
        ];
        sort_routes(&mut routes);
        Matcher::new(routes)
    }

    #[test]
    fn longest_prefix_wins() {
        let m = test_matcher();

        let cases = [
            ("/dashboard/api/metrics", Some(("monitor-dashboard", false))),
            ("/dashboard/index.html", Some(("monitor-dashboard-web", false))),
            ("/api/paas/apps/", Some(("paas-engine", false))),
            ("/webhook/bot1/event", Some(("lark-proxy", false))),
            ("/unknown/path", None),
            ("/dashboard", Some(("monitor-dashboard-web", true))),
            ("/webhook", Some(("lark-proxy", true))),
            ("/api/paas", Some(("paas-engine", true))),
        ];

        for (path, want) in cases {
            let got = m.matches(path);
            match want {
                None => assert!(got.is_none(), "{path} should not match"),
                Some((service, redirect)) => {
                    let got = got.unwrap_or_else(|| panic!("{path} should match"));
                    assert_eq!(got.route.service, service, "path {path}");
                    assert_eq!(got.redirect, redirect, "path {path}");
                }
            }
        }
    }

    #[test]
    fn rewrite_applies_strip_and_rewrite() {
        let paas = Route {
            strip_prefix: "/api/paas".into(),
            rewrite_prefix: "/api/v1".into(),
            ..Route::default()
        };
        assert_eq!(rewrite_path("/api/paas/apps/myapp", &paas), "/api/v1/apps/myapp");

        let dash = Route {
            strip_prefix: "/dashboard/api".into(),
            rewrite_prefix: "/dashboard".into(),
            ..Route::default()
        };
        assert_eq!(
            rewrite_path("/dashboard/api/metrics", &dash),
            "/dashboard/metrics"
        );

        // No strip prefix: path passes through.
        let plain = Route::default();
        assert_eq!(
            rewrite_path("/webhook/bot1/event", &plain),
            "/webhook/bot1/event"
        );
    }

    #[test]
    fn rewrite_to_empty_prefix() {
        let route = Route {
            strip_prefix: "/static".into(),
            rewrite_prefix: String::new(),
            ..Route::default()
        };
        assert_eq!(rewrite_path("/static/logo.png", &route), "/logo.png");
    }
}
