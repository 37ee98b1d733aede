//! End-to-end proxy tests against a real upstream on a loopback port.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::routing::any;
use axum::{Json, Router};
use tower::ServiceExt;

use api_gateway::proxy::build_router;
use api_gateway::routes::{sort_routes, Route};
use api_gateway::{Gateway, Matcher, RegistryClient};

/// Upstream that echoes method, path, query, and selected headers.
async fn spawn_upstream() -> u16 {
    let app = Router::new().fallback(any(|request: Request| async move {
        let lane = request
            .headers()
            .get("x-lane")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let user_agent = request
            .headers()
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("<missing>")
            .to_string();
        Json(serde_json::json!({
            "method": request.method().as_str(),
            "path": request.uri().path(),
            "query": request.uri().query().unwrap_or_default(),
            "lane": lane,
            "user_agent": user_agent,
        }))
    }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    port
}

fn gateway_router(upstream_port: u16) -> Router {
    let mut routes = vec![
        Route {
            prefix: "/api/paas/".into(),
            service: "127.0.0.1".into(),
            port: upstream_port,
            strip_prefix: "/api/paas".into(),
            rewrite_prefix: "/api/v1".into(),
        },
        Route {
            prefix: "/webhook/".into(),
            service: "127.0.0.1".into(),
            port: upstream_port,
            ..Route::default()
        },
        Route {
            prefix: "/dead/".into(),
            service: "127.0.0.1".into(),
            port: 1,
            ..Route::default()
        },
    ];
    sort_routes(&mut routes);

    // Registry is unreachable: resolution falls back to the route table.
    let registry = Arc::new(RegistryClient::new("http://127.0.0.1:1"));
    let gateway = Arc::new(Gateway::new(
        Matcher::new(routes),
        registry,
        Duration::from_secs(5),
    ));
    build_router(gateway)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn proxies_with_path_rewrite_and_query() {
    let port = spawn_upstream().await;
    let router = gateway_router(port);

    let request = Request::builder()
        .uri("/api/paas/apps/myapp?lane=dev&limit=10")
        .header("x-lane", "dev")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["path"], "/api/v1/apps/myapp");
    assert_eq!(body["query"], "lane=dev&limit=10");
    // The lane header rides along untouched.
    assert_eq!(body["lane"], "dev");
    // No client User-Agent: the proxy sends an empty one, not its own.
    assert_eq!(body["user_agent"], "");
}

#[tokio::test]
async fn proxies_without_rewrite() {
    let port = spawn_upstream().await;
    let router = gateway_router(port);

    let request = Request::builder()
        .method("POST")
        .uri("/webhook/bot1/event")
        .body(Body::from("payload"))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["method"], "POST");
    assert_eq!(body["path"], "/webhook/bot1/event");
}

#[tokio::test]
async fn unknown_path_is_404() {
    let port = spawn_upstream().await;
    let router = gateway_router(port);

    let request = Request::builder()
        .uri("/nowhere")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bare_prefix_redirects_with_query() {
    let port = spawn_upstream().await;
    let router = gateway_router(port);

    let request = Request::builder()
        .uri("/webhook?x=1")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        response.headers().get("location").unwrap(),
        "/webhook/?x=1"
    );
}

#[tokio::test]
async fn dead_upstream_is_502() {
    let port = spawn_upstream().await;
    let router = gateway_router(port);

    let request = Request::builder()
        .uri("/dead/endpoint")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn request_id_is_assigned_and_preserved() {
    let port = spawn_upstream().await;
    let router = gateway_router(port);

    // Assigned when absent.
    let request = Request::builder()
        .uri("/webhook/ping")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert!(!response
        .headers()
        .get("x-request-id")
        .unwrap()
        .is_empty());

    // Preserved when the client supplies one.
    let request = Request::builder()
        .uri("/webhook/ping")
        .header("x-request-id", "client-chosen-id")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "client-chosen-id"
    );
}

#[tokio::test]
async fn health_endpoints() {
    let router = gateway_router(1);
    for path in ["/healthz", "/readyz"] {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn polls_the_registry_wire_format() {
    // A miniature lite-registry endpoint.
    let app = Router::new().route(
        "/v1/routes",
        axum::routing::get(|| async {
            Json(serde_json::json!({
                "services": {
                    "lark-proxy": { "lanes": ["dev", "prod"], "port": 3003 }
                },
                "updated_at": "2026-08-02T00:00:00Z"
            }))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    let client = RegistryClient::new(&format!("http://{addr}"));
    client.poll().await;

    assert_eq!(
        client.resolve("lark-proxy", "dev", 9999),
        ("lark-proxy-dev".to_string(), 3003)
    );
}
