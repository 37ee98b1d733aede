//! End-to-end tests of the engine HTTP surface.
//!
//! The router runs against the in-memory store and the in-process
//! cluster backend; requests are driven with tower's `oneshot`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use tower::ServiceExt;

use paas_cluster::{
    BuildJobConfig, ClusterApi, JobBuildExecutor, MemoryCluster, TrafficReconciler,
    WorkloadDeployer, BUILD_ID_LABEL,
};
use paas_domain::error::Result;
use paas_domain::ports::{BuildExecutor, Deployer, LogQuerier, RouteRuleReconciler};
use paas_engine::apps::AppService;
use paas_engine::builds::BuildEngine;
use paas_engine::http::{build_router, EngineState};
use paas_engine::image_repos::ImageRepoService;
use paas_engine::lanes::LaneService;
use paas_engine::logs::LogService;
use paas_engine::releases::ReleaseService;
use paas_store::PaasStore;

struct StaticQuerier;

#[async_trait]
impl LogQuerier for StaticQuerier {
    async fn query_build_logs(
        &self,
        _namespace: &str,
        _build_id: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<String> {
        Ok(String::new())
    }

    async fn query_app_logs(
        &self,
        _namespace: &str,
        _app_name: &str,
        _lane: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _limit: u32,
    ) -> Result<String> {
        Ok("app log line\n".into())
    }
}

async fn test_router_with_token(token: &str) -> (Router, MemoryCluster) {
    let store = PaasStore::open_in_memory().unwrap();
    let cluster = MemoryCluster::new();
    let api = Arc::new(cluster.clone());

    let deployer: Arc<dyn Deployer> = Arc::new(
        WorkloadDeployer::new(api.clone())
            .with_timing(Duration::from_millis(5), Duration::from_millis(500)),
    );
    let traffic: Arc<dyn RouteRuleReconciler> = Arc::new(TrafficReconciler::new(api.clone()));
    let executor: Arc<dyn BuildExecutor> = Arc::new(JobBuildExecutor::new(
        api.clone(),
        BuildJobConfig {
            builder_image: "kaniko:latest".into(),
            ..BuildJobConfig::default()
        },
    ));
    let querier: Arc<dyn LogQuerier> = Arc::new(StaticQuerier);

    let state = EngineState {
        apps: Arc::new(AppService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
        )),
        lanes: Arc::new(LaneService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
        )),
        image_repos: Arc::new(ImageRepoService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
        )),
        builds: Arc::new(BuildEngine::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Some(executor),
            Some(querier.clone()),
            "paas-builds",
        )),
        releases: Arc::new(ReleaseService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Some(deployer),
            Some(traffic),
        )),
        logs: Arc::new(LogService::new(Arc::new(store.clone()), querier, "default")),
        api_token: Arc::new(token.to_string()),
    };

    state.lanes.ensure_default_lane().await.unwrap();

    (build_router(state), cluster)
}

async fn test_router() -> (Router, MemoryCluster) {
    test_router_with_token("").await
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn seed_repo_and_app(router: &Router, app: &str, port: u16) {
    let (status, _) = send(
        router,
        "POST",
        "/api/v1/image-repos",
        Some(serde_json::json!({
            "name": "shared-repo",
            "registry": "harbor.local/inner-bot/shared",
            "git_repo": "https://github.com/example/platform.git"
        })),
    )
    .await;
    assert!(status == StatusCode::CREATED || status == StatusCode::CONFLICT);

    let (status, _) = send(
        router,
        "POST",
        "/api/v1/apps",
        Some(serde_json::json!({
            "name": app,
            "image_repo": "shared-repo",
            "port": port
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test(flavor = "multi_thread")]
async fn healthz_needs_no_auth() {
    let (router, _) = test_router_with_token("secret").await;
    let (status, body) = send(&router, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test(flavor = "multi_thread")]
async fn api_key_gates_the_api() {
    let (router, _) = test_router_with_token("secret").await;

    let (status, body) = send(&router, "GET", "/api/v1/apps", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let request = Request::builder()
        .uri("/api/v1/apps")
        .header("x-api-key", "secret")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::builder()
        .uri("/api/v1/apps")
        .header("x-api-key", "wrong")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test(flavor = "multi_thread")]
async fn app_crud_over_http() {
    let (router, _) = test_router().await;

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/apps",
        Some(serde_json::json!({ "name": "myapp", "port": 8080 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["name"], "myapp");

    // Duplicate name conflicts.
    let (status, _) = send(
        &router,
        "POST",
        "/api/v1/apps",
        Some(serde_json::json!({ "name": "myapp", "port": 8080 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Invalid name is a 400.
    let (status, _) = send(
        &router,
        "POST",
        "/api/v1/apps",
        Some(serde_json::json!({ "name": "My_App" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&router, "GET", "/api/v1/apps/myapp", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["port"], 8080);

    let (status, _) = send(&router, "GET", "/api/v1/apps/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&router, "DELETE", "/api/v1/apps/myapp", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&router, "GET", "/api/v1/apps/myapp", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn prod_lane_cannot_be_deleted() {
    let (router, _) = test_router().await;

    let (status, body) = send(&router, "DELETE", "/api/v1/lanes/prod", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("default lane"));
}

#[tokio::test(flavor = "multi_thread")]
async fn release_lifecycle_over_http() {
    let (router, cluster) = test_router().await;
    seed_repo_and_app(&router, "myapp", 8080).await;

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/releases",
        Some(serde_json::json!({
            "app_name": "myapp",
            "image_tag": "v1",
            "replicas": 2
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "deployed");
    assert_eq!(body["data"]["lane"], "prod");
    assert_eq!(body["data"]["deploy_name"], "myapp-prod");
    let first_id = body["data"]["id"].as_str().unwrap().to_string();

    // The workload and both services exist in the cluster.
    assert!(cluster.get_workload("myapp-prod").await.unwrap().is_some());
    assert!(cluster.get_service("myapp-prod").await.unwrap().is_some());
    assert!(cluster.get_service("myapp").await.unwrap().is_some());

    // Idempotent on (app, lane): same row, same id.
    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/releases",
        Some(serde_json::json!({
            "app_name": "myapp",
            "image_tag": "v2"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["id"], first_id.as_str());

    let (status, body) = send(&router, "GET", "/api/v1/releases?app=myapp", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    // Delete by identity requires both query params.
    let (status, _) = send(&router, "DELETE", "/api/v1/releases?app=myapp", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &router,
        "DELETE",
        "/api/v1/releases?app=myapp&lane=prod",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&router, "GET", "/api/v1/releases", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_lane_rejects_release() {
    let (router, _) = test_router().await;
    seed_repo_and_app(&router, "myapp", 8080).await;

    let (status, _) = send(
        &router,
        "POST",
        "/api/v1/releases",
        Some(serde_json::json!({
            "app_name": "myapp",
            "lane": "ghost",
            "image_tag": "v1"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn build_lifecycle_over_http() {
    let (router, cluster) = test_router().await;
    seed_repo_and_app(&router, "myapp", 8080).await;

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/image-repos/shared-repo/builds",
        Some(serde_json::json!({ "git_ref": "main", "image_tag": "abc123" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "running");
    assert_eq!(body["data"]["image_tag"], "harbor.local/inner-bot/shared:abc123");
    let build_id = body["data"]["id"].as_str().unwrap().to_string();

    // Live pod logs come back through the executor tier.
    cluster.set_pod_logs(BUILD_ID_LABEL, &build_id, "INFO building layer 1");
    let (status, body) = send(
        &router,
        "GET",
        &format!("/api/v1/image-repos/shared-repo/builds/{build_id}/logs"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], "INFO building layer 1");

    // The app-scoped alias resolves to the same build.
    let (status, body) = send(
        &router,
        "GET",
        &format!("/api/v1/apps/myapp/builds/{build_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], build_id.as_str());

    let (status, _) = send(
        &router,
        "POST",
        &format!("/api/v1/image-repos/shared-repo/builds/{build_id}/cancel"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Cancelling a terminal build is a 422.
    let (status, _) = send(
        &router,
        "POST",
        &format!("/api/v1/image-repos/shared-repo/builds/{build_id}/cancel"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test(flavor = "multi_thread")]
async fn app_logs_endpoint() {
    let (router, _) = test_router().await;
    seed_repo_and_app(&router, "myapp", 8080).await;

    let (status, body) = send(
        &router,
        "GET",
        "/api/v1/apps/myapp/logs?lane=dev&since=1h&limit=100",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], "app log line\n");

    let (status, _) = send(
        &router,
        "GET",
        "/api/v1/apps/myapp/logs?since=never",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
