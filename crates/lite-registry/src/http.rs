//! HTTP surface of the registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::registry::{RouteRegistry, ServiceInfo};

pub fn build_router(registry: Arc<RouteRegistry>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/v1/routes", get(list_routes))
        .route("/v1/routes/{service}", get(get_route))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

#[derive(Serialize)]
struct RoutesResponse {
    services: BTreeMap<String, ServiceInfo>,
    updated_at: String,
}

async fn healthz() -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

/// 503 until the initial cache sync has completed.
async fn readyz(State(registry): State<Arc<RouteRegistry>>) -> Response {
    if !registry.ready() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "not ready" })),
        )
            .into_response();
    }
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

async fn list_routes(State(registry): State<Arc<RouteRegistry>>) -> Response {
    Json(RoutesResponse {
        services: registry.snapshot(),
        updated_at: registry.updated_at().to_rfc3339(),
    })
    .into_response()
}

async fn get_route(
    State(registry): State<Arc<RouteRegistry>>,
    Path(service): Path<String>,
) -> Response {
    match registry.get(&service) {
        Some(info) => Json(info).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "service not found" })),
        )
            .into_response(),
    }
}
