//! REST API surface.
//!
//! Every endpoint under `/api/v1` is gated by the optional `X-API-Key`
//! header (constant-time comparison) and a 1 MiB body cap. Responses use
//! the `{"data": …}` / `{"error": …}` envelope; semantic error kinds map
//! onto status codes in [`error_response`].

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;
use tracing::error;

use paas_domain::error::Error;

use crate::apps::{AppService, CreateAppRequest, UpdateAppRequest};
use crate::builds::{BuildEngine, CreateBuildRequest};
use crate::image_repos::{CreateImageRepoRequest, ImageRepoService, UpdateImageRepoRequest};
use crate::lanes::{CreateLaneRequest, LaneService};
use crate::logs::LogService;
use crate::releases::{CreateReleaseRequest, ReleaseService};

const MAX_BODY_BYTES: usize = 1 << 20;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct EngineState {
    pub apps: Arc<AppService>,
    pub lanes: Arc<LaneService>,
    pub image_repos: Arc<ImageRepoService>,
    pub builds: Arc<BuildEngine>,
    pub releases: Arc<ReleaseService>,
    pub logs: Arc<LogService>,
    pub api_token: Arc<String>,
}

/// Build the complete engine router: `/healthz` plus `/api/v1`.
pub fn build_router(state: EngineState) -> Router {
    let api = Router::new()
        .route("/apps", post(create_app).get(list_apps))
        .route(
            "/apps/{app}",
            get(get_app).put(update_app).delete(delete_app),
        )
        .route("/apps/{app}/logs", get(app_logs))
        .route("/apps/{app}/builds", post(create_app_build).get(list_app_builds))
        .route("/apps/{app}/builds/latest", get(latest_app_build))
        .route("/apps/{app}/builds/{id}", get(get_app_build))
        .route("/apps/{app}/builds/{id}/cancel", post(cancel_app_build))
        .route("/apps/{app}/builds/{id}/logs", get(app_build_logs))
        .route("/image-repos", post(create_image_repo).get(list_image_repos))
        .route(
            "/image-repos/{repo}",
            get(get_image_repo).put(update_image_repo).delete(delete_image_repo),
        )
        .route(
            "/image-repos/{repo}/builds",
            post(create_build).get(list_builds),
        )
        .route("/image-repos/{repo}/builds/latest", get(latest_build))
        .route("/image-repos/{repo}/builds/{id}", get(get_build))
        .route("/image-repos/{repo}/builds/{id}/cancel", post(cancel_build))
        .route("/image-repos/{repo}/builds/{id}/logs", get(build_logs))
        .route(
            "/releases",
            post(create_release).get(list_releases).delete(delete_release_by_identity),
        )
        .route(
            "/releases/{id}",
            get(get_release).put(update_release).delete(delete_release),
        )
        .route("/lanes", post(create_lane).get(list_lanes))
        .route("/lanes/{lane}", get(get_lane).delete(delete_lane))
        .layer(middleware::from_fn_with_state(state.clone(), auth))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state);

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
}

// ── Envelope ──────────────────────────────────────────────────────

fn ok<T: serde::Serialize>(data: T) -> Response {
    Json(serde_json::json!({ "data": data })).into_response()
}

fn created<T: serde::Serialize>(data: T) -> Response {
    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "data": data })),
    )
        .into_response()
}

fn error_response(err: Error) -> Response {
    let (status, message) = match &err {
        Error::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        Error::AlreadyExists(_) => (StatusCode::CONFLICT, err.to_string()),
        Error::InvalidInput(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        Error::CannotDelete(_) | Error::CannotCancel(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
        }
        Error::Internal(detail) => {
            error!(detail = %detail, "internal error");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
        }
    };
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn respond<T: serde::Serialize>(result: Result<T, Error>) -> Response {
    match result {
        Ok(data) => ok(data),
        Err(err) => error_response(err),
    }
}

// ── Middleware ────────────────────────────────────────────────────

async fn auth(State(state): State<EngineState>, request: Request, next: Next) -> Response {
    if state.api_token.is_empty() {
        return next.run(request).await;
    }
    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if bool::from(provided.as_bytes().ct_eq(state.api_token.as_bytes())) {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "unauthorized" })),
        )
            .into_response()
    }
}

// ── Health ────────────────────────────────────────────────────────

async fn healthz() -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

// ── Apps ──────────────────────────────────────────────────────────

async fn create_app(
    State(state): State<EngineState>,
    Json(req): Json<CreateAppRequest>,
) -> Response {
    match state.apps.create(req).await {
        Ok(app) => created(app),
        Err(err) => error_response(err),
    }
}

async fn list_apps(State(state): State<EngineState>) -> Response {
    respond(state.apps.list().await)
}

async fn get_app(State(state): State<EngineState>, Path(app): Path<String>) -> Response {
    respond(state.apps.get(&app).await)
}

async fn update_app(
    State(state): State<EngineState>,
    Path(app): Path<String>,
    Json(req): Json<UpdateAppRequest>,
) -> Response {
    respond(state.apps.update(&app, req).await)
}

async fn delete_app(State(state): State<EngineState>, Path(app): Path<String>) -> Response {
    respond(state.apps.delete(&app).await.map(|()| "deleted"))
}

#[derive(Deserialize)]
struct LogsQuery {
    #[serde(default)]
    lane: String,
    #[serde(default = "default_since")]
    since: String,
    #[serde(default)]
    limit: u32,
}

fn default_since() -> String {
    "1h".to_string()
}

async fn app_logs(
    State(state): State<EngineState>,
    Path(app): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Response {
    respond(
        state
            .logs
            .app_logs(&app, &query.lane, &query.since, query.limit)
            .await,
    )
}

// ── Builds (app-scoped aliases) ───────────────────────────────────
//
// Builds belong to image repos; the app routes resolve the app's repo
// and delegate.

async fn repo_of_app(state: &EngineState, app: &str) -> Result<String, Error> {
    let app = state.apps.get(app).await?;
    app.image_repo
        .clone()
        .ok_or_else(|| Error::invalid_input(format!("app {:?} has no image repo", app.name)))
}

async fn create_app_build(
    State(state): State<EngineState>,
    Path(app): Path<String>,
    Json(req): Json<CreateBuildRequest>,
) -> Response {
    match repo_of_app(&state, &app).await {
        Ok(repo) => match state.builds.create_build(&repo, req).await {
            Ok(build) => created(build),
            Err(err) => error_response(err),
        },
        Err(err) => error_response(err),
    }
}

async fn list_app_builds(State(state): State<EngineState>, Path(app): Path<String>) -> Response {
    match repo_of_app(&state, &app).await {
        Ok(repo) => respond(state.builds.list(&repo).await),
        Err(err) => error_response(err),
    }
}

async fn latest_app_build(State(state): State<EngineState>, Path(app): Path<String>) -> Response {
    match repo_of_app(&state, &app).await {
        Ok(repo) => respond(state.builds.latest_successful(&repo).await),
        Err(err) => error_response(err),
    }
}

async fn get_app_build(
    State(state): State<EngineState>,
    Path((app, id)): Path<(String, String)>,
) -> Response {
    match repo_of_app(&state, &app).await {
        Ok(repo) => respond(state.builds.get_for_repo(&repo, &id).await),
        Err(err) => error_response(err),
    }
}

async fn cancel_app_build(
    State(state): State<EngineState>,
    Path((app, id)): Path<(String, String)>,
) -> Response {
    match repo_of_app(&state, &app).await {
        Ok(repo) => respond(state.builds.cancel(&repo, &id).await.map(|()| "cancelled")),
        Err(err) => error_response(err),
    }
}

async fn app_build_logs(
    State(state): State<EngineState>,
    Path((app, id)): Path<(String, String)>,
) -> Response {
    match repo_of_app(&state, &app).await {
        Ok(repo) => respond(state.builds.get_logs(&repo, &id).await),
        Err(err) => error_response(err),
    }
}

// ── Builds (image-repo scoped) ────────────────────────────────────

async fn create_build(
    State(state): State<EngineState>,
    Path(repo): Path<String>,
    Json(req): Json<CreateBuildRequest>,
) -> Response {
    match state.builds.create_build(&repo, req).await {
        Ok(build) => created(build),
        Err(err) => error_response(err),
    }
}

async fn list_builds(State(state): State<EngineState>, Path(repo): Path<String>) -> Response {
    respond(state.builds.list(&repo).await)
}

async fn latest_build(State(state): State<EngineState>, Path(repo): Path<String>) -> Response {
    respond(state.builds.latest_successful(&repo).await)
}

async fn get_build(
    State(state): State<EngineState>,
    Path((repo, id)): Path<(String, String)>,
) -> Response {
    respond(state.builds.get_for_repo(&repo, &id).await)
}

async fn cancel_build(
    State(state): State<EngineState>,
    Path((repo, id)): Path<(String, String)>,
) -> Response {
    respond(state.builds.cancel(&repo, &id).await.map(|()| "cancelled"))
}

async fn build_logs(
    State(state): State<EngineState>,
    Path((repo, id)): Path<(String, String)>,
) -> Response {
    respond(state.builds.get_logs(&repo, &id).await)
}

// ── Image repos ───────────────────────────────────────────────────

async fn create_image_repo(
    State(state): State<EngineState>,
    Json(req): Json<CreateImageRepoRequest>,
) -> Response {
    match state.image_repos.create(req).await {
        Ok(repo) => created(repo),
        Err(err) => error_response(err),
    }
}

async fn list_image_repos(State(state): State<EngineState>) -> Response {
    respond(state.image_repos.list().await)
}

async fn get_image_repo(State(state): State<EngineState>, Path(repo): Path<String>) -> Response {
    respond(state.image_repos.get(&repo).await)
}

async fn update_image_repo(
    State(state): State<EngineState>,
    Path(repo): Path<String>,
    Json(req): Json<UpdateImageRepoRequest>,
) -> Response {
    respond(state.image_repos.update(&repo, req).await)
}

async fn delete_image_repo(State(state): State<EngineState>, Path(repo): Path<String>) -> Response {
    respond(state.image_repos.delete(&repo).await.map(|()| "deleted"))
}

// ── Releases ──────────────────────────────────────────────────────

async fn create_release(
    State(state): State<EngineState>,
    Json(req): Json<CreateReleaseRequest>,
) -> Response {
    match state.releases.create_or_update(req).await {
        Ok(release) => created(release),
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize)]
struct ReleaseFilter {
    app: Option<String>,
    lane: Option<String>,
}

async fn list_releases(
    State(state): State<EngineState>,
    Query(filter): Query<ReleaseFilter>,
) -> Response {
    respond(
        state
            .releases
            .list(filter.app.as_deref(), filter.lane.as_deref())
            .await,
    )
}

async fn delete_release_by_identity(
    State(state): State<EngineState>,
    Query(filter): Query<ReleaseFilter>,
) -> Response {
    let (Some(app), Some(lane)) = (filter.app, filter.lane) else {
        return error_response(Error::invalid_input("app and lane query params are required"));
    };
    respond(
        state
            .releases
            .delete_by_app_and_lane(&app, &lane)
            .await
            .map(|()| "deleted"),
    )
}

async fn get_release(State(state): State<EngineState>, Path(id): Path<String>) -> Response {
    respond(state.releases.get(&id).await)
}

async fn update_release(
    State(state): State<EngineState>,
    Path(id): Path<String>,
    Json(req): Json<CreateReleaseRequest>,
) -> Response {
    respond(state.releases.update(&id, req).await)
}

async fn delete_release(State(state): State<EngineState>, Path(id): Path<String>) -> Response {
    respond(state.releases.delete(&id).await.map(|()| "deleted"))
}

// ── Lanes ─────────────────────────────────────────────────────────

async fn create_lane(
    State(state): State<EngineState>,
    Json(req): Json<CreateLaneRequest>,
) -> Response {
    match state.lanes.create(req).await {
        Ok(lane) => created(lane),
        Err(err) => error_response(err),
    }
}

async fn list_lanes(State(state): State<EngineState>) -> Response {
    respond(state.lanes.list().await)
}

async fn get_lane(State(state): State<EngineState>, Path(lane): Path<String>) -> Response {
    respond(state.lanes.get(&lane).await)
}

async fn delete_lane(State(state): State<EngineState>, Path(lane): Path<String>) -> Response {
    respond(state.lanes.delete(&lane).await.map(|()| "deleted"))
}
