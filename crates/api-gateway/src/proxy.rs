//! The proxy core: match, rewrite, resolve, dispatch.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{HeaderName, HeaderValue, HOST, USER_AGENT};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tracing::{error, info};

use crate::matcher::{rewrite_path, Matcher};
use crate::registry::RegistryClient;

pub const LANE_HEADER: &str = "x-lane";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Hop-by-hop headers that must not be forwarded either way.
const HOP_BY_HOP: [&str; 6] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "transfer-encoding",
    "upgrade",
];

/// The gateway: route matcher + registry-backed lane resolution +
/// upstream dispatch.
pub struct Gateway {
    matcher: Matcher,
    registry: Arc<RegistryClient>,
    http: reqwest::Client,
}

impl Gateway {
    pub fn new(matcher: Matcher, registry: Arc<RegistryClient>, timeout: Duration) -> Self {
        Self {
            matcher,
            registry,
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("proxy http client"),
        }
    }
}

/// Health endpoints plus a catch-all proxying everything else.
pub fn build_router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
        .fallback(proxy)
        .layer(middleware::from_fn(request_id))
        .with_state(gateway)
}

/// Assign (or preserve) the request id, reflect it in the response, and
/// log the request line.
async fn request_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    if let Ok(value) = HeaderValue::from_str(&id) {
        request
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    info!(
        %method,
        path,
        status = response.status().as_u16(),
        duration = ?start.elapsed(),
        request_id = %id,
        "request"
    );
    response
}

async fn proxy(State(gateway): State<Arc<Gateway>>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    let raw_query = request.uri().query().map(str::to_string);

    let Some(result) = gateway.matcher.matches(&path) else {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    };

    if result.redirect {
        let mut target = format!("{path}/");
        if let Some(query) = &raw_query {
            target.push_str(&format!("?{query}"));
        }
        return (
            StatusCode::MOVED_PERMANENTLY,
            [(axum::http::header::LOCATION, target)],
        )
            .into_response();
    }
    let route = result.route;

    let lane = request
        .headers()
        .get(LANE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let (host, port) = gateway.registry.resolve(&route.service, lane, route.port);

    let target_path = rewrite_path(&path, &route);
    let mut url = format!("http://{host}:{port}{target_path}");
    if let Some(query) = &raw_query {
        url.push_str(&format!("?{query}"));
    }

    // Forward headers as-is, minus hop-by-hop and Host (the client sets
    // Host to the upstream authority). A client that sent no User-Agent
    // gets an empty one so the proxy's identity never leaks.
    let mut headers = request.headers().clone();
    headers.remove(HOST);
    strip_hop_by_hop(&mut headers);
    if !headers.contains_key(USER_AGENT) {
        headers.insert(USER_AGENT, HeaderValue::from_static(""));
    }

    let method = request.method().clone();
    let body = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(error = %err, "failed to read request body");
            return (StatusCode::BAD_GATEWAY, "bad gateway: body read failed").into_response();
        }
    };

    let upstream = gateway
        .http
        .request(method, url.as_str())
        .headers(headers)
        .body(body)
        .send()
        .await;

    match upstream {
        Ok(response) => {
            let status = response.status();
            let mut headers = response.headers().clone();
            strip_hop_by_hop(&mut headers);
            match response.bytes().await {
                Ok(bytes) => {
                    let mut out = Response::new(Body::from(bytes));
                    *out.status_mut() = status;
                    *out.headers_mut() = headers;
                    out
                }
                Err(err) => {
                    error!(service = %route.service, url, error = %err, "upstream body error");
                    (StatusCode::BAD_GATEWAY, format!("bad gateway: {err}")).into_response()
                }
            }
        }
        Err(err) => {
            error!(service = %route.service, url, error = %err, "proxy error");
            (StatusCode::BAD_GATEWAY, format!("bad gateway: {err}")).into_response()
        }
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}
