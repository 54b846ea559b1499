//! HTTP API of a cache node
//!
//! - `GET {base_path}:group/:key`: peer endpoint, fills locally
//! - `GET /users/:id`: demo group lookup (routed)
//! - `GET /health`, `GET /metrics`

use super::coordinator::Coordinator;
use crate::cache::GroupStats;
use crate::common::metrics::{MetricKind, PrometheusText};
use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{timestamp_now_millis, Error};
use crate::demo;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct CacheState {
    pub node_name: String,
    pub coordinator: Arc<Coordinator>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.to_http_status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "Request failed");
        }
        (status, self.to_string()).into_response()
    }
}

pub fn create_router(state: CacheState, base_path: &str) -> Router {
    let peer_route = format!("{}:group/:key", base_path);

    Router::new()
        .route(&peer_route, get(peer_get))
        .route("/users/:id", get(demo::get_user))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_tracing_middleware)),
        )
        .with_state(state)
}

/// Another node routed this key here; serve it from the local group
async fn peer_get(
    State(state): State<CacheState>,
    Path((group, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, Error> {
    let value: Bytes = state.coordinator.serve_peer(&group, &key).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        value,
    ))
}

async fn health(State(state): State<CacheState>) -> impl IntoResponse {
    let router = state.coordinator.router();
    let peers: Vec<String> = router.peers().iter().map(|p| p.to_string()).collect();
    let groups: Vec<String> = state
        .coordinator
        .groups()
        .groups()
        .iter()
        .map(|g| g.name().to_string())
        .collect();

    Json(json!({
        "status": "ok",
        "node": state.node_name,
        "endpoint": router.self_endpoint().to_string(),
        "peer_count": peers.len(),
        "peers": peers,
        "groups": groups,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp_ms": timestamp_now_millis(),
    }))
}

async fn metrics(State(state): State<CacheState>) -> impl IntoResponse {
    let router = state.coordinator.router();
    let groups = state.coordinator.groups().groups();
    let stats: Vec<(String, GroupStats)> = groups
        .iter()
        .map(|g| (g.name().to_string(), g.stats()))
        .collect();

    let per_group = |f: fn(&GroupStats) -> u64| {
        stats
            .iter()
            .map(|(name, s)| (vec![("group", name.as_str())], f(s)))
            .collect::<Vec<_>>()
    };

    let mut text = PrometheusText::new();
    text.metric(
        "peers",
        "Peers in the hash ring",
        MetricKind::Gauge,
        &[(vec![], router.peer_count() as u64)],
    )
    .metric(
        "ring_updates_total",
        "Peer set replacements",
        MetricKind::Counter,
        &[(vec![], router.update_count())],
    )
    .metric("gets_total", "Lookups per group", MetricKind::Counter, &per_group(|s| s.gets))
    .metric("hits_total", "Local cache hits", MetricKind::Counter, &per_group(|s| s.hits))
    .metric(
        "local_loads_total",
        "Fills run on this node",
        MetricKind::Counter,
        &per_group(|s| s.local_loads),
    )
    .metric(
        "peer_loads_total",
        "Lookups answered by the owning peer",
        MetricKind::Counter,
        &per_group(|s| s.peer_loads),
    )
    .metric(
        "coalesced_total",
        "Lookups joined to an in-flight fill",
        MetricKind::Counter,
        &per_group(|s| s.coalesced),
    )
    .metric("errors_total", "Failed lookups", MetricKind::Counter, &per_group(|s| s.errors))
    .metric(
        "evictions_total",
        "Entries evicted for the byte budget",
        MetricKind::Counter,
        &per_group(|s| s.evictions),
    )
    .metric("entries", "Cached entries", MetricKind::Gauge, &per_group(|s| s.entries))
    .metric("bytes", "Cached value bytes", MetricKind::Gauge, &per_group(|s| s.bytes));

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        text.finish(),
    )
}
