//! # Health + Metrics HTTP Surface
//!
//! Builds the axum router that exposes the node's bare operational
//! interface. There is no JSON-RPC gateway, no WebSocket push, and no
//! block/transaction/account query API here -- those are out of scope for
//! this engine; a node's data lives in its own store and is reached through
//! [`podoru_chain::storage::ChainEngine`] directly, not over HTTP.
//!
//! ## Endpoints
//!
//! | Method | Path       | Description                              |
//! |--------|------------|-------------------------------------------|
//! | GET    | `/healthz` | Liveness + readiness probe                |
//! | GET    | `/metrics` | Prometheus text exposition                |

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use podoru_chain::config::MIN_PEERS_FOR_READY;
use podoru_chain::network::gossip::ChainQuery;

use crate::metrics::SharedMetrics;

/// Shared application state available to all request handlers.
///
/// Cheap to clone -- everything behind `Arc`. Implemented by hand rather
/// than derived so `Q` itself never needs to be `Clone`.
pub struct AppState<Q> {
    pub chain: Arc<Q>,
    pub peer_count: Arc<dyn Fn() -> usize + Send + Sync>,
    pub metrics: SharedMetrics,
}

impl<Q> Clone for AppState<Q> {
    fn clone(&self) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
            peer_count: Arc::clone(&self.peer_count),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    height: u64,
    peers: usize,
    version: &'static str,
}

async fn healthz<Q: ChainQuery + Send + Sync + 'static>(
    State(state): State<AppState<Q>>,
) -> impl IntoResponse {
    let peers = (state.peer_count)();
    let (height, _) = state.chain.height_and_head();
    let status = if peers >= MIN_PEERS_FOR_READY || height == 0 { "ready" } else { "alive" };
    (
        StatusCode::OK,
        Json(HealthBody {
            status,
            height,
            peers,
            version: podoru_chain::config::PROTOCOL_VERSION,
        }),
    )
}

async fn metrics<Q: Send + Sync + 'static>(State(state): State<AppState<Q>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

/// Builds the router. Generic over the chain type so it works against
/// either `SledStore` in production or `MemoryStore` in tests.
pub fn build_router<Q: ChainQuery + Send + Sync + 'static>(state: AppState<Q>) -> Router {
    Router::new()
        .route("/healthz", get(healthz::<Q>))
        .route("/metrics", get(metrics::<Q>))
        .route_layer(TraceLayer::new_for_http())
        .with_state(state)
}
