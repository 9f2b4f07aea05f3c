// src/api.rs
//! Read-only status surface: health, per-source state, recent deliveries.
//! `/metrics` is merged in by the binary when the recorder is installed.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::history::{History, HistoryEntry};
use crate::status::{SourceStatus, StatusBoard};

const DEFAULT_DELIVERIES: usize = 50;
const MAX_DELIVERIES: usize = 1000;

#[derive(Clone)]
pub struct AppState {
    pub status: Arc<StatusBoard>,
    pub history: Arc<History>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/sources", get(sources))
        .route("/deliveries", get(deliveries))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct SourcesResp {
    sources: Vec<SourceStatus>,
}

async fn sources(State(state): State<AppState>) -> Json<SourcesResp> {
    Json(SourcesResp {
        sources: state.status.snapshot(),
    })
}

#[derive(Deserialize)]
struct DeliveriesQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct DeliveriesResp {
    total: usize,
    items: Vec<HistoryEntry>,
}

async fn deliveries(
    State(state): State<AppState>,
    Query(q): Query<DeliveriesQuery>,
) -> Json<DeliveriesResp> {
    let n = q.limit.unwrap_or(DEFAULT_DELIVERIES).clamp(1, MAX_DELIVERIES);
    let mut items = state.history.snapshot_last_n(n);
    // newest first
    items.reverse();
    Json(DeliveriesResp {
        total: state.history.len(),
        items,
    })
}
