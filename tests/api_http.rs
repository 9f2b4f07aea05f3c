// tests/api_http.rs
//
// HTTP-level tests for the status Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - GET /sources
// - GET /deliveries?limit=N

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{self, Body},
    Router,
};
use http::{header, Request, StatusCode};
use serde_json::Value as Json;
use tower::ServiceExt as _; // for `oneshot`

use common::{item, tracked, StaticSource};
use tracker_notify::api::{self, AppState};
use tracker_notify::history::{History, HistoryEntry};
use tracker_notify::status::{SourcePhase, StatusBoard};

const BODY_LIMIT: usize = 1024 * 1024;

fn test_state() -> AppState {
    let status = Arc::new(StatusBoard::new());
    let feed = tracked("feed", StaticSource::new(vec![item("a", "A")]), Duration::from_secs(900));
    let mut off = tracked("off", StaticSource::new(vec![]), Duration::from_secs(60));
    off.enabled = false;
    status.reset([&feed, &off]);
    status.cycle_ok("feed");
    status.set_phase("feed", SourcePhase::Polling);

    let history = Arc::new(History::with_capacity(100));
    for (n, outcome) in ["delivered", "failed", "delivered"].into_iter().enumerate() {
        history.push(HistoryEntry {
            ts_unix: 1_700_000_000 + n as u64,
            source_id: "feed".into(),
            sink: "tg".into(),
            event_id: format!("ev{n}"),
            title: format!("Release {n}"),
            outcome,
            attempts: 1 + n as u32,
        });
    }
    AppState { status, history }
}

fn test_router() -> Router {
    api::router(test_state())
}

async fn get_json(app: Router, uri: &str) -> Json {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.oneshot(req).await.expect("oneshot");
    assert_eq!(resp.status(), StatusCode::OK, "{uri} should be 200");
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("build GET /health");
    let resp = test_router().oneshot(req).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(String::from_utf8(bytes.to_vec()).unwrap().trim(), "OK");
}

#[tokio::test]
async fn api_sources_lists_phase_and_progress() {
    let v = get_json(test_router(), "/sources").await;
    let sources = v["sources"].as_array().expect("sources array");
    assert_eq!(sources.len(), 2);

    let feed = sources.iter().find(|s| s["id"] == "feed").unwrap();
    assert_eq!(feed["phase"], "polling");
    assert_eq!(feed["kind"], "static");
    assert_eq!(feed["interval_secs"], 900);
    assert_eq!(feed["cycles"], 1);
    assert!(feed["last_success"].is_string());

    let off = sources.iter().find(|s| s["id"] == "off").unwrap();
    assert_eq!(off["phase"], "disabled");
}

#[tokio::test]
async fn api_deliveries_newest_first_with_limit() {
    let v = get_json(test_router(), "/deliveries?limit=2").await;
    assert_eq!(v["total"], 3);
    let items = v["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["event_id"], "ev2");
    assert_eq!(items[1]["outcome"], "failed");

    let all = get_json(test_router(), "/deliveries").await;
    assert_eq!(all["items"].as_array().unwrap().len(), 3);
}
