//! In-process scenario tests for pfx-daemon HTTP endpoints.
//!
//! These tests spin up the Axum router **without** binding a TCP socket.
//! Each test calls `routes::build_router` and drives it via
//! `tower::ServiceExt::oneshot`.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use pfx_announce::{GlobalConfig, RoutingEngine, RoutingMetadata};
use pfx_config::RoutingConfig;
use pfx_daemon::{routes, state};
use pfx_reconcile::{Prefix, PrefixBatch};
use pfx_rib_local::LocalRib;
use pfx_runtime::{LoopPhase, LoopStatus};
use tokio::sync::watch;
use tower::ServiceExt; // oneshot

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn status_after_two_cycles() -> LoopStatus {
    LoopStatus {
        phase: LoopPhase::Sleeping,
        cycles_completed: 2,
        source_connected: true,
        known_prefixes: 2,
        last_added: 1,
        last_removed: 0,
        known: vec![Prefix::from("10.0.0.0/24"), Prefix::from("192.0.2.1")],
        ..LoopStatus::default()
    }
}

async fn rib_with(prefixes: &[&str]) -> Arc<LocalRib> {
    let rib = Arc::new(LocalRib::new());
    rib.start(GlobalConfig::from(&RoutingConfig::default()))
        .await
        .unwrap();
    if !prefixes.is_empty() {
        let meta = RoutingMetadata::try_from(&RoutingConfig::default()).unwrap();
        let set: BTreeSet<Prefix> = prefixes.iter().map(|s| Prefix::from(*s)).collect();
        let (routes, _) = meta.build_routes(&PrefixBatch::new(set).unwrap(), false);
        rib.add_path(routes).await.unwrap();
    }
    rib
}

fn make_router(status: LoopStatus, rib: Arc<LocalRib>) -> (axum::Router, watch::Sender<LoopStatus>) {
    let (tx, rx) = watch::channel(status);
    let st = Arc::new(state::AppState::new(rx, rib, "abc123"));
    (routes::build_router(st), tx)
}

/// Drive the router with a single GET and return (status, body_bytes).
async fn get(router: axum::Router, uri: &str) -> (StatusCode, bytes::Bytes) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_ok_true() {
    let (router, _tx) = make_router(LoopStatus::default(), rib_with(&[]).await);
    let (status, body) = get(router, "/v1/health").await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "pfx-daemon");
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_reflects_loop_status_and_config_hash() {
    let (router, _tx) = make_router(status_after_two_cycles(), rib_with(&[]).await);
    let (status, body) = get(router, "/v1/status").await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["config_hash"], "abc123");
    assert_eq!(json["phase"], "sleeping");
    assert_eq!(json["cycles_completed"], 2);
    assert_eq!(json["known_prefixes"], 2);
    assert_eq!(json["source_connected"], true);
    assert!(json["last_query_error"].is_null());
    assert!(json.get("known").is_none(), "prefix list is served by /v1/known");
}

#[tokio::test]
async fn status_follows_watch_updates() {
    let (router, tx) = make_router(LoopStatus::default(), rib_with(&[]).await);
    tx.send_modify(|s| {
        s.phase = LoopPhase::Connecting;
        s.last_query_error = Some("store query error: boom".to_string());
    });

    let json = parse_json(get(router, "/v1/status").await.1);
    assert_eq!(json["phase"], "connecting");
    assert_eq!(json["last_query_error"], "store query error: boom");
}

// ---------------------------------------------------------------------------
// GET /v1/known
// ---------------------------------------------------------------------------

#[tokio::test]
async fn known_lists_sorted_prefixes() {
    let (router, _tx) = make_router(status_after_two_cycles(), rib_with(&[]).await);
    let (status, body) = get(router, "/v1/known").await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["cycle"], 2);
    assert_eq!(json["count"], 2);
    assert_eq!(json["prefixes"], serde_json::json!(["10.0.0.0/24", "192.0.2.1"]));
}

// ---------------------------------------------------------------------------
// GET /v1/rib
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rib_lists_installed_routes() {
    let rib = rib_with(&["10.0.0.0/24", "192.0.2.1"]).await;
    let (router, _tx) = make_router(status_after_two_cycles(), rib);
    let (status, body) = get(router, "/v1/rib").await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["count"], 2);
    let first = &json["routes"][0];
    assert_eq!(first["source"], "10.0.0.0/24");
    assert_eq!(first["nlri"]["rd"], "1:1");
    assert_eq!(first["nlri"]["len"], 24);
    assert_eq!(first["nlri"]["labels"], serde_json::json!([100]));
    assert_eq!(first["withdraw"], false);
}

// ---------------------------------------------------------------------------
// Unknown route
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_path_is_404() {
    let (router, _tx) = make_router(LoopStatus::default(), rib_with(&[]).await);
    let (status, _) = get(router, "/v1/run/start").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
