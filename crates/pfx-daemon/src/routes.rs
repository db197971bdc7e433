//! Axum router and HTTP handlers for pfx-daemon.
//!
//! `build_router` is the single entry point. Middleware layers are attached
//! by the supervisor so tests can use the bare router. Every endpoint is
//! read-only.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use crate::{
    api_types::{ErrorResponse, HealthResponse, KnownResponse, RibResponse, StatusResponse},
    state::{uptime_secs, AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/known", get(known))
        .route("/v1/rib", get(rib))
        .route("/v1/stream", get(stream))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let reconcile = st.loop_status.borrow().clone();
    (
        StatusCode::OK,
        Json(StatusResponse {
            daemon_uptime_secs: uptime_secs(),
            config_hash: st.config_hash.clone(),
            reconcile,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/known
// ---------------------------------------------------------------------------

pub(crate) async fn known(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let (cycle, prefixes) = {
        let s = st.loop_status.borrow();
        (s.cycles_completed, s.known.clone())
    };
    (
        StatusCode::OK,
        Json(KnownResponse {
            cycle,
            count: prefixes.len(),
            prefixes,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/rib
// ---------------------------------------------------------------------------

pub(crate) async fn rib(State(st): State<Arc<AppState>>) -> Response {
    match st.engine.list_paths().await {
        Ok(routes) => (
            StatusCode::OK,
            Json(RibResponse {
                count: routes.len(),
                routes,
            }),
        )
            .into_response(),
        Err(e) => {
            warn!(op = "api", error = %e, "list_paths failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Cycle(_) => "cycle",
                    BusMsg::LogLine { .. } => "log",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
