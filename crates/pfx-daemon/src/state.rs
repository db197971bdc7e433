//! Shared runtime state for pfx-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. Loop status is read
//! from the reconciliation loop's watch channel; nothing here writes it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pfx_announce::{BatchOutcome, RoutingEngine};
use pfx_runtime::{wait_for_stop, LoopStatus};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Cycle(CycleEvent),
    LogLine { level: String, msg: String },
}

/// Summary of one completed reconcile cycle.
#[derive(Clone, Debug, Serialize)]
pub struct CycleEvent {
    pub cycle: u64,
    pub known_prefixes: usize,
    pub added: usize,
    pub removed: usize,
    pub query_error: Option<String>,
    pub at: Option<DateTime<Utc>>,
}

impl From<&LoopStatus> for CycleEvent {
    fn from(s: &LoopStatus) -> Self {
        Self {
            cycle: s.cycles_completed,
            known_prefixes: s.known_prefixes,
            added: s.last_added,
            removed: s.last_removed,
            query_error: s.last_query_error.clone(),
            at: s.last_cycle_at,
        }
    }
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    /// Latest reconciliation loop status.
    pub loop_status: watch::Receiver<LoopStatus>,
    /// Routing engine, read-only use (`list_paths`).
    pub engine: Arc<dyn RoutingEngine>,
    pub config_hash: String,
}

impl AppState {
    pub fn new(
        loop_status: watch::Receiver<LoopStatus>,
        engine: Arc<dyn RoutingEngine>,
        config_hash: impl Into<String>,
    ) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self {
            bus,
            build: BuildInfo {
                service: "pfx-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            loop_status,
            engine,
            config_hash: config_hash.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Emit a heartbeat SSE every `interval` until `stop` flips.
pub fn spawn_heartbeat(
    bus: broadcast::Sender<BusMsg>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let ts = Utc::now().timestamp_millis();
                    let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
                }
                _ = wait_for_stop(&mut stop) => break,
            }
        }
    })
}

/// Publish a `cycle` event each time the loop completes a cycle, and a
/// warning log line when that cycle hit a query error.
pub fn spawn_cycle_events(
    bus: broadcast::Sender<BusMsg>,
    mut status: watch::Receiver<LoopStatus>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_cycle = status.borrow_and_update().cycles_completed;
        loop {
            tokio::select! {
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let event = {
                        let s = status.borrow_and_update();
                        if s.cycles_completed == last_cycle {
                            continue;
                        }
                        last_cycle = s.cycles_completed;
                        CycleEvent::from(&*s)
                    };
                    if let Some(err) = &event.query_error {
                        let _ = bus.send(BusMsg::LogLine {
                            level: "WARN".to_string(),
                            msg: format!("prefix query failed: {err}"),
                        });
                    }
                    let _ = bus.send(BusMsg::Cycle(event));
                }
                _ = wait_for_stop(&mut stop) => break,
            }
        }
    })
}

/// Turn failed announce / withdraw batches into `log` events.
pub fn spawn_outcome_log(
    bus: broadcast::Sender<BusMsg>,
    mut outcomes: mpsc::UnboundedReceiver<BatchOutcome>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(o) = outcomes.recv().await {
            if let Some(err) = &o.engine_error {
                let _ = bus.send(BusMsg::LogLine {
                    level: "WARN".to_string(),
                    msg: format!("{} of {} route(s) failed: {err}", o.kind.as_str(), o.submitted),
                });
            }
            if !o.rejected.is_empty() {
                let _ = bus.send(BusMsg::LogLine {
                    level: "WARN".to_string(),
                    msg: format!(
                        "{} prefix(es) could not be turned into routes",
                        o.rejected.len()
                    ),
                });
            }
        }
    })
}
