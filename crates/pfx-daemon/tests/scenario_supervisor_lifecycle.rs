//! Scenario: supervisor startup, steady state and shutdown.
//!
//! # Invariants under test
//!
//! 1. Rows present in the store reach the routing engine while running.
//! 2. A stop signal ends the run with `ExitReason::Signal` (exit code 1),
//!    shuts the engine down and closes the store connection.
//! 3. An engine that stops serving on its own ends the run with exit code 2.
//! 4. An engine start failure is a startup error; store and engine are
//!    still released.
//! 5. A neighbor the engine rejects is a startup error as well.
//! 6. Enabling the admin API on an ephemeral port does not change the
//!    lifecycle.

use std::sync::Arc;
use std::time::Duration;

use pfx_announce::RoutingEngine;
use pfx_config::SyncConfig;
use pfx_daemon::supervisor::{ExitReason, Supervisor};
use pfx_rib_local::LocalRib;
use pfx_source::MemorySource;
use tokio::sync::oneshot;

const WAIT: Duration = Duration::from_secs(5);

fn config(api: bool) -> SyncConfig {
    let mut cfg = SyncConfig::default();
    cfg.source.scan_interval_secs = 1;
    cfg.source.retry_interval_secs = 1;
    cfg.api.enabled = api;
    cfg.api.listen = "127.0.0.1:0".to_string();
    cfg
}

fn stop_on(rx: oneshot::Receiver<()>) -> impl std::future::Future<Output = &'static str> + Send {
    async move {
        let _ = rx.await;
        "SIGTERM"
    }
}

async fn wait_for_rib(rib: &LocalRib, len: usize) {
    tokio::time::timeout(WAIT, async {
        while rib.len() != len {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("rib never reached expected size");
}

// ---------------------------------------------------------------------------
// 1 + 2
// ---------------------------------------------------------------------------

#[tokio::test]
async fn signal_stops_pipeline_and_releases_resources() {
    let source = Arc::new(MemorySource::new(["10.0.0.0/24", "192.0.2.1"]));
    let rib = Arc::new(LocalRib::new());
    let (stop_tx, stop_rx) = oneshot::channel();

    let sup = Supervisor::new(config(false), "hash", source.clone(), rib.clone());
    let run = tokio::spawn(sup.run(stop_on(stop_rx)));

    wait_for_rib(&rib, 2).await;
    assert!(rib.contains_key("1:1:10.0.0.0/24"));
    assert!(rib.contains_key("1:1:192.0.2.1/32"));
    assert_eq!(rib.neighbors().len(), 1);

    stop_tx.send(()).unwrap();
    let reason = tokio::time::timeout(WAIT, run)
        .await
        .expect("supervisor did not stop")
        .unwrap()
        .unwrap();

    assert_eq!(reason, ExitReason::Signal("SIGTERM"));
    assert_eq!(reason.exit_code(), 1);
    assert!(rib.is_shut_down());
    assert!(source.is_closed());
}

// ---------------------------------------------------------------------------
// 3
// ---------------------------------------------------------------------------

#[tokio::test]
async fn engine_stopping_on_its_own_exits_with_code_2() {
    let source = Arc::new(MemorySource::new(["10.0.0.0/24"]));
    let rib = Arc::new(LocalRib::new());
    let (_stop_tx, stop_rx) = oneshot::channel();

    let sup = Supervisor::new(config(false), "hash", source.clone(), rib.clone());
    let run = tokio::spawn(sup.run(stop_on(stop_rx)));

    wait_for_rib(&rib, 1).await;
    rib.shutdown().await;

    let reason = tokio::time::timeout(WAIT, run)
        .await
        .expect("supervisor did not notice engine stop")
        .unwrap()
        .unwrap();

    assert!(matches!(reason, ExitReason::EngineStopped(_)));
    assert_eq!(reason.exit_code(), 2);
    assert!(source.is_closed());
}

// ---------------------------------------------------------------------------
// 4 + 5
// ---------------------------------------------------------------------------

#[tokio::test]
async fn engine_start_failure_is_fatal_and_releases_resources() {
    let source = Arc::new(MemorySource::new(["10.0.0.0/24"]));
    let rib = Arc::new(LocalRib::new());
    rib.fail_start("port in use");
    let (_stop_tx, stop_rx) = oneshot::channel();

    let err = Supervisor::new(config(false), "hash", source.clone(), rib.clone())
        .run(stop_on(stop_rx))
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("port in use"), "got: {err:#}");
    assert!(rib.is_shut_down());
    assert!(source.is_closed());
    assert_eq!(source.fetch_calls(), 0, "no cycle may run before startup completes");
}

#[tokio::test]
async fn rejected_neighbor_is_fatal() {
    let mut cfg = config(false);
    cfg.routing.neighbor_address = cfg.routing.router_id;

    let source = Arc::new(MemorySource::new(["10.0.0.0/24"]));
    let rib = Arc::new(LocalRib::new());
    let (_stop_tx, stop_rx) = oneshot::channel();

    let err = Supervisor::new(cfg, "hash", source.clone(), rib.clone())
        .run(stop_on(stop_rx))
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("rejected neighbor"), "got: {err:#}");
    assert!(rib.is_shut_down());
    assert!(rib.is_empty());
    assert!(source.is_closed());
}

// ---------------------------------------------------------------------------
// 6
// ---------------------------------------------------------------------------

#[tokio::test]
async fn admin_api_on_ephemeral_port_shuts_down_cleanly() {
    let source = Arc::new(MemorySource::new(["198.51.100.0/24"]));
    let rib = Arc::new(LocalRib::new());
    let (stop_tx, stop_rx) = oneshot::channel();

    let sup = Supervisor::new(config(true), "hash", source.clone(), rib.clone());
    let run = tokio::spawn(sup.run(stop_on(stop_rx)));

    wait_for_rib(&rib, 1).await;
    stop_tx.send(()).unwrap();

    let reason = tokio::time::timeout(WAIT, run)
        .await
        .expect("supervisor did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(reason, ExitReason::Signal("SIGTERM"));
    assert!(rib.is_shut_down());
}
