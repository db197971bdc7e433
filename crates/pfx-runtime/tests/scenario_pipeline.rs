//! # Invariants under test
//!
//! 1. End to end: rows in the store become routes in the engine, and rows
//!    deleted from the store are withdrawn from the engine.
//! 2. A failed announce is not retried and does not stop the announcer; the
//!    next batch is still delivered.
//! 3. Shutdown stops both loops, including a loop blocked on reconnect.

use std::sync::Arc;
use std::time::Duration;

use pfx_announce::{GlobalConfig, RouteAnnouncer, RoutingEngine, RoutingMetadata};
use pfx_config::{QueryErrorPolicy, RoutingConfig};
use pfx_rib_local::LocalRib;
use pfx_runtime::{wire, AnnouncerStats, LoopSettings};
use pfx_source::memory::MemorySource;
use pfx_source::RetryPolicy;
use tokio::sync::watch;
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Running {
    source: Arc<MemorySource>,
    rib: Arc<LocalRib>,
    stop: watch::Sender<bool>,
    reconcile: JoinHandle<Result<(), pfx_runtime::Closed>>,
    announcer: JoinHandle<AnnouncerStats>,
}

async fn start(rows: &[&str], retry: RetryPolicy) -> Running {
    let source = Arc::new(MemorySource::new(rows.iter().copied()));
    let rib = Arc::new(LocalRib::new());
    rib.start(GlobalConfig::from(&RoutingConfig::default()))
        .await
        .unwrap();

    let meta = RoutingMetadata::try_from(&RoutingConfig::default()).unwrap();
    let settings = LoopSettings {
        select_statement: "SELECT prefix FROM blackholeprefixes".to_string(),
        scan_interval: Duration::from_millis(5),
        retry,
        on_query_error: QueryErrorPolicy::WithdrawAll,
    };
    let (lp, al) = wire(
        Arc::clone(&source),
        settings,
        RouteAnnouncer::new(Arc::clone(&rib), meta),
    );

    let (stop, stop_rx) = watch::channel(false);
    let reconcile = tokio::spawn(lp.run(stop_rx.clone()));
    let announcer = tokio::spawn(al.run(stop_rx));

    Running {
        source,
        rib,
        stop,
        reconcile,
        announcer,
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn stop(r: Running) -> AnnouncerStats {
    r.stop.send_replace(true);
    let res = tokio::time::timeout(Duration::from_secs(2), r.reconcile)
        .await
        .expect("reconcile loop did not stop")
        .unwrap();
    assert!(res.is_ok());
    tokio::time::timeout(Duration::from_secs(2), r.announcer)
        .await
        .expect("announcer did not stop")
        .unwrap()
}

// ---------------------------------------------------------------------------
// 1. End to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn store_rows_drive_the_rib() {
    let r = start(&["10.0.0.0/24", "192.0.2.1"], RetryPolicy::forever(Duration::ZERO)).await;

    let rib = Arc::clone(&r.rib);
    eventually(|| rib.len() == 2).await;
    assert!(rib.contains_key("1:1:192.0.2.1/32"));

    r.source.set_rows(["192.0.2.1"]);
    eventually(|| rib.len() == 1).await;
    assert!(!rib.contains_key("1:1:10.0.0.0/24"));

    let stats = stop(r).await;
    assert_eq!(stats.announce_batches, 1);
    assert_eq!(stats.withdraw_batches, 1);
    assert_eq!(stats.failed_batches, 0);
}

// ---------------------------------------------------------------------------
// 2. Fire and continue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_announce_is_not_retried() {
    let r = start(&[], RetryPolicy::forever(Duration::ZERO)).await;
    r.rib.fail_next_adds(1);

    r.source.set_rows(["10.0.0.0/24"]);
    let rib = Arc::clone(&r.rib);
    eventually(|| rib.add_calls() == 1).await;
    assert!(rib.is_empty());

    // Known state was not rolled back: only the new prefix is announced.
    r.source.set_rows(["10.0.0.0/24", "10.0.1.0/24"]);
    eventually(|| rib.len() == 1).await;
    assert_eq!(rib.keys(), vec!["1:1:10.0.1.0/24"]);

    let stats = stop(r).await;
    assert_eq!(stats.failed_batches, 1);
    assert_eq!(stats.announce_batches, 2);
}

// ---------------------------------------------------------------------------
// 3. Shutdown while reconnecting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_interrupts_reconnect() {
    let r = start(&["10.0.0.0/24"], RetryPolicy::forever(Duration::from_millis(5))).await;
    r.source.fail_next_pings(u32::MAX);

    let src = Arc::clone(&r.source);
    eventually(|| src.ping_calls() >= 3).await;

    let stats = stop(r).await;
    assert_eq!(stats.failed_batches, 0);
}
