//! Task wiring between the prefix store and the routing engine.
//!
//! Architectural decisions:
//! - Two tasks: the reconciliation loop (sole producer) and the announcer
//!   loop (sole consumer). They share nothing but two single-slot
//!   rendezvous hand-offs, one for additions and one for removals.
//! - Known state lives inside the reconciliation loop's diff engine and is
//!   never locked. Observers read [`LoopStatus`] from a watch channel.
//! - Only non-empty batches are published. A publish blocks until the
//!   announcer has taken the batch.
//! - Both loops stop on a shared `watch<bool>` shutdown flag.

use std::sync::Arc;

use pfx_announce::{RouteAnnouncer, RoutingEngine};
use pfx_source::PrefixSource;
use tokio::sync::watch;

mod announcer_loop;
pub mod handoff;
mod reconcile_loop;

pub use announcer_loop::{AnnouncerLoop, AnnouncerStats};
pub use handoff::{rendezvous, Closed, Publisher, Subscriber};
pub use reconcile_loop::{
    CycleOutcome, CycleReport, LoopPhase, LoopSettings, LoopStatus, ReconcileLoop,
};

/// Connect a reconciliation loop and an announcer loop through a fresh pair
/// of hand-offs.
pub fn wire<S, E>(
    source: Arc<S>,
    settings: LoopSettings,
    announcer: RouteAnnouncer<E>,
) -> (ReconcileLoop<S>, AnnouncerLoop<E>)
where
    S: PrefixSource + ?Sized,
    E: RoutingEngine + ?Sized,
{
    let (add_tx, add_rx) = rendezvous();
    let (rem_tx, rem_rx) = rendezvous();
    (
        ReconcileLoop::new(source, settings, add_tx, rem_tx),
        AnnouncerLoop::new(announcer, add_rx, rem_rx),
    )
}

/// Resolves once the shutdown flag is true, or its sender is gone.
pub async fn wait_for_stop(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
