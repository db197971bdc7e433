use pfx_announce::{BatchOutcome, RouteAnnouncer, RoutingEngine};
use pfx_reconcile::PrefixBatch;
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::handoff::Subscriber;
use crate::wait_for_stop;

/// Running totals kept by the announcer task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnnouncerStats {
    pub announce_batches: u64,
    pub withdraw_batches: u64,
    pub failed_batches: u64,
}

/// Consumes the addition and removal hand-offs and drives the announcer.
///
/// Both subscribers are polled together with no priority. The loop ends when
/// both publishers are gone or `shutdown` flips to true; dropping the
/// subscribers then releases a publisher blocked mid hand-off.
pub struct AnnouncerLoop<E: RoutingEngine + ?Sized> {
    announcer: RouteAnnouncer<E>,
    additions: Subscriber<PrefixBatch>,
    removals: Subscriber<PrefixBatch>,
    outcomes: Option<mpsc::UnboundedSender<BatchOutcome>>,
}

impl<E: RoutingEngine + ?Sized> AnnouncerLoop<E> {
    pub fn new(
        announcer: RouteAnnouncer<E>,
        additions: Subscriber<PrefixBatch>,
        removals: Subscriber<PrefixBatch>,
    ) -> Self {
        Self {
            announcer,
            additions,
            removals,
            outcomes: None,
        }
    }

    /// Copy every batch outcome to `tx`.
    pub fn with_outcome_sink(mut self, tx: mpsc::UnboundedSender<BatchOutcome>) -> Self {
        self.outcomes = Some(tx);
        self
    }

    fn record(&self, stats: &mut AnnouncerStats, outcome: BatchOutcome) {
        if outcome.engine_error.is_some() {
            stats.failed_batches += 1;
        }
        if let Some(tx) = &self.outcomes {
            let _ = tx.send(outcome);
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> AnnouncerStats {
        let mut stats = AnnouncerStats::default();
        let mut additions_done = false;
        let mut removals_done = false;

        while !(additions_done && removals_done) {
            tokio::select! {
                next = self.additions.recv(), if !additions_done => match next {
                    Some(batch) => {
                        stats.announce_batches += 1;
                        let outcome = self.announcer.announce(&batch).await;
                        self.record(&mut stats, outcome);
                    }
                    None => additions_done = true,
                },
                next = self.removals.recv(), if !removals_done => match next {
                    Some(batch) => {
                        stats.withdraw_batches += 1;
                        let outcome = self.announcer.withdraw(&batch).await;
                        self.record(&mut stats, outcome);
                    }
                    None => removals_done = true,
                },
                _ = wait_for_stop(&mut shutdown) => break,
            }
        }
        self.additions.close();
        self.removals.close();
        info!(
            op = "announcer",
            announced = stats.announce_batches,
            withdrawn = stats.withdraw_batches,
            failed = stats.failed_batches,
            "announcer stopped"
        );
        stats
    }
}
