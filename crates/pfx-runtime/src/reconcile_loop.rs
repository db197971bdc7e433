//! The reconciliation loop: connect, fetch, diff, publish, sleep, repeat.
//!
//! The loop task is the only owner of the diff engine and therefore of the
//! known state. Everything else sees it through the [`LoopStatus`] watch
//! channel, which is a copy taken at the end of each phase.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pfx_config::{QueryErrorPolicy, SourceConfig};
use pfx_reconcile::{DesiredSet, DiffEngine, Prefix, PrefixBatch};
use pfx_source::{wait_until_live, PrefixSource, RetryExhausted, RetryPolicy, SourceError};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::handoff::{Closed, Publisher};
use crate::wait_for_stop;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopSettings {
    pub select_statement: String,
    pub scan_interval: Duration,
    pub retry: RetryPolicy,
    pub on_query_error: QueryErrorPolicy,
}

impl LoopSettings {
    pub fn from_source_config(cfg: &SourceConfig) -> Self {
        Self {
            select_statement: cfg.select_statement.clone(),
            scan_interval: Duration::from_secs(cfg.scan_interval_secs),
            retry: RetryPolicy::forever(Duration::from_secs(cfg.retry_interval_secs)),
            on_query_error: cfg.on_query_error,
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    #[default]
    Idle,
    Connecting,
    Fetching,
    Diffing,
    Publishing,
    Sleeping,
}

/// Observable loop state. Written only by the loop task.
#[derive(Clone, Debug, Default, Serialize)]
pub struct LoopStatus {
    pub phase: LoopPhase,
    pub cycles_completed: u64,
    pub source_connected: bool,
    pub known_prefixes: usize,
    pub last_added: usize,
    pub last_removed: usize,
    pub last_skipped_rows: usize,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_query_error: Option<String>,
    /// Known prefixes, sorted, as of the last completed cycle.
    #[serde(skip)]
    pub known: Vec<Prefix>,
}

// ---------------------------------------------------------------------------
// Cycle results
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Liveness checks made before the fetch, including the successful one.
    pub connect_attempts: u32,
    pub desired: usize,
    pub added: usize,
    pub removed: usize,
    pub skipped_rows: usize,
    pub truncated: bool,
    /// Set when the query failed or the result was truncated.
    pub query_error: Option<String>,
    /// `KeepKnown` skipped the diff.
    pub diff_skipped: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// The connection dropped during the fetch. Known state is untouched and
    /// the next cycle starts by reconnecting.
    ConnectionLost(SourceError),
    /// A capped retry policy gave up.
    SourceUnavailable(RetryExhausted),
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

pub struct ReconcileLoop<S: PrefixSource + ?Sized> {
    source: Arc<S>,
    settings: LoopSettings,
    engine: DiffEngine,
    additions: Publisher<PrefixBatch>,
    removals: Publisher<PrefixBatch>,
    status: watch::Sender<LoopStatus>,
}

impl<S: PrefixSource + ?Sized> ReconcileLoop<S> {
    pub fn new(
        source: Arc<S>,
        settings: LoopSettings,
        additions: Publisher<PrefixBatch>,
        removals: Publisher<PrefixBatch>,
    ) -> Self {
        let (status, _) = watch::channel(LoopStatus::default());
        Self {
            source,
            settings,
            engine: DiffEngine::new(),
            additions,
            removals,
            status,
        }
    }

    pub fn subscribe_status(&self) -> watch::Receiver<LoopStatus> {
        self.status.subscribe()
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    pub fn known_len(&self) -> usize {
        self.engine.known().len()
    }

    fn set_phase(&self, phase: LoopPhase) {
        self.status.send_modify(|s| s.phase = phase);
    }

    /// One full cycle, without the trailing sleep.
    ///
    /// Fails only when a hand-off consumer is gone.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, Closed> {
        // Connecting
        self.set_phase(LoopPhase::Connecting);
        let connect_attempts = match wait_until_live(&*self.source, &self.settings.retry).await {
            Ok(n) => n,
            Err(exhausted) => {
                warn!(op = "connect", error = %exhausted, "giving up on store for this cycle");
                self.status.send_modify(|s| {
                    s.phase = LoopPhase::Idle;
                    s.source_connected = false;
                });
                return Ok(CycleOutcome::SourceUnavailable(exhausted));
            }
        };
        self.status.send_modify(|s| s.source_connected = true);

        // Fetching
        self.set_phase(LoopPhase::Fetching);
        let mut report = CycleReport {
            connect_attempts,
            ..CycleReport::default()
        };
        let desired = match self
            .source
            .fetch_prefixes(&self.settings.select_statement)
            .await
        {
            Ok(rows) if rows.truncated => {
                report.skipped_rows = rows.skipped_rows;
                report.truncated = true;
                report.query_error = Some(format!(
                    "row stream ended early after {} prefix(es)",
                    rows.prefixes.len()
                ));
                match self.settings.on_query_error {
                    QueryErrorPolicy::WithdrawAll => {
                        warn!(op = "fetch", read = rows.prefixes.len(), "result truncated, using rows read");
                        Some(rows.into_desired_set())
                    }
                    QueryErrorPolicy::KeepKnown => {
                        warn!(op = "fetch", read = rows.prefixes.len(), "result truncated, keeping known prefixes");
                        None
                    }
                }
            }
            Ok(rows) => {
                report.skipped_rows = rows.skipped_rows;
                Some(rows.into_desired_set())
            }
            Err(e) if e.is_connectivity() => {
                warn!(op = "fetch", error = %e, "store connection lost, reconnecting");
                self.status.send_modify(|s| {
                    s.phase = LoopPhase::Idle;
                    s.source_connected = false;
                });
                return Ok(CycleOutcome::ConnectionLost(e));
            }
            Err(e) => {
                report.query_error = Some(e.to_string());
                match self.settings.on_query_error {
                    QueryErrorPolicy::WithdrawAll => {
                        warn!(op = "fetch", error = %e, "query failed, treating as no rows");
                        Some(DesiredSet::empty())
                    }
                    QueryErrorPolicy::KeepKnown => {
                        warn!(op = "fetch", error = %e, "query failed, keeping known prefixes");
                        None
                    }
                }
            }
        };

        let Some(desired) = desired else {
            report.diff_skipped = true;
            self.finish_cycle(&report);
            return Ok(CycleOutcome::Completed(report));
        };
        report.desired = desired.len();

        // Diffing
        self.set_phase(LoopPhase::Diffing);
        let diff = self.engine.apply(&desired);
        report.added = diff.added.len();
        report.removed = diff.removed.len();
        debug!(
            op = "diff",
            desired = report.desired,
            added = report.added,
            removed = report.removed,
            "diff computed"
        );

        // Publishing
        let (added, removed) = diff.into_batches();
        if added.is_some() || removed.is_some() {
            self.set_phase(LoopPhase::Publishing);
        }
        if let Some(batch) = added {
            for p in batch.iter() {
                info!(op = "publish", prefix = %p, "new prefix");
            }
            self.additions.publish(batch).await?;
        }
        if let Some(batch) = removed {
            for p in batch.iter() {
                info!(op = "publish", prefix = %p, "removed prefix");
            }
            self.removals.publish(batch).await?;
        }

        self.finish_cycle(&report);
        Ok(CycleOutcome::Completed(report))
    }

    fn finish_cycle(&self, report: &CycleReport) {
        let known = self.engine.known();
        self.status.send_modify(|s| {
            s.phase = LoopPhase::Idle;
            s.cycles_completed += 1;
            s.known_prefixes = known.len();
            s.known = known.prefixes().cloned().collect();
            s.last_added = report.added;
            s.last_removed = report.removed;
            s.last_skipped_rows = report.skipped_rows;
            s.last_query_error = report.query_error.clone();
            s.last_cycle_at = Some(Utc::now());
        });
    }

    /// Cycle until `shutdown` flips to true or a consumer goes away.
    ///
    /// Shutdown is observed at every await point, including a blocked
    /// reconnect or publish.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), Closed> {
        info!(
            op = "loop",
            scan_interval_secs = self.settings.scan_interval.as_secs(),
            "reconciliation loop started"
        );
        loop {
            let outcome = tokio::select! {
                res = self.run_cycle() => res?,
                _ = wait_for_stop(&mut shutdown) => break,
            };

            // A lost connection goes back to Connecting after one retry
            // delay instead of a full scan interval.
            if matches!(outcome, CycleOutcome::ConnectionLost(_)) {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.retry.delay_after(1)) => continue,
                    _ = wait_for_stop(&mut shutdown) => break,
                }
            }

            self.set_phase(LoopPhase::Sleeping);
            tokio::select! {
                _ = tokio::time::sleep(self.settings.scan_interval) => {}
                _ = wait_for_stop(&mut shutdown) => break,
            }
        }
        info!(op = "loop", "reconciliation loop stopped");
        Ok(())
    }
}
