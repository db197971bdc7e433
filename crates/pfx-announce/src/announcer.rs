use std::net::Ipv4Addr;
use std::sync::Arc;

use pfx_config::RoutingConfig;
use pfx_reconcile::{Prefix, PrefixBatch};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::{EngineError, RoutingEngine};
use crate::route::{
    parse_prefix, LabeledVpnPrefix, MplsLabel, Origin, PathAttribute, Route, RouteBuildError,
    RouteDistinguisher, RouteTarget,
};

// ---------------------------------------------------------------------------
// Static routing metadata
// ---------------------------------------------------------------------------

/// Everything needed to turn a bare prefix into a route, parsed once at
/// startup from [`RoutingConfig`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RoutingMetadata {
    pub local_asn: u32,
    pub router_id: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub rd: RouteDistinguisher,
    pub route_target: RouteTarget,
    pub label: MplsLabel,
    pub default_prefix_len: u8,
}

impl TryFrom<&RoutingConfig> for RoutingMetadata {
    type Error = RouteBuildError;

    fn try_from(cfg: &RoutingConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            local_asn: cfg.local_asn,
            router_id: cfg.router_id,
            next_hop: cfg.effective_next_hop(),
            rd: cfg.route_distinguisher.parse()?,
            route_target: cfg.route_target.parse()?,
            label: MplsLabel::new(cfg.label)?,
            default_prefix_len: cfg.default_prefix_len,
        })
    }
}

impl RoutingMetadata {
    /// Attributes shared by every route in one event.
    fn common_attributes(&self) -> Vec<PathAttribute> {
        vec![
            PathAttribute::Origin { value: Origin::Igp },
            PathAttribute::AsPath {
                segments: Vec::new(),
            },
            PathAttribute::ExtendedCommunities {
                route_targets: vec![self.route_target],
            },
        ]
    }

    fn nlri_for(&self, prefix: &Prefix) -> Result<LabeledVpnPrefix, RouteBuildError> {
        let (addr, len) = parse_prefix(prefix.as_str(), self.default_prefix_len)?;
        Ok(LabeledVpnPrefix {
            rd: self.rd,
            prefix: addr,
            len,
            labels: vec![self.label],
        })
    }

    /// Build one route per prefix in `batch`. Unparseable prefixes come back
    /// separately; the rest keep batch order.
    pub fn build_routes(
        &self,
        batch: &PrefixBatch,
        withdraw: bool,
    ) -> (Vec<Route>, Vec<(Prefix, RouteBuildError)>) {
        let common = self.common_attributes();
        let mut routes = Vec::with_capacity(batch.len());
        let mut rejected = Vec::new();

        for prefix in batch.iter() {
            match self.nlri_for(prefix) {
                Ok(nlri) => {
                    let mut attributes = common.clone();
                    attributes.push(PathAttribute::MpReachNlri {
                        next_hop: self.next_hop,
                        nlri: vec![nlri.clone()],
                    });
                    routes.push(Route {
                        source: prefix.clone(),
                        nlri,
                        withdraw,
                        attributes,
                    });
                }
                Err(e) => rejected.push((prefix.clone(), e)),
            }
        }
        (routes, rejected)
    }
}

// ---------------------------------------------------------------------------
// Announcer
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    Announce,
    Withdraw,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Announce => "announce",
            BatchKind::Withdraw => "withdraw",
        }
    }
}

/// What happened to one batch. Never an error: failures are reported here
/// and in the log, and the caller carries on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchOutcome {
    pub kind: BatchKind,
    /// Routes handed to the engine.
    pub submitted: usize,
    /// Routes the engine reported as changed.
    pub applied: usize,
    /// Prefixes that could not be turned into routes.
    pub rejected: Vec<Prefix>,
    pub engine_error: Option<EngineError>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.engine_error.is_none() && self.rejected.is_empty()
    }
}

/// Turns prefix batches into announce / withdraw calls on a [`RoutingEngine`].
pub struct RouteAnnouncer<E: RoutingEngine + ?Sized> {
    engine: Arc<E>,
    meta: RoutingMetadata,
}

impl<E: RoutingEngine + ?Sized> RouteAnnouncer<E> {
    pub fn new(engine: Arc<E>, meta: RoutingMetadata) -> Self {
        Self { engine, meta }
    }

    pub fn metadata(&self) -> &RoutingMetadata {
        &self.meta
    }

    pub async fn announce(&self, batch: &PrefixBatch) -> BatchOutcome {
        self.submit(batch, BatchKind::Announce).await
    }

    pub async fn withdraw(&self, batch: &PrefixBatch) -> BatchOutcome {
        self.submit(batch, BatchKind::Withdraw).await
    }

    async fn submit(&self, batch: &PrefixBatch, kind: BatchKind) -> BatchOutcome {
        let op = kind.as_str();
        let (routes, bad) = self.meta.build_routes(batch, kind == BatchKind::Withdraw);

        for (prefix, err) in &bad {
            warn!(op, %prefix, error = %err, "prefix left out of batch");
        }

        let mut outcome = BatchOutcome {
            kind,
            submitted: routes.len(),
            applied: 0,
            rejected: bad.into_iter().map(|(p, _)| p).collect(),
            engine_error: None,
        };

        if routes.is_empty() {
            debug!(op, "no routable prefixes in batch, engine call skipped");
            return outcome;
        }

        for r in &routes {
            debug!(op, route = %r.nlri, "route queued");
        }

        let res = match kind {
            BatchKind::Announce => self.engine.add_path(routes).await,
            BatchKind::Withdraw => self.engine.delete_path(routes).await,
        };
        match res {
            Ok(applied) => {
                outcome.applied = applied;
                info!(op, submitted = outcome.submitted, applied, "batch submitted");
            }
            Err(e) => {
                warn!(op, submitted = outcome.submitted, error = %e, "routing engine call failed");
                outcome.engine_error = Some(e);
            }
        }
        outcome
    }
}
