//! Route announcer: prefix batches in, routing engine calls out.
//!
//! Architectural decisions:
//! - The core depends on the routing engine only through [`RoutingEngine`].
//!   The announcer itself uses just `add_path` / `delete_path`; the lifecycle
//!   methods are there for the supervisor.
//! - Routing metadata (ASN, router id, RD, route target, label, next hop) is
//!   parsed once into [`RoutingMetadata`]; bad values fail startup, not a
//!   cycle.
//! - Announce / withdraw never return errors. A failed batch is logged and
//!   reported in [`BatchOutcome`]; nothing is retried.

mod announcer;
mod engine;
mod route;

pub use announcer::{BatchKind, BatchOutcome, RouteAnnouncer, RoutingMetadata};
pub use engine::{AfiSafi, EngineError, GlobalConfig, NeighborConfig, RoutingEngine};
pub use route::{
    parse_prefix, LabeledVpnPrefix, MplsLabel, Origin, PathAttribute, Route, RouteBuildError,
    RouteDistinguisher, RouteTarget,
};
