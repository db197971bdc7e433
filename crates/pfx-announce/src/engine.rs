//! The routing engine seam.
//!
//! Anything that can hold a BGP RIB and speak to one neighbor implements
//! [`RoutingEngine`]: the in-process `pfx_rib_local::LocalRib` used by
//! the daemon today, or an adapter around an external speaker.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use async_trait::async_trait;
use pfx_config::RoutingConfig;
use serde::Serialize;

use crate::route::Route;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Parameters for [`RoutingEngine::start`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GlobalConfig {
    pub local_asn: u32,
    pub router_id: Ipv4Addr,
    /// `None` = do not listen for inbound sessions.
    pub listen_port: Option<u16>,
}

impl From<&RoutingConfig> for GlobalConfig {
    fn from(cfg: &RoutingConfig) -> Self {
        Self {
            local_asn: cfg.local_asn,
            router_id: cfg.router_id,
            listen_port: cfg.listen_port,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum AfiSafi {
    #[serde(rename = "ipv4-unicast")]
    Ipv4Unicast,
    #[serde(rename = "l3vpn-ipv4-unicast")]
    L3VpnIpv4Unicast,
}

impl FromStr for AfiSafi {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ipv4-unicast" => Ok(AfiSafi::Ipv4Unicast),
            "l3vpn-ipv4-unicast" => Ok(AfiSafi::L3VpnIpv4Unicast),
            other => Err(EngineError::Rejected(format!(
                "unsupported address family '{other}'"
            ))),
        }
    }
}

/// Parameters for [`RoutingEngine::add_neighbor`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NeighborConfig {
    pub address: Ipv4Addr,
    pub peer_asn: u32,
    pub afi_safis: Vec<AfiSafi>,
}

impl TryFrom<&RoutingConfig> for NeighborConfig {
    type Error = EngineError;

    fn try_from(cfg: &RoutingConfig) -> Result<Self, Self::Error> {
        let afi_safis = cfg
            .afi_safis
            .iter()
            .map(|s| s.parse::<AfiSafi>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            address: cfg.neighbor_address,
            peer_asn: cfg.peer_asn,
            afi_safis,
        })
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineError {
    /// `start` failed or was called twice.
    Startup(String),
    /// The engine refused a request (bad neighbor, bad route).
    Rejected(String),
    /// The engine is not started or has been shut down.
    NotRunning,
    Internal(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Startup(msg) => write!(f, "routing engine startup failed: {msg}"),
            EngineError::Rejected(msg) => write!(f, "routing engine rejected request: {msg}"),
            EngineError::NotRunning => write!(f, "routing engine is not running"),
            EngineError::Internal(msg) => write!(f, "routing engine internal error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RoutingEngine: Send + Sync {
    /// Configure the global BGP instance. Called once.
    async fn start(&self, global: GlobalConfig) -> Result<(), EngineError>;

    /// Register a neighbor. Requires a started engine.
    async fn add_neighbor(&self, neighbor: NeighborConfig) -> Result<(), EngineError>;

    /// Run the engine's main loop. Returns after [`RoutingEngine::shutdown`].
    async fn serve(&self) -> Result<(), EngineError>;

    /// Install routes in the RIB. Returns how many were new.
    async fn add_path(&self, routes: Vec<Route>) -> Result<usize, EngineError>;

    /// Remove routes from the RIB. Returns how many were present.
    async fn delete_path(&self, routes: Vec<Route>) -> Result<usize, EngineError>;

    /// Snapshot of installed routes, ordered by RIB key.
    async fn list_paths(&self) -> Result<Vec<Route>, EngineError>;

    /// Stop serving. Idempotent.
    async fn shutdown(&self);
}
