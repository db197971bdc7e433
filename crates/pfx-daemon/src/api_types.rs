//! Response types for the pfx-daemon HTTP endpoints.
//!
//! No business logic lives here.

use pfx_announce::Route;
use pfx_reconcile::Prefix;
use pfx_runtime::LoopStatus;
use serde::Serialize;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// /v1/status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub daemon_uptime_secs: u64,
    pub config_hash: String,
    #[serde(flatten)]
    pub reconcile: LoopStatus,
}

// ---------------------------------------------------------------------------
// /v1/known
// ---------------------------------------------------------------------------

/// Known prefixes as of the last completed cycle, sorted.
#[derive(Debug, Clone, Serialize)]
pub struct KnownResponse {
    pub cycle: u64,
    pub count: usize,
    pub prefixes: Vec<Prefix>,
}

// ---------------------------------------------------------------------------
// /v1/rib
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RibResponse {
    pub count: usize,
    pub routes: Vec<Route>,
}

/// Body for any non-2xx response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
