//! In-process routing engine.
//!
//! `LocalRib` holds the routes the announcer installs and answers the same
//! lifecycle calls an external BGP speaker would. It does not open sessions
//! or put anything on the wire.
//!
//! Behaviour:
//! - `start` succeeds once; a second call is a `Startup` error.
//! - `add_neighbor` needs a started engine, a non-zero peer ASN and an
//!   address different from the router id. Re-adding an address replaces it.
//! - The RIB is keyed by `rd:prefix/len`. `add_path` of an existing key
//!   replaces the route and does not count as new.
//! - `serve` parks until `shutdown`. `shutdown` is idempotent; afterwards
//!   every mutating call fails with `NotRunning`.
//! - Iteration order is the key order (BTreeMap), so snapshots are stable.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use pfx_announce::{EngineError, GlobalConfig, NeighborConfig, Route, RoutingEngine};
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct State {
    global: Option<GlobalConfig>,
    neighbors: BTreeMap<Ipv4Addr, NeighborConfig>,
    rib: BTreeMap<String, Route>,
    shut_down: bool,
    add_calls: u32,
    delete_calls: u32,

    // failure injection
    start_failure: Option<String>,
    add_failures_left: u32,
    delete_failures_left: u32,
}

#[derive(Debug)]
pub struct LocalRib {
    state: Mutex<State>,
    stop_tx: watch::Sender<bool>,
}

impl Default for LocalRib {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRib {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            state: Mutex::new(State::default()),
            stop_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_running(st: &State) -> Result<(), EngineError> {
        if st.shut_down || st.global.is_none() {
            return Err(EngineError::NotRunning);
        }
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.lock().global.is_some()
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }

    pub fn neighbors(&self) -> Vec<NeighborConfig> {
        self.lock().neighbors.values().cloned().collect()
    }

    /// Number of routes installed.
    pub fn len(&self) -> usize {
        self.lock().rib.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().rib.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().rib.contains_key(key)
    }

    /// Installed RIB keys in order.
    pub fn keys(&self) -> Vec<String> {
        self.lock().rib.keys().cloned().collect()
    }

    pub fn add_calls(&self) -> u32 {
        self.lock().add_calls
    }

    pub fn delete_calls(&self) -> u32 {
        self.lock().delete_calls
    }
}

#[cfg(any(test, feature = "testkit"))]
impl LocalRib {
    /// Make the next `start` fail with `msg`.
    pub fn fail_start(&self, msg: impl Into<String>) {
        self.lock().start_failure = Some(msg.into());
    }

    pub fn fail_next_adds(&self, n: u32) {
        self.lock().add_failures_left = n;
    }

    pub fn fail_next_deletes(&self, n: u32) {
        self.lock().delete_failures_left = n;
    }
}

#[async_trait]
impl RoutingEngine for LocalRib {
    async fn start(&self, global: GlobalConfig) -> Result<(), EngineError> {
        let mut st = self.lock();
        if let Some(msg) = st.start_failure.take() {
            return Err(EngineError::Startup(msg));
        }
        if st.shut_down {
            return Err(EngineError::NotRunning);
        }
        if st.global.is_some() {
            return Err(EngineError::Startup("already started".to_string()));
        }
        if global.local_asn == 0 {
            return Err(EngineError::Startup("local ASN must be non-zero".to_string()));
        }
        info!(
            op = "start",
            asn = global.local_asn,
            router_id = %global.router_id,
            "local rib started"
        );
        st.global = Some(global);
        Ok(())
    }

    async fn add_neighbor(&self, neighbor: NeighborConfig) -> Result<(), EngineError> {
        let mut st = self.lock();
        Self::ensure_running(&st)?;
        if neighbor.peer_asn == 0 {
            return Err(EngineError::Rejected("peer ASN must be non-zero".to_string()));
        }
        if st.global.as_ref().map(|g| g.router_id) == Some(neighbor.address) {
            return Err(EngineError::Rejected(format!(
                "neighbor address {} equals router id",
                neighbor.address
            )));
        }
        info!(
            op = "add_neighbor",
            address = %neighbor.address,
            peer_asn = neighbor.peer_asn,
            "neighbor configured"
        );
        st.neighbors.insert(neighbor.address, neighbor);
        Ok(())
    }

    async fn serve(&self) -> Result<(), EngineError> {
        let mut stop_rx = {
            let st = self.lock();
            Self::ensure_running(&st)?;
            self.stop_tx.subscribe()
        };
        // A closed channel means the engine is gone; either way we are done.
        let _ = stop_rx.wait_for(|stopped| *stopped).await;
        debug!(op = "serve", "local rib stopped serving");
        Ok(())
    }

    async fn add_path(&self, routes: Vec<Route>) -> Result<usize, EngineError> {
        let mut st = self.lock();
        Self::ensure_running(&st)?;
        st.add_calls += 1;
        if st.add_failures_left > 0 {
            st.add_failures_left -= 1;
            return Err(EngineError::Internal("injected add_path failure".to_string()));
        }
        let mut new = 0;
        for r in routes {
            if st.rib.insert(r.key(), r).is_none() {
                new += 1;
            }
        }
        debug!(op = "add_path", new, rib_size = st.rib.len(), "routes installed");
        Ok(new)
    }

    async fn delete_path(&self, routes: Vec<Route>) -> Result<usize, EngineError> {
        let mut st = self.lock();
        Self::ensure_running(&st)?;
        st.delete_calls += 1;
        if st.delete_failures_left > 0 {
            st.delete_failures_left -= 1;
            return Err(EngineError::Internal("injected delete_path failure".to_string()));
        }
        let mut removed = 0;
        for r in routes {
            if st.rib.remove(&r.key()).is_some() {
                removed += 1;
            }
        }
        debug!(op = "delete_path", removed, rib_size = st.rib.len(), "routes removed");
        Ok(removed)
    }

    async fn list_paths(&self) -> Result<Vec<Route>, EngineError> {
        Ok(self.lock().rib.values().cloned().collect())
    }

    async fn shutdown(&self) {
        let first = {
            let mut st = self.lock();
            !std::mem::replace(&mut st.shut_down, true)
        };
        if first {
            info!(op = "shutdown", "local rib shut down");
        }
        self.stop_tx.send_replace(true);
    }
}
