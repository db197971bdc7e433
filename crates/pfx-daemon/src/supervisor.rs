//! Lifecycle supervisor.
//!
//! Startup order (any failure is fatal, after cleanup):
//! 1. routing metadata parsed from config
//! 2. admin API listener bound (when enabled)
//! 3. routing engine `start`, then `add_neighbor`
//! 4. tasks: engine serve loop, reconciliation loop, announcer loop, admin
//!    API, SSE feeders
//!
//! Shutdown runs once, on the first of: the stop future resolving, the
//! engine's serve loop ending, or the reconciliation loop losing its
//! consumer. It flips the shared stop flag (no new events are accepted),
//! shuts the engine down, closes the store connection and waits briefly for
//! the tasks to finish. Batches not yet handed off are dropped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use pfx_announce::{GlobalConfig, NeighborConfig, RouteAnnouncer, RoutingEngine, RoutingMetadata};
use pfx_config::SyncConfig;
use pfx_runtime::{wait_for_stop, wire, LoopSettings};
use pfx_source::PrefixSource;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};

use crate::{routes, state};

const TASK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Why the supervisor returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExitReason {
    /// The stop future resolved (normally an OS signal), carrying its name.
    Signal(&'static str),
    /// The routing engine stopped serving on its own.
    EngineStopped(String),
    /// The announcer went away and the loop could not hand off a batch.
    PipelineClosed,
}

impl ExitReason {
    /// Process exit status: 1 after a signal, 2 when a core task ended on
    /// its own.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitReason::Signal(_) => 1,
            ExitReason::EngineStopped(_) | ExitReason::PipelineClosed => 2,
        }
    }
}

pub struct Supervisor {
    config: SyncConfig,
    config_hash: String,
    source: Arc<dyn PrefixSource>,
    engine: Arc<dyn RoutingEngine>,
}

impl Supervisor {
    pub fn new(
        config: SyncConfig,
        config_hash: impl Into<String>,
        source: Arc<dyn PrefixSource>,
        engine: Arc<dyn RoutingEngine>,
    ) -> Self {
        Self {
            config,
            config_hash: config_hash.into(),
            source,
            engine,
        }
    }

    async fn release(&self) {
        self.engine.shutdown().await;
        self.source.close().await;
    }

    /// Run until `stop` resolves or a core task ends.
    ///
    /// `Err` only for startup failures; the engine and store are released
    /// before returning in every case.
    pub async fn run<F>(self, stop: F) -> Result<ExitReason>
    where
        F: Future<Output = &'static str> + Send,
    {
        match self.start_and_run(stop).await {
            Ok(reason) => Ok(reason),
            Err(e) => {
                error!(op = "supervisor", error = %format!("{e:#}"), "startup failed");
                self.release().await;
                Err(e)
            }
        }
    }

    async fn start_and_run<F>(&self, stop: F) -> Result<ExitReason>
    where
        F: Future<Output = &'static str> + Send,
    {
        let cfg = &self.config;

        // 1. metadata
        let meta = RoutingMetadata::try_from(&cfg.routing).context("invalid routing metadata")?;

        // 2. api listener
        let listener = if cfg.api.enabled {
            let addr = cfg.api.listen_addr()?;
            let l = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind admin api on {addr}"))?;
            Some(l)
        } else {
            None
        };

        // 3. engine
        self.engine
            .start(GlobalConfig::from(&cfg.routing))
            .await
            .context("routing engine start failed")?;
        let neighbor = NeighborConfig::try_from(&cfg.routing)?;
        self.engine
            .add_neighbor(neighbor)
            .await
            .context("routing engine rejected neighbor")?;
        info!(
            op = "supervisor",
            asn = cfg.routing.local_asn,
            router_id = %cfg.routing.router_id,
            neighbor = %cfg.routing.neighbor_address,
            "routing engine configured"
        );

        // 4. tasks
        let (stop_tx, stop_rx) = watch::channel(false);

        let mut serve = {
            let engine = Arc::clone(&self.engine);
            tokio::spawn(async move { engine.serve().await })
        };

        let (lp, announcer) = wire(
            Arc::clone(&self.source),
            LoopSettings::from_source_config(&cfg.source),
            RouteAnnouncer::new(Arc::clone(&self.engine), meta),
        );
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let announcer = announcer.with_outcome_sink(outcome_tx);

        let app = Arc::new(state::AppState::new(
            lp.subscribe_status(),
            Arc::clone(&self.engine),
            self.config_hash.clone(),
        ));
        let mut aux: Vec<JoinHandle<()>> = vec![
            state::spawn_heartbeat(app.bus.clone(), HEARTBEAT_INTERVAL, stop_rx.clone()),
            state::spawn_cycle_events(app.bus.clone(), lp.subscribe_status(), stop_rx.clone()),
            state::spawn_outcome_log(app.bus.clone(), outcome_rx),
        ];

        let mut reconcile = tokio::spawn(lp.run(stop_rx.clone()));
        let announcer = tokio::spawn(announcer.run(stop_rx.clone()));

        if let Some(listener) = listener {
            aux.push(spawn_api(listener, Arc::clone(&app), stop_rx.clone()));
        }

        info!(op = "supervisor", config_hash = %self.config_hash, "started");

        let mut serve_done = false;
        let mut reconcile_done = false;
        let reason = tokio::select! {
            name = stop => {
                info!(op = "supervisor", signal = name, "received signal, shutting down");
                ExitReason::Signal(name)
            }
            res = &mut serve => {
                serve_done = true;
                let msg = match res {
                    Ok(Ok(())) => "serve loop returned".to_string(),
                    Ok(Err(e)) => e.to_string(),
                    Err(e) => e.to_string(),
                };
                error!(op = "supervisor", error = %msg, "routing engine stopped");
                ExitReason::EngineStopped(msg)
            }
            _ = &mut reconcile => {
                reconcile_done = true;
                error!(op = "supervisor", "reconciliation loop ended");
                ExitReason::PipelineClosed
            }
        };

        // Cleanup
        stop_tx.send_replace(true);
        self.release().await;

        let drain = async {
            if !reconcile_done {
                let _ = reconcile.await;
            }
            let _ = announcer.await;
            if !serve_done {
                let _ = serve.await;
            }
            for h in aux {
                let _ = h.await;
            }
        };
        if tokio::time::timeout(TASK_DRAIN_TIMEOUT, drain).await.is_err() {
            warn!(op = "supervisor", "tasks still running after shutdown timeout");
        }
        info!(op = "supervisor", "shutdown complete");
        Ok(reason)
    }
}

fn spawn_api(
    listener: tokio::net::TcpListener,
    app: Arc<state::AppState>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let router = routes::build_router(app)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    if let Ok(addr) = listener.local_addr() {
        info!(op = "api", "admin api listening on http://{}", addr);
    }
    tokio::spawn(async move {
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move { wait_for_stop(&mut stop).await })
            .await;
        if let Err(e) = served {
            error!(op = "api", error = %e, "admin api server crashed");
        }
    })
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET])
        .allow_headers(tower_http::cors::Any)
}
