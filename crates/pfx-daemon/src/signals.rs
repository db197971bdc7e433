//! Termination signals.
//!
//! Every catchable termination-style signal ends the daemon the same way:
//! INT, TERM, HUP, QUIT, USR1 and USR2 on unix, ctrl-c elsewhere.

use anyhow::Result;

#[cfg(unix)]
pub struct ShutdownSignals {
    streams: Vec<(&'static str, tokio::signal::unix::Signal)>,
}

#[cfg(unix)]
impl ShutdownSignals {
    /// Install the handlers. Must run inside the tokio runtime.
    pub fn install() -> Result<Self> {
        use anyhow::Context;
        use tokio::signal::unix::{signal, SignalKind};

        let kinds = [
            ("SIGINT", SignalKind::interrupt()),
            ("SIGTERM", SignalKind::terminate()),
            ("SIGHUP", SignalKind::hangup()),
            ("SIGQUIT", SignalKind::quit()),
            ("SIGUSR1", SignalKind::user_defined1()),
            ("SIGUSR2", SignalKind::user_defined2()),
        ];
        let mut streams = Vec::with_capacity(kinds.len());
        for (name, kind) in kinds {
            let s = signal(kind).with_context(|| format!("failed to install {name} handler"))?;
            streams.push((name, s));
        }
        Ok(Self { streams })
    }

    /// Resolve with the name of the first signal received.
    pub async fn recv(mut self) -> &'static str {
        let waits = self.streams.iter_mut().map(|(name, s)| {
            let name: &'static str = *name;
            Box::pin(async move {
                s.recv().await;
                name
            })
        });
        let (name, _, _) = futures_util::future::select_all(waits).await;
        name
    }
}

#[cfg(not(unix))]
pub struct ShutdownSignals;

#[cfg(not(unix))]
impl ShutdownSignals {
    pub fn install() -> Result<Self> {
        Ok(Self)
    }

    pub async fn recv(self) -> &'static str {
        // A listener error also ends the wait.
        let _ = tokio::signal::ctrl_c().await;
        "ctrl-c"
    }
}
