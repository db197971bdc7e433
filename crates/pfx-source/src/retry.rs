//! Reconnect policy for the source connector.
//!
//! The daemon runs with [`RetryPolicy::forever`]: unlimited attempts, a
//! constant delay. Exponential backoff and attempt caps are available for
//! callers that want them; the connector API does not change.

use std::time::Duration;

use tracing::{info, warn};

use crate::{PrefixSource, SourceError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backoff {
    Constant(Duration),
    /// Doubles after every failed attempt, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` = retry forever.
    max_attempts: Option<u32>,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Unlimited attempts, fixed delay between them.
    pub fn forever(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff: Backoff::Constant(delay),
        }
    }

    /// Unlimited attempts, doubling delay.
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff: Backoff::Exponential { initial, max },
        }
    }

    /// Cap the total number of attempts (values below 1 are treated as 1).
    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = Some(n.max(1));
        self
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Constant(d) => d,
            Backoff::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                initial.saturating_mul(factor).min(max)
            }
        }
    }

    /// Whether another attempt may follow `attempts_made` failures.
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        match self.max_attempts {
            None => true,
            Some(max) => attempts_made < max,
        }
    }
}

/// Raised only by a capped policy; [`RetryPolicy::forever`] never gives up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last_error: SourceError,
}

impl std::fmt::Display for RetryExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "store still unreachable after {} attempt(s): {}",
            self.attempts, self.last_error
        )
    }
}

impl std::error::Error for RetryExhausted {}

/// Ping `source` until it answers. Blocks the calling task meanwhile.
///
/// Returns the number of attempts made, including the successful one.
pub async fn wait_until_live<S>(source: &S, policy: &RetryPolicy) -> Result<u32, RetryExhausted>
where
    S: PrefixSource + ?Sized,
{
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        match source.ping().await {
            Ok(()) => {
                if attempt > 1 {
                    info!(op = "ping", attempts = attempt, "store connectivity restored");
                }
                return Ok(attempt);
            }
            Err(err) => {
                if !policy.allows_another(attempt) {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }
                let delay = policy.delay_after(attempt);
                warn!(
                    op = "ping",
                    attempt,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "store connection error, will retry"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
