//! Source connector: read the desired prefix set from the administrative store.
//!
//! The loop talks to the store only through [`PrefixSource`]:
//! - `ping`: liveness check; failures are connectivity errors
//! - `fetch_prefixes`: run the configured read-only statement; one prefix
//!   per row, malformed rows are skipped and counted, never fatal
//! - `close`: release the connection at shutdown
//!
//! Reconnect behaviour lives in [`retry`], not in the implementations.

use async_trait::async_trait;
use pfx_reconcile::{DesiredSet, Prefix, PrefixMeta};

#[cfg(any(test, feature = "testkit"))]
pub mod memory;
mod mysql;
pub mod retry;

#[cfg(any(test, feature = "testkit"))]
pub use memory::MemorySource;
pub use mysql::MySqlSource;
pub use retry::{wait_until_live, Backoff, RetryExhausted, RetryPolicy};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure talking to the store, split by how the loop must react.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceError {
    /// Store unreachable or connection lost. Recovered by blocking retry.
    Connect(String),
    /// Statement failed (syntax, missing table, permissions, ...).
    Query(String),
}

impl SourceError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, SourceError::Connect(_))
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Connect(msg) => write!(f, "store connectivity error: {msg}"),
            SourceError::Query(msg) => write!(f, "store query error: {msg}"),
        }
    }
}

impl std::error::Error for SourceError {}

// ---------------------------------------------------------------------------
// Fetch result
// ---------------------------------------------------------------------------

/// Rows read by one `fetch_prefixes` call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchedRows {
    /// Prefixes in row order (duplicates possible; the desired set collapses them).
    pub prefixes: Vec<Prefix>,
    /// Rows that could not be read as a prefix.
    pub skipped_rows: usize,
    /// The row stream failed part way; `prefixes` holds what arrived before.
    pub truncated: bool,
}

impl FetchedRows {
    pub fn into_desired_set(self) -> DesiredSet {
        let mut set = DesiredSet::empty();
        for p in self.prefixes {
            set.insert(p, PrefixMeta::none());
        }
        set
    }
}

/// Turn one raw column value into a prefix. `None`/blank rows are malformed.
pub fn prefix_from_column(raw: Option<String>) -> Option<Prefix> {
    let raw = raw?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(Prefix::new(trimmed))
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PrefixSource: Send + Sync {
    /// Liveness check against the store.
    async fn ping(&self) -> Result<(), SourceError>;

    /// Run `statement` and collect one prefix per row.
    async fn fetch_prefixes(&self, statement: &str) -> Result<FetchedRows, SourceError>;

    /// Release the underlying connection(s). Idempotent.
    async fn close(&self);
}
