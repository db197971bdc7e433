//! Scripted in-process [`PrefixSource`] for tests (feature `testkit`).
//!
//! Rows are `Option<String>` so tests can model NULL / unreadable columns.
//! Ping and query failures are queued with `fail_next_*` and consumed in
//! order.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::{prefix_from_column, FetchedRows, PrefixSource, SourceError};

#[derive(Debug, Default)]
struct State {
    rows: Vec<Option<String>>,
    ping_failures_left: u32,
    query_failures_left: u32,
    connect_failures_on_fetch_left: u32,
    truncate_next_fetch_after: Option<usize>,
    ping_calls: u32,
    fetch_calls: u32,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct MemorySource {
    state: Mutex<State>,
}

impl MemorySource {
    pub fn new<I, S>(rows: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let src = Self::default();
        src.set_rows(rows);
        src
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the table contents with well-formed rows.
    pub fn set_rows<I, S>(&self, rows: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().rows = rows.into_iter().map(|s| Some(s.into())).collect();
    }

    /// Replace the table contents, `None` = unreadable row.
    pub fn set_raw_rows(&self, rows: Vec<Option<String>>) {
        self.lock().rows = rows;
    }

    pub fn fail_next_pings(&self, n: u32) {
        self.lock().ping_failures_left = n;
    }

    pub fn fail_next_queries(&self, n: u32) {
        self.lock().query_failures_left = n;
    }

    /// Next `n` fetches fail as if the connection dropped mid-cycle.
    pub fn drop_connection_on_next_fetches(&self, n: u32) {
        self.lock().connect_failures_on_fetch_left = n;
    }

    /// The next fetch stops after `rows` table rows and comes back
    /// `truncated`, as when a row stream fails part way with a query error.
    pub fn truncate_next_fetch_after(&self, rows: usize) {
        self.lock().truncate_next_fetch_after = Some(rows);
    }

    pub fn ping_calls(&self) -> u32 {
        self.lock().ping_calls
    }

    pub fn fetch_calls(&self) -> u32 {
        self.lock().fetch_calls
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[async_trait]
impl PrefixSource for MemorySource {
    async fn ping(&self) -> Result<(), SourceError> {
        let mut st = self.lock();
        st.ping_calls += 1;
        if st.closed {
            return Err(SourceError::Connect("source closed".to_string()));
        }
        if st.ping_failures_left > 0 {
            st.ping_failures_left -= 1;
            return Err(SourceError::Connect("connection refused".to_string()));
        }
        Ok(())
    }

    async fn fetch_prefixes(&self, _statement: &str) -> Result<FetchedRows, SourceError> {
        let mut st = self.lock();
        st.fetch_calls += 1;
        if st.closed {
            return Err(SourceError::Connect("source closed".to_string()));
        }
        if st.connect_failures_on_fetch_left > 0 {
            st.connect_failures_on_fetch_left -= 1;
            return Err(SourceError::Connect("connection reset by peer".to_string()));
        }
        if st.query_failures_left > 0 {
            st.query_failures_left -= 1;
            return Err(SourceError::Query("table 'blackholeprefixes' doesn't exist".to_string()));
        }

        let mut out = FetchedRows::default();
        let limit = match st.truncate_next_fetch_after.take() {
            Some(n) => {
                out.truncated = true;
                n
            }
            None => st.rows.len(),
        };
        for raw in st.rows.iter().take(limit).cloned() {
            match prefix_from_column(raw) {
                Some(p) => out.prefixes.push(p),
                None => out.skipped_rows += 1,
            }
        }
        Ok(out)
    }

    async fn close(&self) {
        self.lock().closed = true;
    }
}
