use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use pfx_config::secrets::StoreCredentials;
use pfx_config::SourceConfig;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Connection, Row};
use tracing::{debug, info, warn};

use crate::{prefix_from_column, FetchedRows, PrefixSource, SourceError};

/// MySQL-backed prefix store.
///
/// The pool is created lazily: construction never touches the network, the
/// first `ping` does. The pool is reused across cycles and closed once at
/// shutdown.
#[derive(Clone, Debug)]
pub struct MySqlSource {
    pool: MySqlPool,
    dsn_for_logs: String,
}

impl MySqlSource {
    pub fn new(cfg: &SourceConfig, creds: &StoreCredentials) -> Result<Self, SourceError> {
        let host = cfg
            .host_addr()
            .map_err(|e| SourceError::Connect(e.to_string()))?;

        let opts = MySqlConnectOptions::new()
            .host(&host.to_string())
            .port(cfg.port)
            .username(&creds.username)
            .password(&creds.password)
            .database(&cfg.database);

        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy_with(opts);

        Ok(Self {
            pool,
            dsn_for_logs: cfg.data_source_name(),
        })
    }
}

fn classify(err: sqlx::Error) -> SourceError {
    match err {
        e @ (sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed) => SourceError::Connect(e.to_string()),
        other => SourceError::Query(other.to_string()),
    }
}

/// First column as text. VARBINARY columns are accepted when they hold UTF-8.
fn column_text(row: &MySqlRow) -> Option<String> {
    if let Ok(v) = row.try_get::<Option<String>, _>(0) {
        return v;
    }
    match row.try_get::<Option<Vec<u8>>, _>(0) {
        Ok(Some(bytes)) => String::from_utf8(bytes).ok(),
        _ => None,
    }
}

/// Decide what a row stream error means for the fetch.
///
/// Connectivity loss is always an error, however many rows arrived. A query
/// error before the first row fails the fetch; after it, the rows read so far
/// are kept and the result is flagged `truncated`.
fn end_of_stream(
    err: SourceError,
    rows_read: usize,
    out: &mut FetchedRows,
) -> Result<(), SourceError> {
    if err.is_connectivity() || rows_read == 0 {
        return Err(err);
    }
    warn!(op = "fetch", rows_read, error = %err, "row stream ended early");
    out.truncated = true;
    Ok(())
}

#[async_trait]
impl PrefixSource for MySqlSource {
    async fn ping(&self) -> Result<(), SourceError> {
        let mut conn = self.pool.acquire().await.map_err(classify)?;
        conn.ping().await.map_err(classify)
    }

    async fn fetch_prefixes(&self, statement: &str) -> Result<FetchedRows, SourceError> {
        let mut rows = sqlx::query(statement).fetch(&self.pool);
        let mut out = FetchedRows::default();
        let mut row_no: usize = 0;

        loop {
            match rows.try_next().await {
                Ok(Some(row)) => {
                    row_no += 1;
                    match prefix_from_column(column_text(&row)) {
                        Some(prefix) => {
                            debug!(op = "fetch", %prefix, "found prefix");
                            out.prefixes.push(prefix);
                        }
                        None => {
                            warn!(op = "fetch", row = row_no, "cannot read prefix column, row skipped");
                            out.skipped_rows += 1;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    end_of_stream(classify(e), row_no, &mut out)?;
                    break;
                }
            }
        }

        Ok(out)
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            info!(op = "close", dsn = %self.dsn_for_logs, "closing prefix store connection");
            self.pool.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use pfx_reconcile::Prefix;

    use super::*;

    fn partial() -> FetchedRows {
        FetchedRows {
            prefixes: vec![Prefix::from("10.0.0.0/24")],
            ..FetchedRows::default()
        }
    }

    #[test]
    fn connection_lost_mid_stream_fails_the_fetch() {
        let mut out = partial();
        let err = end_of_stream(SourceError::Connect("reset".to_string()), 1, &mut out)
            .unwrap_err();
        assert!(err.is_connectivity());
        assert!(!out.truncated);
    }

    #[test]
    fn query_error_before_first_row_fails_the_fetch() {
        let mut out = FetchedRows::default();
        let err = end_of_stream(SourceError::Query("syntax".to_string()), 0, &mut out)
            .unwrap_err();
        assert!(!err.is_connectivity());
    }

    #[test]
    fn query_error_after_rows_truncates() {
        let mut out = partial();
        end_of_stream(SourceError::Query("bad row".to_string()), 1, &mut out).unwrap();
        assert!(out.truncated);
        assert_eq!(out.prefixes.len(), 1);
    }
}
