use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use synthload_core::validate_batch;
use synthload_generate::Batch;

use crate::sink::{ErrorClass, Sink, SinkConnection, SinkError};

/// Retry and timeout settings for [`ResilientLoader`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderOptions {
    /// Reconnects allowed for a single batch before giving up.
    pub max_reconnects: u32,
    pub connect_timeout_ms: u64,
    pub statement_timeout_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            max_reconnects: 5,
            connect_timeout_ms: 10_000,
            statement_timeout_ms: 30_000,
            backoff_initial_ms: 250,
            backoff_max_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl LoaderOptions {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }
}

/// Errors that end a batch.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("fatal sink error: {0}")]
    Fatal(#[source] SinkError),
    #[error("gave up after {attempts} reconnects: {last}")]
    RetriesExhausted { attempts: u32, last: SinkError },
    #[error("invalid batch: {0}")]
    InvalidBatch(#[from] synthload_core::Error),
}

/// Counters kept across every batch a loader handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderStats {
    pub batches_committed: u64,
    pub records_committed: u64,
    pub transient_failures: u64,
    pub reconnects: u64,
}

/// Persists batches transactionally, reconnecting on transient failures.
///
/// A batch is either committed whole or not at all. On a transient error
/// the open transaction is abandoned, the connection replaced and the
/// entire batch re-issued; fatal errors fail the batch without retry.
pub struct ResilientLoader {
    sink: Arc<dyn Sink>,
    options: LoaderOptions,
    connection: Option<Box<dyn SinkConnection>>,
    stats: LoaderStats,
}

impl ResilientLoader {
    pub fn new(sink: Arc<dyn Sink>, options: LoaderOptions) -> Self {
        Self {
            sink,
            options,
            connection: None,
            stats: LoaderStats::default(),
        }
    }

    pub fn stats(&self) -> LoaderStats {
        self.stats
    }

    pub fn engine(&self) -> &'static str {
        self.sink.engine()
    }

    /// Load one batch, returning the number of records committed.
    pub async fn load(&mut self, batch: &Batch) -> Result<u64, LoadError> {
        validate_batch(&batch.records)?;
        if batch.is_empty() {
            return Ok(0);
        }

        let mut backoff = Backoff::new(&self.options);
        let mut reconnects = 0;
        loop {
            let err = match self.attempt(batch).await {
                Ok(()) => {
                    let loaded = batch.len() as u64;
                    self.stats.batches_committed += 1;
                    self.stats.records_committed += loaded;
                    info!(
                        event = "batch_committed",
                        sequence = batch.sequence,
                        records = loaded,
                        reconnects
                    );
                    return Ok(loaded);
                }
                Err(err) => err,
            };

            match err.class() {
                ErrorClass::Fatal => {
                    self.abandon_transaction().await;
                    warn!(sequence = batch.sequence, error = %err, "batch failed");
                    return Err(LoadError::Fatal(err));
                }
                ErrorClass::Transient => {
                    self.stats.transient_failures += 1;
                    self.drop_connection().await;
                    if reconnects >= self.options.max_reconnects {
                        warn!(
                            sequence = batch.sequence,
                            attempts = reconnects,
                            error = %err,
                            "reconnect attempts exhausted"
                        );
                        return Err(LoadError::RetriesExhausted {
                            attempts: reconnects,
                            last: err,
                        });
                    }
                    reconnects += 1;
                    self.stats.reconnects += 1;
                    let delay = backoff.next_delay();
                    warn!(
                        event = "reconnecting",
                        sequence = batch.sequence,
                        attempt = reconnects,
                        delay_ms = delay.as_millis() as u64,
                        error = %err
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Close the current connection, if any.
    pub async fn close(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            let timeout = self.options.statement_timeout();
            if let Err(err) = with_timeout("close", timeout, conn.close()).await {
                debug!(error = %err, "error while closing sink connection");
            }
        }
    }

    async fn attempt(&mut self, batch: &Batch) -> Result<(), SinkError> {
        let timeout = self.options.statement_timeout();
        let conn = self.connection().await?;
        with_timeout("begin", timeout, conn.begin()).await?;
        for record in batch.iter() {
            with_timeout("insert", timeout, conn.insert(record)).await?;
        }
        with_timeout("commit", timeout, conn.commit()).await
    }

    async fn connection(&mut self) -> Result<&mut Box<dyn SinkConnection>, SinkError> {
        if self.connection.is_none() {
            let conn = with_timeout(
                "connect",
                self.options.connect_timeout(),
                self.sink.connect(),
            )
            .await?;
            debug!(engine = self.sink.engine(), "sink connection opened");
            self.connection = Some(conn);
        }
        self.connection
            .as_mut()
            .ok_or_else(|| SinkError::ConnectionLost("no open connection".to_string()))
    }

    async fn abandon_transaction(&mut self) {
        let timeout = self.options.statement_timeout();
        let rolled_back = match self.connection.as_mut() {
            Some(conn) => with_timeout("rollback", timeout, conn.rollback()).await,
            None => Ok(()),
        };
        if let Err(err) = rolled_back {
            debug!(error = %err, "rollback failed, dropping connection");
            self.drop_connection().await;
        }
    }

    async fn drop_connection(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            let timeout = self.options.connect_timeout();
            if let Err(err) = with_timeout("close", timeout, conn.close()).await {
                debug!(error = %err, "error while closing broken sink connection");
            }
        }
    }
}

async fn with_timeout<T, F>(operation: &'static str, after: Duration, fut: F) -> Result<T, SinkError>
where
    F: Future<Output = Result<T, SinkError>>,
{
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| SinkError::Timeout { operation, after })?
}

/// Exponential reconnect delay, capped at `backoff_max_ms`.
struct Backoff {
    current: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    fn new(options: &LoaderOptions) -> Self {
        Self {
            current: Duration::from_millis(options.backoff_initial_ms),
            max: Duration::from_millis(options.backoff_max_ms),
            multiplier: options.backoff_multiplier.max(1.0),
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.max);
        let next_ms = (self.current.as_millis() as f64 * self.multiplier) as u64;
        self.current = Duration::from_millis(next_ms).min(self.max);
        delay
    }
}
