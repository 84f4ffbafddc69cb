use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use synthload_core::SyntheticRecord;

/// How the loader reacts to a sink failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The link to the sink broke; reconnect and retry the batch.
    Transient,
    /// Retrying cannot help; the batch fails.
    Fatal,
}

/// Driver-neutral sink failure. Drivers map their errors into these variants.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("database error (code {code:?}): {message}")]
    Database {
        code: Option<String>,
        message: String,
    },
    #[error("statement error: {0}")]
    Statement(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] ::csv::Error),
}

impl SinkError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ConnectionLost(_) | Self::Timeout { .. } => ErrorClass::Transient,
            Self::Database { .. } | Self::Statement(_) | Self::Io(_) | Self::Csv(_) => {
                ErrorClass::Fatal
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// One open session with the sink.
#[async_trait]
pub trait SinkConnection: Send {
    async fn begin(&mut self) -> Result<(), SinkError>;

    /// Parameterized insert of one record inside the open transaction.
    async fn insert(&mut self, record: &SyntheticRecord) -> Result<(), SinkError>;

    async fn commit(&mut self) -> Result<(), SinkError>;

    async fn rollback(&mut self) -> Result<(), SinkError>;

    async fn close(&mut self) -> Result<(), SinkError>;
}

/// Factory for sink connections.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Engine identifier (e.g. `postgres`).
    fn engine(&self) -> &'static str;

    async fn connect(&self) -> Result<Box<dyn SinkConnection>, SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failures_are_transient() {
        assert!(SinkError::ConnectionLost("reset by peer".to_string()).is_transient());
        assert!(
            SinkError::Timeout {
                operation: "insert",
                after: Duration::from_secs(1)
            }
            .is_transient()
        );
    }

    #[test]
    fn statement_and_constraint_failures_are_fatal() {
        let unique = SinkError::Database {
            code: Some("23505".to_string()),
            message: "duplicate key value violates unique constraint".to_string(),
        };
        assert_eq!(unique.class(), ErrorClass::Fatal);
        assert_eq!(
            SinkError::Statement("syntax error".to_string()).class(),
            ErrorClass::Fatal
        );
    }
}
