use thiserror::Error;

/// Core error type shared across synthload crates.
#[derive(Debug, Error)]
pub enum Error {
    /// A record violates a format or derivation invariant.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// Convenience alias for results returned by synthload crates.
pub type Result<T> = std::result::Result<T, Error>;
