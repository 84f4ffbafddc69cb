use thiserror::Error;

use synthload_core::FieldKind;

/// Errors emitted while generating records.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("value space exhausted for {field} after {attempts} candidates")]
    SpaceExhausted { field: FieldKind, attempts: u32 },
    #[error("invalid options: {0}")]
    InvalidOptions(String),
}
