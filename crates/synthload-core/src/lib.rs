//! Core contracts shared across synthload crates.
//!
//! Defines the synthetic record, the uniqueness-constrained field kinds,
//! record validation and connection-string redaction.

pub mod error;
pub mod record;
pub mod redaction;
pub mod validation;

pub use error::{Error, Result};
pub use record::{FieldKind, RecordParts, SyntheticRecord, uid_digest};
pub use redaction::{RedactedConnection, redact_connection_string};
pub use validation::{is_valid_id_number, validate_batch, validate_record};

/// Column layout of the target table, in insert order.
pub const RECORD_COLUMNS: [&str; 9] = [
    "uid",
    "guid",
    "first_name",
    "last_name",
    "email",
    "birth_date",
    "sin",
    "salt",
    "hashkey",
];
