//! Sink implementations.

pub mod csv;
pub mod memory;
pub mod postgres;

pub use self::csv::CsvSink;
pub use self::memory::MemorySink;
pub use self::postgres::PostgresSink;
