//! Resilient batched loading of synthetic records.
//!
//! [`ResilientLoader`] persists one batch per transaction and rides out
//! transient connection failures by reconnecting and re-issuing the same
//! batch. [`pipeline::run`] drives generation and loading for a whole run.

pub mod loader;
pub mod pipeline;
pub mod sink;
pub mod sinks;

pub use loader::{LoadError, LoaderOptions, LoaderStats, ResilientLoader};
pub use pipeline::{FailurePolicy, PipelineError, PipelineOptions, RunSummary};
pub use sink::{ErrorClass, Sink, SinkConnection, SinkError};
pub use sinks::{CsvSink, MemorySink, PostgresSink};
