//! Uniqueness-guaranteeing synthetic record generation.
//!
//! [`IdentitySynthesizer`] draws record candidates, [`UniquenessRegistry`]
//! tracks the constrained values seen in a run and [`BatchGenerator`]
//! drives both to produce fixed-size batches lazily.

pub mod batch;
pub mod errors;
pub mod locales;
pub mod model;
pub mod registry;
pub mod synthesizer;

pub use batch::{Batch, BatchGenerator, Batches, CandidateSource};
pub use errors::GenerationError;
pub use locales::LocaleKey;
pub use model::{GenerateOptions, GenerationReport};
pub use registry::UniquenessRegistry;
pub use synthesizer::IdentitySynthesizer;
