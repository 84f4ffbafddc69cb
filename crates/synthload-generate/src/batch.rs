use rand::rngs::StdRng;
use tracing::debug;

use synthload_core::{FieldKind, SyntheticRecord};

use crate::errors::GenerationError;
use crate::model::{GenerateOptions, GenerationReport};
use crate::registry::UniquenessRegistry;
use crate::synthesizer::IdentitySynthesizer;

/// Source of record candidates for the batch generator.
pub trait CandidateSource {
    /// Draw a fresh candidate.
    fn candidate(&mut self, domains: &[String]) -> Result<SyntheticRecord, GenerationError>;

    /// Redraw the minimal sub-value behind `field`, recomputing derived fields.
    fn redraw(&mut self, record: SyntheticRecord, field: FieldKind) -> SyntheticRecord;
}

/// Ordered records produced for one load unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Zero-based position of this batch in its sequence.
    pub sequence: u64,
    pub records: Vec<SyntheticRecord>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SyntheticRecord> {
        self.records.iter()
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryLimits {
    max_field_attempts: u32,
    max_candidate_attempts: u32,
}

/// Drives a [`CandidateSource`] across a requested record count.
#[derive(Debug)]
pub struct BatchGenerator<S> {
    source: S,
    domains: Vec<String>,
    batch_size: usize,
    limits: RetryLimits,
}

impl BatchGenerator<IdentitySynthesizer<StdRng>> {
    pub fn from_options(options: &GenerateOptions) -> Result<Self, GenerationError> {
        let source = IdentitySynthesizer::from_options(options)?;
        Self::new(source, options)
    }
}

impl<S: CandidateSource> BatchGenerator<S> {
    pub fn new(source: S, options: &GenerateOptions) -> Result<Self, GenerationError> {
        options.validate()?;
        Ok(Self {
            source,
            domains: options.email_domains.clone(),
            batch_size: options.batch_size,
            limits: RetryLimits {
                max_field_attempts: options.max_field_attempts,
                max_candidate_attempts: options.max_candidate_attempts,
            },
        })
    }

    /// Batch size taken from the options this generator was built with.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Lazily yield batches covering exactly `n` records.
    ///
    /// Every call starts a fresh [`UniquenessRegistry`]; values are unique
    /// within the returned sequence only.
    pub fn batches(&mut self, n: u64, batch_size: usize) -> Result<Batches<'_, S>, GenerationError> {
        if batch_size == 0 {
            return Err(GenerationError::InvalidOptions(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(Batches {
            generator: self,
            registry: UniquenessRegistry::new(),
            report: GenerationReport::default(),
            remaining: n,
            batch_size,
            next_sequence: 0,
            failed: false,
        })
    }
}

/// Lazy batch sequence with its own uniqueness state.
pub struct Batches<'a, S> {
    generator: &'a mut BatchGenerator<S>,
    registry: UniquenessRegistry,
    report: GenerationReport,
    remaining: u64,
    batch_size: usize,
    next_sequence: u64,
    failed: bool,
}

impl<S: CandidateSource> Batches<'_, S> {
    /// Add records to the sequence, keeping the same registry.
    pub fn extend(&mut self, additional: u64) {
        self.remaining = self.remaining.saturating_add(additional);
    }

    /// Records still to be produced.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn registry(&self) -> &UniquenessRegistry {
        &self.registry
    }

    pub fn report(&self) -> &GenerationReport {
        &self.report
    }

    fn accept_one(&mut self) -> Result<SyntheticRecord, GenerationError> {
        let limits = self.generator.limits;
        let mut exhausted_field = FieldKind::IdNumber;

        for _ in 0..limits.max_candidate_attempts {
            let mut record = self.generator.source.candidate(&self.generator.domains)?;
            let mut reserved: Vec<(FieldKind, String)> = Vec::with_capacity(4);
            let mut accepted = true;

            'fields: for field in FieldKind::CHECK_ORDER {
                let mut attempts = 1;
                while !self.registry.try_reserve(field, record.value(field)) {
                    self.report.record_collision(field);
                    if attempts >= limits.max_field_attempts {
                        accepted = false;
                        exhausted_field = field;
                        break 'fields;
                    }
                    attempts += 1;
                    record = self.generator.source.redraw(record, field);
                }
                reserved.push((field, record.value(field).to_string()));
            }

            if accepted {
                self.report.records_generated += 1;
                return Ok(record);
            }

            for (field, value) in &reserved {
                self.registry.release(*field, value);
            }
            self.report.candidates_discarded += 1;
            debug!(field = %exhausted_field, "candidate discarded after repeated collisions");
        }

        Err(GenerationError::SpaceExhausted {
            field: exhausted_field,
            attempts: limits.max_candidate_attempts,
        })
    }
}

impl<S: CandidateSource> Iterator for Batches<'_, S> {
    type Item = Result<Batch, GenerationError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == 0 {
            return None;
        }

        let size = self.remaining.min(self.batch_size as u64) as usize;
        let mut records = Vec::with_capacity(size);
        for _ in 0..size {
            match self.accept_one() {
                Ok(record) => records.push(record),
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }

        self.remaining -= size as u64;
        let batch = Batch {
            sequence: self.next_sequence,
            records,
        };
        self.next_sequence += 1;
        self.report.batches_emitted += 1;
        debug!(sequence = batch.sequence, records = batch.len(), "batch generated");
        Some(Ok(batch))
    }
}
