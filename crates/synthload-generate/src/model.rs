use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use synthload_core::FieldKind;

use crate::errors::GenerationError;
use crate::locales::LocaleKey;

/// Options for record generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerateOptions {
    /// Domains an email may be issued under. Must not be empty.
    pub email_domains: Vec<String>,
    /// Locale of the name source.
    pub locale: LocaleKey,
    /// Records per batch handed to the loader.
    pub batch_size: usize,
    /// Email disambiguators are drawn from `1..=email_suffix_max`.
    pub email_suffix_max: u32,
    /// Youngest age, in years, at generation time.
    pub min_age: u32,
    /// Oldest age, in years, at generation time.
    pub max_age: u32,
    /// Redraws of one field's sub-value before the candidate is discarded.
    pub max_field_attempts: u32,
    /// Whole candidates tried for one record before giving up.
    pub max_candidate_attempts: u32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            email_domains: Vec::new(),
            locale: LocaleKey::EnUs,
            batch_size: 1000,
            email_suffix_max: 50,
            min_age: 5,
            max_age: 100,
            max_field_attempts: 64,
            max_candidate_attempts: 32,
        }
    }
}

impl GenerateOptions {
    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.email_domains.is_empty() {
            return Err(GenerationError::InvalidOptions(
                "email_domains must not be empty".to_string(),
            ));
        }
        if let Some(domain) = self.email_domains.iter().find(|domain| !is_plain_domain(domain)) {
            return Err(GenerationError::InvalidOptions(format!(
                "email domain '{domain}' is not a plain host name"
            )));
        }
        if self.batch_size == 0 {
            return Err(GenerationError::InvalidOptions(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if self.email_suffix_max == 0 {
            return Err(GenerationError::InvalidOptions(
                "email_suffix_max must be at least 1".to_string(),
            ));
        }
        if self.min_age > self.max_age {
            return Err(GenerationError::InvalidOptions(format!(
                "min_age {} exceeds max_age {}",
                self.min_age, self.max_age
            )));
        }
        if self.max_age > 150 {
            return Err(GenerationError::InvalidOptions(format!(
                "max_age {} is out of range",
                self.max_age
            )));
        }
        if self.max_field_attempts == 0 || self.max_candidate_attempts == 0 {
            return Err(GenerationError::InvalidOptions(
                "retry limits must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_plain_domain(domain: &str) -> bool {
    !domain.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '.' || ch == '-')
}

/// Counters collected while a batch sequence runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationReport {
    pub records_generated: u64,
    pub batches_emitted: u64,
    pub candidates_discarded: u64,
    pub collisions_by_field: BTreeMap<String, u64>,
}

impl GenerationReport {
    pub fn record_collision(&mut self, field: FieldKind) {
        *self
            .collisions_by_field
            .entry(field.as_str().to_string())
            .or_insert(0) += 1;
    }

    pub fn collisions_total(&self) -> u64 {
        self.collisions_by_field.values().sum()
    }
}
