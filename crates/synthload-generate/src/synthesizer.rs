use chrono::{Local, Months, NaiveDate};
use fake::Fake;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{CryptoRng, Rng, RngCore, SeedableRng};
use sha2::{Digest, Sha256};

use synthload_core::{FieldKind, RecordParts, SyntheticRecord};

use crate::batch::CandidateSource;
use crate::errors::GenerationError;
use crate::locales::LocaleKey;
use crate::model::GenerateOptions;

/// Produces one syntactically valid record candidate per call.
///
/// Names come from the `fake` name lists of the configured locale. Salt,
/// hash key, ID groups, GUID bytes and email disambiguators all draw from
/// `R`, which must be a cryptographically strong generator.
#[derive(Debug)]
pub struct IdentitySynthesizer<R> {
    rng: R,
    locale: LocaleKey,
    today: NaiveDate,
    min_age: u32,
    max_age: u32,
    email_suffix_max: u32,
}

impl IdentitySynthesizer<StdRng> {
    /// Synthesizer seeded from the operating system's entropy source.
    pub fn from_options(options: &GenerateOptions) -> Result<Self, GenerationError> {
        Self::with_rng(options, StdRng::from_os_rng())
    }
}

impl<R: RngCore + CryptoRng> IdentitySynthesizer<R> {
    pub fn with_rng(options: &GenerateOptions, rng: R) -> Result<Self, GenerationError> {
        options.validate()?;
        Ok(Self {
            rng,
            locale: options.locale,
            today: Local::now().date_naive(),
            min_age: options.min_age,
            max_age: options.max_age,
            email_suffix_max: options.email_suffix_max,
        })
    }

    /// Anchor birth dates to `today` instead of the local current date.
    pub fn anchored_at(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Inclusive bounds of the birth dates this synthesizer emits.
    pub fn birth_date_bounds(&self) -> (NaiveDate, NaiveDate) {
        let earliest = self
            .today
            .checked_sub_months(Months::new(self.max_age * 12))
            .unwrap_or(NaiveDate::MIN);
        let latest = self
            .today
            .checked_sub_months(Months::new(self.min_age * 12))
            .unwrap_or(self.today);
        (earliest, latest)
    }

    pub fn generate(&mut self, domains: &[String]) -> Result<SyntheticRecord, GenerationError> {
        let domain = domains.choose(&mut self.rng).ok_or_else(|| {
            GenerationError::InvalidOptions("email_domains must not be empty".to_string())
        })?;
        let domain = domain.clone();

        let (first_name, last_name) = self.draw_names();
        let email = self.compose_email(&first_name, &last_name, &domain);
        let parts = RecordParts {
            guid: self.draw_guid(),
            birth_date: self.draw_birth_date(),
            id_number: self.draw_id_number(),
            salt: self.draw_salt(),
            hash_key: self.draw_hash_key(),
            first_name,
            last_name,
            email,
        };
        Ok(SyntheticRecord::new(parts))
    }

    /// Regenerate the smallest sub-value behind `field`.
    ///
    /// The UID is recomputed on every rebuild, so an ID-number or salt
    /// redraw always leaves a consistent digest behind.
    pub fn redraw(&mut self, record: SyntheticRecord, field: FieldKind) -> SyntheticRecord {
        let mut parts = record.into_parts();
        match field {
            FieldKind::IdNumber => parts.id_number = self.draw_id_number(),
            FieldKind::Uid => parts.salt = self.draw_salt(),
            FieldKind::Guid => parts.guid = self.draw_guid(),
            FieldKind::Email => {
                let domain = parts
                    .email
                    .rsplit_once('@')
                    .map(|(_, domain)| domain.to_string())
                    .unwrap_or_default();
                parts.email = self.compose_email(&parts.first_name, &parts.last_name, &domain);
            }
        }
        SyntheticRecord::new(parts)
    }

    fn draw_names(&mut self) -> (String, String) {
        let (first, last): (String, String) = match self.locale {
            LocaleKey::EnUs => (
                fake::faker::name::en::FirstName().fake_with_rng(&mut self.rng),
                fake::faker::name::en::LastName().fake_with_rng(&mut self.rng),
            ),
            LocaleKey::PtBr => (
                fake::faker::name::pt_br::FirstName().fake_with_rng(&mut self.rng),
                fake::faker::name::pt_br::LastName().fake_with_rng(&mut self.rng),
            ),
        };

        let first = self.non_empty_or_fallback(first, self.locale.fallback_first_names());
        let last = self.non_empty_or_fallback(last, self.locale.fallback_last_names());
        (first, last)
    }

    fn non_empty_or_fallback(&mut self, value: String, fallback: &[&str]) -> String {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
        fallback
            .choose(&mut self.rng)
            .map(|name| name.to_string())
            .unwrap_or_else(|| "Pessoa".to_string())
    }

    fn compose_email(&mut self, first_name: &str, last_name: &str, domain: &str) -> String {
        let suffix = self.rng.random_range(1..=self.email_suffix_max);
        format!(
            "{}.{}{suffix}@{domain}",
            local_part(first_name),
            local_part(last_name)
        )
    }

    fn draw_birth_date(&mut self) -> NaiveDate {
        let (earliest, latest) = self.birth_date_bounds();
        let span = (latest - earliest).num_days().max(0);
        let offset = self.rng.random_range(0..=span);
        earliest + chrono::Duration::days(offset)
    }

    fn draw_id_number(&mut self) -> String {
        let a = self.rng.random_range(100..=999);
        let b = self.rng.random_range(100..=999);
        let c = self.rng.random_range(100..=999);
        format!("{a}-{b}-{c}")
    }

    fn draw_salt(&mut self) -> String {
        let mut bytes = [0_u8; 8];
        self.rng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    fn draw_guid(&mut self) -> String {
        let mut bytes = [0_u8; 16];
        self.rng.fill_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes)
            .into_uuid()
            .hyphenated()
            .to_string()
    }

    fn draw_hash_key(&mut self) -> String {
        let mut bytes = [0_u8; 16];
        self.rng.fill_bytes(&mut bytes);
        let token = uuid::Builder::from_random_bytes(bytes).into_uuid();
        let mut hasher = Sha256::new();
        hasher.update(token.simple().to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl<R: RngCore + CryptoRng> CandidateSource for IdentitySynthesizer<R> {
    fn candidate(&mut self, domains: &[String]) -> Result<SyntheticRecord, GenerationError> {
        self.generate(domains)
    }

    fn redraw(&mut self, record: SyntheticRecord, field: FieldKind) -> SyntheticRecord {
        IdentitySynthesizer::redraw(self, record, field)
    }
}

fn local_part(name: &str) -> String {
    let slug: String = name
        .chars()
        .flat_map(char::to_lowercase)
        .map(fold_accent)
        .filter(|ch| ch.is_ascii_alphanumeric())
        .collect();
    if slug.is_empty() {
        "user".to_string()
    } else {
        slug
    }
}

/// Map common accented Latin letters to their ASCII base letter.
fn fold_accent(ch: char) -> char {
    match ch {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}
