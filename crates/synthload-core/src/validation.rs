use std::collections::{BTreeMap, HashSet};

use crate::error::{Error, Result};
use crate::record::{FieldKind, SyntheticRecord};

/// `DDD-DDD-DDD` with every group in [100, 999].
pub fn is_valid_id_number(value: &str) -> bool {
    let groups: Vec<&str> = value.split('-').collect();
    groups.len() == 3
        && groups.iter().all(|group| {
            group.len() == 3
                && group.bytes().all(|b| b.is_ascii_digit())
                && !group.starts_with('0')
        })
}

/// Validate the format invariants of a single record.
///
/// This checks:
/// - non-empty names
/// - `DDD-DDD-DDD` ID number with every group in [100, 999]
/// - hex lengths of UID, salt and hash key
/// - canonical UUID v4 GUID
/// - `local@domain` email
/// - UID equals the digest of the record's own fields
pub fn validate_record(record: &SyntheticRecord) -> Result<()> {
    if record.first_name().trim().is_empty() || record.last_name().trim().is_empty() {
        return Err(Error::InvalidRecord(format!(
            "record {} has an empty name",
            record.guid()
        )));
    }

    if !is_valid_id_number(record.id_number()) {
        return Err(Error::InvalidRecord(format!(
            "id number '{}' does not match DDD-DDD-DDD",
            record.id_number()
        )));
    }

    check_hex("uid", record.uid(), 64)?;
    check_hex("salt", record.salt(), 16)?;
    check_hex("hash_key", record.hash_key(), 64)?;

    match uuid::Uuid::parse_str(record.guid()) {
        Ok(parsed)
            if parsed.get_version_num() == 4
                && parsed.hyphenated().to_string() == record.guid() => {}
        _ => {
            return Err(Error::InvalidRecord(format!(
                "guid '{}' is not a canonical UUID v4",
                record.guid()
            )));
        }
    }

    let valid_email = record
        .email()
        .split_once('@')
        .is_some_and(|(local, domain)| {
            !local.is_empty() && !domain.is_empty() && !domain.contains('@')
        });
    if !valid_email {
        return Err(Error::InvalidRecord(format!(
            "email '{}' is not of the form local@domain",
            record.email()
        )));
    }

    if record.expected_uid() != record.uid() {
        return Err(Error::InvalidRecord(format!(
            "uid of record {} does not match its fields",
            record.guid()
        )));
    }

    Ok(())
}

/// Validate every record and reject duplicate constrained values within the batch.
pub fn validate_batch(records: &[SyntheticRecord]) -> Result<()> {
    let mut seen: BTreeMap<FieldKind, HashSet<&str>> = BTreeMap::new();
    for record in records {
        validate_record(record)?;
        for field in FieldKind::CHECK_ORDER {
            let value = record.value(field);
            if !seen.entry(field).or_default().insert(value) {
                return Err(Error::InvalidRecord(format!(
                    "duplicate {field} '{value}' within batch"
                )));
            }
        }
    }
    Ok(())
}

fn check_hex(name: &str, value: &str, len: usize) -> Result<()> {
    let is_lower_hex = value
        .chars()
        .all(|ch| ch.is_ascii_digit() || ('a'..='f').contains(&ch));
    if value.len() != len || !is_lower_hex {
        return Err(Error::InvalidRecord(format!(
            "{name} must be {len} lowercase hex characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::record::RecordParts;

    fn record(id_number: &str, email: &str) -> SyntheticRecord {
        SyntheticRecord::new(RecordParts {
            guid: "9f1c2a4e-7b3d-4e8f-a1b2-c3d4e5f60718".to_string(),
            first_name: "Grace".to_string(),
            last_name: "Hopper".to_string(),
            email: email.to_string(),
            birth_date: NaiveDate::from_ymd_opt(1980, 1, 1).unwrap_or_default(),
            id_number: id_number.to_string(),
            salt: "0123456789abcdef".to_string(),
            hash_key: "cd".repeat(32),
        })
    }

    #[test]
    fn accepts_well_formed_record() {
        assert!(validate_record(&record("100-555-999", "grace.hopper3@example.org")).is_ok());
    }

    #[test]
    fn rejects_leading_zero_groups() {
        let result = validate_record(&record("012-555-999", "grace.hopper3@example.org"));
        assert!(matches!(result, Err(Error::InvalidRecord(_))));
    }

    #[test]
    fn rejects_email_without_domain() {
        let result = validate_record(&record("100-555-999", "grace.hopper3@"));
        assert!(matches!(result, Err(Error::InvalidRecord(_))));
    }

    #[test]
    fn batch_rejects_duplicate_constrained_values() {
        let first = record("100-555-999", "grace.hopper3@example.org");
        let second = first.clone();
        let result = validate_batch(&[first, second]);
        assert!(matches!(result, Err(Error::InvalidRecord(msg)) if msg.contains("duplicate")));
    }
}
