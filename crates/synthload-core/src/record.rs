use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Record fields that must be unique within a generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    IdNumber,
    Uid,
    Guid,
    Email,
}

impl FieldKind {
    /// Order in which a candidate's fields are reserved.
    ///
    /// `IdNumber` comes before `Uid` since the UID digest covers the ID number;
    /// checking the UID first would reserve a value that a later ID redraw
    /// makes stale.
    pub const CHECK_ORDER: [FieldKind; 4] = [
        FieldKind::IdNumber,
        FieldKind::Uid,
        FieldKind::Guid,
        FieldKind::Email,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::IdNumber => "id_number",
            Self::Uid => "uid",
            Self::Guid => "guid",
            Self::Email => "email",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Independent inputs of a record. The UID is derived from these, never supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordParts {
    pub guid: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub birth_date: NaiveDate,
    pub id_number: String,
    pub salt: String,
    pub hash_key: String,
}

/// One synthetic personal record.
///
/// Fields are read-only once built. Changing a sub-value means going back
/// through [`SyntheticRecord::into_parts`] and [`SyntheticRecord::new`],
/// which recomputes the UID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyntheticRecord {
    uid: String,
    guid: String,
    first_name: String,
    last_name: String,
    email: String,
    birth_date: NaiveDate,
    id_number: String,
    salt: String,
    hash_key: String,
}

impl SyntheticRecord {
    pub fn new(parts: RecordParts) -> Self {
        let uid = uid_digest(
            &parts.first_name,
            &parts.last_name,
            &parts.id_number,
            &parts.salt,
        );
        Self {
            uid,
            guid: parts.guid,
            first_name: parts.first_name,
            last_name: parts.last_name,
            email: parts.email,
            birth_date: parts.birth_date,
            id_number: parts.id_number,
            salt: parts.salt,
            hash_key: parts.hash_key,
        }
    }

    pub fn into_parts(self) -> RecordParts {
        RecordParts {
            guid: self.guid,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            birth_date: self.birth_date,
            id_number: self.id_number,
            salt: self.salt,
            hash_key: self.hash_key,
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn birth_date(&self) -> NaiveDate {
        self.birth_date
    }

    pub fn id_number(&self) -> &str {
        &self.id_number
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    pub fn hash_key(&self) -> &str {
        &self.hash_key
    }

    /// Value of a uniqueness-constrained field.
    pub fn value(&self, field: FieldKind) -> &str {
        match field {
            FieldKind::IdNumber => &self.id_number,
            FieldKind::Uid => &self.uid,
            FieldKind::Guid => &self.guid,
            FieldKind::Email => &self.email,
        }
    }

    /// Recompute the UID digest from the stored fields.
    pub fn expected_uid(&self) -> String {
        uid_digest(&self.first_name, &self.last_name, &self.id_number, &self.salt)
    }

    /// Values in [`crate::RECORD_COLUMNS`] order, dates as `YYYY-MM-DD`.
    pub fn to_row(&self) -> [String; 9] {
        [
            self.uid.clone(),
            self.guid.clone(),
            self.first_name.clone(),
            self.last_name.clone(),
            self.email.clone(),
            self.birth_date.format("%Y-%m-%d").to_string(),
            self.id_number.clone(),
            self.salt.clone(),
            self.hash_key.clone(),
        ]
    }
}

/// SHA-256 over `first + last + id_number + salt`, lowercase hex.
pub fn uid_digest(first_name: &str, last_name: &str, id_number: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(first_name.as_bytes());
    hasher.update(last_name.as_bytes());
    hasher.update(id_number.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}
