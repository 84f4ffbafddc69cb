use std::collections::HashSet;

use synthload_core::FieldKind;

/// Values already assigned to each uniqueness-constrained field in one run.
///
/// Owned by a single batch sequence and dropped with it; nothing here is
/// shared across runs or processes.
#[derive(Debug, Default)]
pub struct UniquenessRegistry {
    id_numbers: HashSet<String>,
    uids: HashSet<String>,
    guids: HashSet<String>,
    emails: HashSet<String>,
}

impl UniquenessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` for `field` if it has not been seen.
    ///
    /// Returns false and leaves the registry untouched when the value is
    /// already present.
    pub fn try_reserve(&mut self, field: FieldKind, value: &str) -> bool {
        let set = self.set_mut(field);
        if set.contains(value) {
            return false;
        }
        set.insert(value.to_string())
    }

    /// Drop a reservation made for a candidate that was later discarded.
    pub fn release(&mut self, field: FieldKind, value: &str) -> bool {
        self.set_mut(field).remove(value)
    }

    pub fn contains(&self, field: FieldKind, value: &str) -> bool {
        self.set(field).contains(value)
    }

    pub fn len(&self, field: FieldKind) -> usize {
        self.set(field).len()
    }

    pub fn is_empty(&self) -> bool {
        FieldKind::CHECK_ORDER
            .iter()
            .all(|field| self.set(*field).is_empty())
    }

    fn set(&self, field: FieldKind) -> &HashSet<String> {
        match field {
            FieldKind::IdNumber => &self.id_numbers,
            FieldKind::Uid => &self.uids,
            FieldKind::Guid => &self.guids,
            FieldKind::Email => &self.emails,
        }
    }

    fn set_mut(&mut self, field: FieldKind) -> &mut HashSet<String> {
        match field {
            FieldKind::IdNumber => &mut self.id_numbers,
            FieldKind::Uid => &mut self.uids,
            FieldKind::Guid => &mut self.guids,
            FieldKind::Email => &mut self.emails,
        }
    }
}
