//! Ordered, deduplicated collection of migration records.

use super::error::MigrationError;
use super::record::{MigrationId, MigrationRecord};

/// The full set of known migrations, sorted ascending by identity.
///
/// Ordering comes from the identities alone, never from registration order.
/// Read-only after construction; safe to share across concurrent readers.
#[derive(Debug)]
pub struct MigrationRegistry {
    records: Vec<MigrationRecord>,
}

impl MigrationRegistry {
    /// Build a registry from an unordered set of records.
    ///
    /// Sorts by identity and rejects duplicate sequence numbers with
    /// [`MigrationError::DuplicateIdentity`]; slugs do not disambiguate.
    pub fn build(
        records: impl IntoIterator<Item = MigrationRecord>,
    ) -> Result<Self, MigrationError> {
        let mut records: Vec<_> = records.into_iter().collect();
        records.sort_by(|a, b| a.id().cmp(b.id()));

        for pair in records.windows(2) {
            if pair[0].id().seq == pair[1].id().seq {
                return Err(MigrationError::DuplicateIdentity {
                    id: pair[1].id().clone(),
                });
            }
        }

        Ok(Self { records })
    }

    /// All records, ascending by identity.
    pub fn all(&self) -> &[MigrationRecord] {
        &self.records
    }

    /// Records with identity strictly greater than `id`.
    pub fn after(&self, id: &MigrationId) -> &[MigrationRecord] {
        let idx = self.records.partition_point(|r| r.id().seq <= id.seq);
        &self.records[idx..]
    }

    /// Records with identity less than or equal to `id`.
    pub fn up_to(&self, id: &MigrationId) -> &[MigrationRecord] {
        let idx = self.records.partition_point(|r| r.id().seq <= id.seq);
        &self.records[..idx]
    }

    /// Look up a record by sequence number (the identity key).
    pub fn get(&self, seq: u64) -> Option<&MigrationRecord> {
        self.records
            .binary_search_by(|r| r.id().seq.cmp(&seq))
            .ok()
            .map(|idx| &self.records[idx])
    }

    /// Check whether a sequence number is registered.
    pub fn contains(&self, seq: u64) -> bool {
        self.get(seq).is_some()
    }

    /// Number of registered migrations.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
