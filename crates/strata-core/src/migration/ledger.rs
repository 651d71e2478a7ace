//! Applied-state ledger: which migrations have been executed.

use super::record::MigrationId;
use super::registry::MigrationRegistry;
use rkyv::{Archive, Deserialize, Serialize};
use thiserror::Error;

/// Current time in microseconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before Unix epoch")
        .as_micros() as u64
}

/// One ledger row: a migration that is currently applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedEntry {
    /// The applied migration's identity.
    pub id: MigrationId,
    /// When the apply action completed (microseconds since epoch).
    pub applied_at: u64,
}

/// Ledger failures.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// A ledger row could not be decoded.
    #[error("corrupted ledger entry: {0}")]
    Corrupted(String),

    /// The backend refused the operation.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of a lease acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    /// The lease was acquired by this caller.
    Acquired,
    /// The lease is held by another runner.
    Held {
        /// The holder recorded on the lease.
        holder: String,
    },
}

/// Persistent ledger of applied migrations, plus the advisory run lease.
///
/// Writes are single-entry and must be atomic; the runner commits exactly one
/// entry per migration step, so no multi-entry transactions are required.
pub trait AppliedLedger {
    /// All identities currently recorded as applied, ascending.
    fn list_applied(&self) -> Result<Vec<AppliedEntry>, LedgerError>;

    /// Record an identity as applied. Idempotent: marking an identity that is
    /// already present is a no-op success.
    fn mark_applied(&mut self, id: &MigrationId, applied_at: u64) -> Result<(), LedgerError>;

    /// Remove an identity from the ledger. Idempotent: an absent identity is
    /// a no-op success.
    fn unmark_applied(&mut self, id: &MigrationId) -> Result<(), LedgerError>;

    /// Attempt to take the exclusive run lease.
    fn try_lock(&mut self, holder: &str) -> Result<LockState, LedgerError>;

    /// Release the run lease. Releasing an unheld lease is a no-op.
    fn unlock(&mut self) -> Result<(), LedgerError>;

    /// Diagnostic: true iff every applied identity exists in the registry.
    fn is_in_sync(&self, registry: &MigrationRegistry) -> Result<bool, LedgerError> {
        Ok(self
            .list_applied()?
            .iter()
            .all(|e| registry.contains(e.id.seq)))
    }
}

/// Tree name for applied entries.
const APPLIED_TREE: &str = "migrations:applied";

/// Tree name for ledger metadata (the run lease).
const META_TREE: &str = "migrations:meta";

/// Key for the run lease in the meta tree.
const LEASE_KEY: &[u8] = b"lease";

/// Stored value of an applied entry; the key is the big-endian sequence.
#[derive(Debug, Archive, Serialize, Deserialize)]
struct AppliedRow {
    slug: String,
    applied_at: u64,
}

/// Stored value of the run lease.
#[derive(Debug, Archive, Serialize, Deserialize)]
struct LeaseRow {
    holder: String,
    acquired_at: u64,
}

/// Sled-backed [`AppliedLedger`], typically living in the same database as
/// the store being migrated.
pub struct SledLedger {
    applied: sled::Tree,
    meta: sled::Tree,
}

impl SledLedger {
    /// Open or create the ledger in the given sled database.
    pub fn open(db: &sled::Db) -> Result<Self, LedgerError> {
        Ok(Self {
            applied: db.open_tree(APPLIED_TREE)?,
            meta: db.open_tree(META_TREE)?,
        })
    }

    /// The current lease holder, if any.
    pub fn lease_holder(&self) -> Result<Option<String>, LedgerError> {
        match self.meta.get(LEASE_KEY)? {
            Some(bytes) => Ok(Some(Self::decode_lease(&bytes)?.holder)),
            None => Ok(None),
        }
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), LedgerError> {
        self.applied.flush()?;
        self.meta.flush()?;
        Ok(())
    }

    fn decode_lease(bytes: &[u8]) -> Result<LeaseRow, LedgerError> {
        rkyv::from_bytes::<LeaseRow, rkyv::rancor::Error>(bytes)
            .map_err(|e| LedgerError::Corrupted(format!("lease: {e}")))
    }

    fn decode_entry(key: &[u8], value: &[u8]) -> Result<AppliedEntry, LedgerError> {
        let seq: [u8; 8] = key
            .try_into()
            .map_err(|_| LedgerError::Corrupted(format!("applied key of length {}", key.len())))?;
        let row = rkyv::from_bytes::<AppliedRow, rkyv::rancor::Error>(value)
            .map_err(|e| LedgerError::Corrupted(format!("applied row: {e}")))?;
        Ok(AppliedEntry {
            id: MigrationId::new(u64::from_be_bytes(seq), row.slug),
            applied_at: row.applied_at,
        })
    }
}

impl AppliedLedger for SledLedger {
    fn list_applied(&self) -> Result<Vec<AppliedEntry>, LedgerError> {
        let mut entries = Vec::new();
        for result in self.applied.iter() {
            let (key, value) = result?;
            entries.push(Self::decode_entry(&key, &value)?);
        }
        // Big-endian keys keep tree order equal to identity order.
        Ok(entries)
    }

    fn mark_applied(&mut self, id: &MigrationId, applied_at: u64) -> Result<(), LedgerError> {
        let key = id.seq.to_be_bytes();
        if self.applied.contains_key(key)? {
            return Ok(());
        }
        let row = AppliedRow {
            slug: id.slug.clone(),
            applied_at,
        };
        let value = rkyv::to_bytes::<rkyv::rancor::Error>(&row)
            .map_err(|e| LedgerError::Corrupted(format!("applied row: {e}")))?;
        self.applied.insert(key, value.to_vec())?;
        Ok(())
    }

    fn unmark_applied(&mut self, id: &MigrationId) -> Result<(), LedgerError> {
        self.applied.remove(id.seq.to_be_bytes())?;
        Ok(())
    }

    fn try_lock(&mut self, holder: &str) -> Result<LockState, LedgerError> {
        let row = LeaseRow {
            holder: holder.to_string(),
            acquired_at: current_timestamp(),
        };
        let value = rkyv::to_bytes::<rkyv::rancor::Error>(&row)
            .map_err(|e| LedgerError::Corrupted(format!("lease: {e}")))?;

        match self
            .meta
            .compare_and_swap(LEASE_KEY, None as Option<&[u8]>, Some(value.to_vec()))?
        {
            Ok(()) => Ok(LockState::Acquired),
            Err(cas) => {
                let holder = match cas.current {
                    Some(bytes) => Self::decode_lease(&bytes)?.holder,
                    None => String::from("unknown"),
                };
                Ok(LockState::Held { holder })
            }
        }
    }

    fn unlock(&mut self) -> Result<(), LedgerError> {
        self.meta.remove(LEASE_KEY)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    #[test]
    fn test_mark_list_unmark() {
        let db = test_db();
        let mut ledger = SledLedger::open(&db).unwrap();

        assert!(ledger.list_applied().unwrap().is_empty());

        ledger
            .mark_applied(&MigrationId::new(2, "b"), 200)
            .unwrap();
        ledger
            .mark_applied(&MigrationId::new(1, "a"), 100)
            .unwrap();

        let applied = ledger.list_applied().unwrap();
        assert_eq!(applied.len(), 2);
        // Ascending by identity regardless of insertion order.
        assert_eq!(applied[0].id.seq, 1);
        assert_eq!(applied[1].id.seq, 2);
        assert_eq!(applied[0].applied_at, 100);

        ledger.unmark_applied(&MigrationId::new(1, "a")).unwrap();
        assert_eq!(ledger.list_applied().unwrap().len(), 1);
    }

    #[test]
    fn test_mark_and_unmark_are_idempotent() {
        let db = test_db();
        let mut ledger = SledLedger::open(&db).unwrap();
        let id = MigrationId::new(1, "a");

        ledger.mark_applied(&id, 100).unwrap();
        ledger.mark_applied(&id, 999).unwrap();

        let applied = ledger.list_applied().unwrap();
        assert_eq!(applied.len(), 1);
        // The original timestamp survives a replayed mark.
        assert_eq!(applied[0].applied_at, 100);

        ledger.unmark_applied(&id).unwrap();
        ledger.unmark_applied(&id).unwrap();
        assert!(ledger.list_applied().unwrap().is_empty());
    }

    #[test]
    fn test_lease() {
        let db = test_db();
        let mut ledger = SledLedger::open(&db).unwrap();

        assert_eq!(ledger.lease_holder().unwrap(), None);
        assert_eq!(ledger.try_lock("runner-1").unwrap(), LockState::Acquired);
        assert_eq!(ledger.lease_holder().unwrap().as_deref(), Some("runner-1"));

        match ledger.try_lock("runner-2").unwrap() {
            LockState::Held { holder } => assert_eq!(holder, "runner-1"),
            LockState::Acquired => panic!("second lock should be refused"),
        }

        ledger.unlock().unwrap();
        ledger.unlock().unwrap();
        assert_eq!(ledger.try_lock("runner-2").unwrap(), LockState::Acquired);
    }

    #[test]
    fn test_is_in_sync() {
        use super::super::record::MigrationRecord;

        let db = test_db();
        let mut ledger = SledLedger::open(&db).unwrap();
        let registry = MigrationRegistry::build([MigrationRecord::new(
            MigrationId::new(1, "a"),
            |_| Ok(()),
            |_| Ok(()),
        )])
        .unwrap();

        ledger.mark_applied(&MigrationId::new(1, "a"), 100).unwrap();
        assert!(ledger.is_in_sync(&registry).unwrap());

        ledger
            .mark_applied(&MigrationId::new(9, "orphan"), 200)
            .unwrap();
        assert!(!ledger.is_in_sync(&registry).unwrap());
    }

    #[test]
    fn test_corrupted_row_reported() {
        let db = test_db();
        let ledger = SledLedger::open(&db).unwrap();

        // A row written behind the ledger's back with a malformed key.
        let tree = db.open_tree(APPLIED_TREE).unwrap();
        tree.insert(b"short", b"junk".to_vec()).unwrap();

        let err = ledger.list_applied().unwrap_err();
        assert!(matches!(err, LedgerError::Corrupted(_)));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = sled::Config::new().path(dir.path());

        {
            let db = config.clone().open().unwrap();
            let mut ledger = SledLedger::open(&db).unwrap();
            ledger
                .mark_applied(&MigrationId::new(7, "persisted"), 700)
                .unwrap();
            ledger.flush().unwrap();
        }

        {
            let db = config.open().unwrap();
            let ledger = SledLedger::open(&db).unwrap();
            let applied = ledger.list_applied().unwrap();
            assert_eq!(applied.len(), 1);
            assert_eq!(applied[0].id, MigrationId::new(7, "persisted"));
        }
    }
}
