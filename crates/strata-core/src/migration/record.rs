//! Migration identities and records.

use crate::catalog::{SchemaError, SchemaMutator};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identity of one migration.
///
/// The sequence number alone defines both ordering and identity; it is
/// conventionally derived from the timestamp the migration was authored. The
/// slug is descriptive and only breaks display ties.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MigrationId {
    /// Ordering and identity key.
    pub seq: u64,
    /// Human-readable description.
    pub slug: String,
}

impl MigrationId {
    /// Create a new identity.
    pub fn new(seq: u64, slug: impl Into<String>) -> Self {
        Self {
            seq,
            slug: slug.into(),
        }
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.seq, self.slug)
    }
}

/// Error parsing a migration identity from its `<seq>_<slug>` form.
#[derive(Debug, Error)]
#[error("invalid migration identity {input:?}: expected <seq>_<slug>")]
pub struct ParseIdError {
    /// The rejected input.
    pub input: String,
}

impl FromStr for MigrationId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let reject = || ParseIdError {
            input: s.to_string(),
        };
        let (seq, slug) = s.split_once('_').ok_or_else(reject)?;
        if slug.is_empty() {
            return Err(reject());
        }
        let seq = seq.parse::<u64>().map_err(|_| reject())?;
        Ok(MigrationId::new(seq, slug))
    }
}

/// One unit of schema work: given the mutation handle, either succeeds or
/// fails with a descriptive error.
pub type Action = Box<dyn Fn(&mut dyn SchemaMutator) -> Result<(), SchemaError> + Send + Sync>;

/// An immutable descriptor of one schema change: identity, an apply action,
/// and its inverse.
pub struct MigrationRecord {
    id: MigrationId,
    up: Action,
    down: Action,
}

impl MigrationRecord {
    /// Create a new record from an identity and its paired actions.
    pub fn new<U, D>(id: MigrationId, up: U, down: D) -> Self
    where
        U: Fn(&mut dyn SchemaMutator) -> Result<(), SchemaError> + Send + Sync + 'static,
        D: Fn(&mut dyn SchemaMutator) -> Result<(), SchemaError> + Send + Sync + 'static,
    {
        Self {
            id,
            up: Box::new(up),
            down: Box::new(down),
        }
    }

    /// The record's identity.
    pub fn id(&self) -> &MigrationId {
        &self.id
    }

    /// Run the apply action against the given store.
    pub fn up(&self, store: &mut dyn SchemaMutator) -> Result<(), SchemaError> {
        (self.up)(store)
    }

    /// Run the inverse action against the given store.
    pub fn down(&self, store: &mut dyn SchemaMutator) -> Result<(), SchemaError> {
        (self.down)(store)
    }
}

impl fmt::Debug for MigrationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationRecord")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ordering() {
        let a = MigrationId::new(1740324151, "create_ingredients");
        let b = MigrationId::new(1740324512, "add_name_de");
        assert!(a < b);

        // Order is by sequence, not slug.
        let c = MigrationId::new(1, "zzz");
        let d = MigrationId::new(2, "aaa");
        assert!(c < d);
    }

    #[test]
    fn test_display_parse_round_trip() {
        let id = MigrationId::new(1740324151, "create_ingredients");
        assert_eq!(id.to_string(), "1740324151_create_ingredients");

        let parsed: MigrationId = "1740324151_create_ingredients".parse().unwrap();
        assert_eq!(parsed, id);

        // Slugs may themselves contain underscores.
        let parsed: MigrationId = "5_a_b_c".parse().unwrap();
        assert_eq!(parsed.seq, 5);
        assert_eq!(parsed.slug, "a_b_c");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("no-underscore".parse::<MigrationId>().is_err());
        assert!("abc_slug".parse::<MigrationId>().is_err());
        assert!("123_".parse::<MigrationId>().is_err());
        assert!("".parse::<MigrationId>().is_err());
    }

    #[test]
    fn test_record_runs_actions() {
        use crate::catalog::{Catalog, CollectionDef};

        let db = sled::Config::new().temporary(true).open().unwrap();
        let mut catalog = Catalog::open(&db).unwrap();

        let record = MigrationRecord::new(
            MigrationId::new(1, "create_measurements"),
            |store| store.create_collection(CollectionDef::new("measurements")),
            |store| store.drop_collection("measurements"),
        );

        record.up(&mut catalog).unwrap();
        assert!(catalog.get_collection("measurements").is_some());

        record.down(&mut catalog).unwrap();
        assert!(catalog.get_collection("measurements").is_none());
    }
}
