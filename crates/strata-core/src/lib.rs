//! Strata Core - schema catalog and migration engine.
//!
//! This crate provides the migration engine and the schema catalog it
//! mutates.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod catalog;
pub mod error;
pub mod migration;

pub use catalog::{Catalog, CollectionDef, FieldDef, FieldType, SchemaError, SchemaMutator};
pub use error::Error;
pub use migration::{
    AppliedEntry, AppliedLedger, CancelToken, Direction, LedgerError, MigrationError, MigrationId,
    MigrationRecord, MigrationRegistry, MigrationRunner, RunReport, RunnerConfig, SledLedger,
    StatusReport,
};
