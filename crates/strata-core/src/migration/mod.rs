//! Versioned, reversible schema migration engine.
//!
//! A [`MigrationRegistry`] holds the ordered set of known migrations, each an
//! identity plus paired forward/inverse actions. The [`MigrationRunner`]
//! diffs the registry against the applied-state [`ledger`](AppliedLedger),
//! executes the resulting plan one migration at a time against a
//! [`SchemaMutator`](crate::catalog::SchemaMutator), and commits the ledger
//! entry for each step immediately after its action succeeds.
//!
//! # Example
//!
//! ```ignore
//! use strata_core::catalog::Catalog;
//! use strata_core::migration::{
//!     MigrationRegistry, MigrationRunner, RunnerConfig, SledLedger,
//! };
//!
//! let registry = MigrationRegistry::build(records)?;
//! let runner = MigrationRunner::new(
//!     registry,
//!     Catalog::open(&db)?,
//!     SledLedger::open(&db)?,
//!     RunnerConfig::default(),
//! );
//! let report = runner.apply_all()?;
//! println!("applied {} migrations", report.completed.len());
//! ```

pub mod error;
pub mod ledger;
pub mod record;
pub mod registry;
pub mod runner;

pub use error::MigrationError;
pub use ledger::{current_timestamp, AppliedEntry, AppliedLedger, LedgerError, LockState, SledLedger};
pub use record::{Action, MigrationId, MigrationRecord, ParseIdError};
pub use registry::MigrationRegistry;
pub use runner::{
    CancelToken, Direction, MigrationRunner, RunReport, RunnerConfig, StatusReport,
};
