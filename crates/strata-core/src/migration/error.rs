//! Migration engine error types.

use super::ledger::LedgerError;
use super::record::MigrationId;
use crate::catalog::SchemaError;
use thiserror::Error;

/// Migration engine errors.
///
/// Run failures carry the identities that committed before the stop, so a
/// partial run is always reported alongside the terminal error.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Two registry records share a sequence number.
    #[error("duplicate migration identity: {id}")]
    DuplicateIdentity {
        /// The colliding identity.
        id: MigrationId,
    },

    /// A target identity does not exist in the registry.
    #[error("unknown migration identity: {id}")]
    UnknownIdentity {
        /// The unknown identity.
        id: MigrationId,
    },

    /// An apply action failed. Earlier steps of the run stay committed.
    #[error("migration {id} failed: {source}")]
    MigrationFailed {
        /// The migration whose apply action failed.
        id: MigrationId,
        /// The underlying schema mutation failure.
        #[source]
        source: SchemaError,
        /// Migrations committed earlier in this run, in execution order.
        completed: Vec<MigrationId>,
    },

    /// An inverse action failed during rollback.
    #[error("rollback of {id} failed: {source}")]
    RollbackFailed {
        /// The migration whose inverse action failed.
        id: MigrationId,
        /// The underlying schema mutation failure.
        #[source]
        source: SchemaError,
        /// Migrations rolled back earlier in this run, in execution order.
        completed: Vec<MigrationId>,
    },

    /// The schema change succeeded but the ledger write failed. The store and
    /// the ledger now disagree; operator reconciliation is required and the
    /// engine never retries on its own.
    #[error("schema changed for {id} but the ledger write failed: {source}")]
    InconsistentState {
        /// The migration whose ledger write failed.
        id: MigrationId,
        /// The underlying ledger failure.
        #[source]
        source: LedgerError,
        /// Migrations fully committed earlier in this run.
        completed: Vec<MigrationId>,
    },

    /// Another runner holds the ledger lease.
    #[error("a migration run is already in progress (held by {holder})")]
    RunAlreadyInProgress {
        /// The holder recorded on the lease.
        holder: String,
    },

    /// Ledger read/write failure outside the per-step commit.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl MigrationError {
    /// Identities that committed during the failed run, in execution order.
    ///
    /// Empty for errors raised before any step executed.
    pub fn completed(&self) -> &[MigrationId] {
        match self {
            MigrationError::MigrationFailed { completed, .. }
            | MigrationError::RollbackFailed { completed, .. }
            | MigrationError::InconsistentState { completed, .. } => completed,
            _ => &[],
        }
    }
}
