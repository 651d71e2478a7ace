//! Command implementations for the `strata` binary.

use crate::migrations;
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use std::path::{Path, PathBuf};
use strata_core::catalog::Catalog;
use strata_core::migration::{
    AppliedLedger, Direction, LedgerError, MigrationError, MigrationId, MigrationRunner,
    ParseIdError, RunReport, RunnerConfig, SledLedger, StatusReport,
};
use thiserror::Error;

/// Failures surfaced by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Engine failure.
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// Ledger failure outside a run.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Catalog/storage failure outside a run.
    #[error(transparent)]
    Core(#[from] strata_core::Error),

    /// A `--to` argument that is not a migration identity.
    #[error(transparent)]
    BadIdentity(#[from] ParseIdError),

    /// The store's data directory could not be opened.
    #[error("failed to open store at {path:?}: {source}")]
    Open {
        /// The data directory.
        path: PathBuf,
        /// The underlying sled error.
        source: sled::Error,
    },
}

impl CliError {
    /// Process exit code for this failure. Action failures and ledger
    /// inconsistency are distinguished so scripts can react differently.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Migration(
                MigrationError::MigrationFailed { .. } | MigrationError::RollbackFailed { .. },
            ) => 2,
            CliError::Migration(MigrationError::InconsistentState { .. }) => 3,
            _ => 1,
        }
    }
}

/// Output format for `status`.
#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum OutputFormat {
    /// Human-readable table.
    Table,
    /// Machine-readable JSON.
    Json,
}

fn open_runner(
    data: &Path,
    config: RunnerConfig,
) -> Result<MigrationRunner<Catalog, SledLedger>, CliError> {
    let db = sled::open(data).map_err(|source| CliError::Open {
        path: data.to_path_buf(),
        source,
    })?;
    let catalog = Catalog::open(&db)?;
    let ledger = SledLedger::open(&db)?;
    Ok(MigrationRunner::new(
        migrations::registry()?,
        catalog,
        ledger,
        config,
    ))
}

fn flush(runner: &MigrationRunner<Catalog, SledLedger>) -> Result<(), CliError> {
    runner.store().flush()?;
    runner.ledger().flush()?;
    Ok(())
}

fn print_report(report: &RunReport, dry_run: bool) {
    for id in &report.orphaned {
        println!("warning: applied migration {id} has no registry record");
    }

    if report.is_noop() {
        println!("nothing to do");
        return;
    }

    let verb = match report.direction {
        Direction::Up => "applied",
        Direction::Down => "rolled back",
    };

    if dry_run {
        for id in &report.planned {
            println!("would have {verb} {id}");
        }
        return;
    }

    for id in &report.completed {
        println!("{verb} {id}");
    }
    if report.cancelled {
        println!(
            "cancelled after {} of {} migrations",
            report.completed.len(),
            report.planned.len()
        );
    }
}

/// `strata up`
pub fn up(data: &Path, to: Option<&str>, dry_run: bool) -> Result<(), CliError> {
    let config = RunnerConfig {
        dry_run,
        ..RunnerConfig::default()
    };
    let mut runner = open_runner(data, config)?;

    let result = match to {
        Some(raw) => {
            let target: MigrationId = raw.parse()?;
            runner.apply_to(&target)
        }
        None => runner.apply_all(),
    };
    // Flush whatever committed, but let a run failure take precedence.
    let flushed = flush(&runner);
    let report = result?;
    flushed?;

    print_report(&report, dry_run);
    Ok(())
}

/// `strata down`
pub fn down(data: &Path, count: usize, to: Option<&str>) -> Result<(), CliError> {
    let mut runner = open_runner(data, RunnerConfig::default())?;

    let result = match to {
        Some(raw) => {
            let target: MigrationId = raw.parse()?;
            runner.rollback_to(&target)
        }
        None => runner.rollback(count),
    };
    let flushed = flush(&runner);
    let report = result?;
    flushed?;

    print_report(&report, false);
    Ok(())
}

/// `strata status`
pub fn status(data: &Path, format: OutputFormat) -> Result<(), CliError> {
    let runner = open_runner(data, RunnerConfig::default())?;
    let status = runner.status()?;

    match format {
        OutputFormat::Table => print_status_table(&status),
        OutputFormat::Json => print_status_json(&status),
    }
    Ok(())
}

fn print_status_table(status: &StatusReport) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["migration", "state", "applied at"]);

    for entry in &status.applied {
        let state = if status.orphaned.contains(&entry.id) {
            "orphaned"
        } else {
            "applied"
        };
        table.add_row(vec![
            Cell::new(&entry.id),
            Cell::new(state),
            Cell::new(entry.applied_at / 1_000_000),
        ]);
    }
    for id in &status.pending {
        table.add_row(vec![Cell::new(id), Cell::new("pending"), Cell::new("")]);
    }

    println!("{table}");
    println!(
        "{} applied, {} pending, {} orphaned",
        status.applied.len(),
        status.pending.len(),
        status.orphaned.len()
    );
}

fn print_status_json(status: &StatusReport) {
    let value = serde_json::json!({
        "applied": status
            .applied
            .iter()
            .map(|e| {
                serde_json::json!({
                    "id": e.id.to_string(),
                    "applied_at": e.applied_at,
                    "orphaned": status.orphaned.contains(&e.id),
                })
            })
            .collect::<Vec<_>>(),
        "pending": status
            .pending
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>(),
    });
    println!("{value}");
}

/// `strata unlock`
pub fn unlock(data: &Path) -> Result<(), CliError> {
    let db = sled::open(data).map_err(|source| CliError::Open {
        path: data.to_path_buf(),
        source,
    })?;
    let mut ledger = SledLedger::open(&db)?;

    match ledger.lease_holder()? {
        Some(holder) => {
            ledger.unlock()?;
            ledger.flush()?;
            println!("released run lease held by {holder}");
        }
        None => println!("no run lease held"),
    }
    Ok(())
}
