//! Strata migration runner.
//!
//! Applies, rolls back, and reports on the schema migrations of a strata
//! store.

mod commands;
mod migrations;

use clap::{Parser, Subcommand};
use commands::OutputFormat;
use std::path::PathBuf;

/// Strata migration runner
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(version, about = "Schema migration runner for Strata stores")]
struct Args {
    /// Path to the store's data directory
    #[arg(short, long, default_value = "./data")]
    data: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending migrations in order
    Up {
        /// Stop after this identity (inclusive), e.g. 1740324512_create_ingredients
        #[arg(long)]
        to: Option<String>,

        /// Print the plan without executing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Roll back applied migrations, newest first
    Down {
        /// Number of migrations to roll back
        #[arg(default_value_t = 1, conflicts_with = "to")]
        count: usize,

        /// Roll back everything applied after this identity
        #[arg(long)]
        to: Option<String>,
    },

    /// Show applied, pending, and orphaned migrations
    Status {
        /// Output format
        #[arg(long, default_value = "table", value_enum)]
        format: OutputFormat,
    },

    /// Release a stale run lease left behind by a dead runner
    Unlock,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("strata_cli=info".parse().unwrap())
                .add_directive("strata_core=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let result = match &args.command {
        Command::Up { to, dry_run } => commands::up(&args.data, to.as_deref(), *dry_run),
        Command::Down { count, to } => commands::down(&args.data, *count, to.as_deref()),
        Command::Status { format } => commands::status(&args.data, *format),
        Command::Unlock => commands::unlock(&args.data),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        if let commands::CliError::Migration(migration) = &e {
            for id in migration.completed() {
                eprintln!("note: {id} completed before the stop");
            }
        }
        std::process::exit(e.exit_code());
    }
}
