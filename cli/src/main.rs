//! `timetravel` entry point.
//!
//! Operator command line over the versioned record store and the flag engine.
//! Results are printed to stdout as pretty JSON; logs go to stderr and are
//! filtered with `RUST_LOG` (default `info`).

mod flag_cmd;
mod output;
mod record_cmd;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use timetravel_core::{Database, Timetravel, TimetravelConfig, TimetravelError};

use crate::flag_cmd::FlagCommand;
use crate::record_cmd::RecordCommand;

/// Versioned policyholder records and feature flags
#[derive(Debug, Parser)]
#[command(name = "timetravel", version)]
struct Cli {
    /// Config file (default: $TIMETRAVEL_CONFIG, then ~/.config/timetravel/timetravel.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Database file, overriding `database.path`
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending schema migrations
    Migrate(MigrateArgs),

    /// Read and write policyholder records
    #[command(subcommand)]
    Record(RecordCommand),

    /// Inspect and change feature flags
    #[command(subcommand)]
    Flag(FlagCommand),
}

#[derive(Debug, clap::Args)]
struct MigrateArgs {
    /// Directory of `*.sql` files (default: `migrations.dir`, then the built-in set)
    #[arg(long, value_name = "DIR")]
    dir: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> anyhow::Result<TimetravelConfig> {
    let mut cfg = match &cli.config {
        Some(path) => TimetravelConfig::load_from_path(path)?,
        None => TimetravelConfig::load()?,
    };
    if let Some(db) = &cli.db {
        cfg.database.path = db.to_string_lossy().into_owned();
    }
    cfg.validate()?;
    Ok(cfg)
}

fn run_migrate(cfg: &TimetravelConfig, args: &MigrateArgs) -> anyhow::Result<()> {
    let db = Database::open(&cfg.database)?;
    let applied = match args.dir.as_ref().or(cfg.migrations.dir.as_ref()) {
        Some(dir) => db
            .migrate_from_dir(dir)
            .with_context(|| format!("migrating from {}", dir.display()))?,
        None => db.migrate()?,
    };
    tracing::info!(count = applied.len(), "migrations complete");
    output::print_json(&serde_json::json!({ "applied": applied }))
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = load_config(&cli)?;

    match cli.command {
        Command::Migrate(args) => run_migrate(&cfg, &args),
        Command::Record(command) => {
            let app = Timetravel::open(&cfg).context("opening record store")?;
            record_cmd::run(&app, command)
        }
        Command::Flag(command) => {
            let app = Timetravel::open(&cfg).context("opening flag engine")?;
            flag_cmd::run(&app, command)
        }
    }
}

/// Exit 2 for "does not exist", 1 for everything else.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<TimetravelError>() {
        Some(e) if e.is_not_found() => 2,
        _ => 1,
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_db_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["timetravel", "record", "get", "7", "--db", "/tmp/x.db"])
            .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
    }

    #[test]
    fn test_not_found_exit_code() {
        let err = anyhow::Error::new(TimetravelError::not_found(3));
        assert_eq!(exit_code_for(&err), 2);
        let err = anyhow::Error::new(TimetravelError::storage("disk full"));
        assert_eq!(exit_code_for(&err), 1);
    }
}
