//! Schema migrations
//!
//! Forward-only SQL files, applied in lexical filename order and recorded in
//! the `schema_migrations` ledger. A filename already in the ledger is never
//! applied again.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::path::Path;

use super::transactions::execute_in_transaction;
use crate::errors::{Result, TimetravelError};

const LEDGER_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// Migrations shipped with the crate
const EMBEDDED: &[(&str, &str)] = &[
    (
        "0001_create_records.sql",
        include_str!("../../migrations/0001_create_records.sql"),
    ),
    (
        "0002_create_feature_flags.sql",
        include_str!("../../migrations/0002_create_feature_flags.sql"),
    ),
];

/// One migration file: its ledger key and its SQL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub name: String,
    pub sql: String,
}

impl Migration {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }
}

/// The embedded migration set, in application order
pub fn embedded() -> Vec<Migration> {
    EMBEDDED
        .iter()
        .map(|(name, sql)| Migration::new(*name, *sql))
        .collect()
}

/// Apply the migrations embedded in this crate
pub fn migrate_embedded(conn: &mut Connection) -> Result<Vec<String>> {
    apply_migrations(conn, &embedded())
}

/// Apply every `*.sql` file in `dir`
pub fn migrate_dir(conn: &mut Connection, dir: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        TimetravelError::storage_with_source(
            format!("failed to read migrations dir {}", dir.display()),
            e,
        )
    })?;

    let mut migrations = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            TimetravelError::storage_with_source("failed to read migrations dir entry", e)
        })?;
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            tracing::warn!(path = %path.display(), "skipping migration with non UTF-8 name");
            continue;
        };
        let sql = std::fs::read_to_string(&path).map_err(|e| {
            TimetravelError::storage_with_source(format!("failed to read migration {name}"), e)
        })?;
        migrations.push(Migration::new(name, sql));
    }

    apply_migrations(conn, &migrations)
}

/// Apply `migrations` in lexical name order, skipping those already recorded
///
/// Each migration and its ledger row commit in one transaction. Returns the
/// names applied by this call.
pub fn apply_migrations(conn: &mut Connection, migrations: &[Migration]) -> Result<Vec<String>> {
    conn.execute_batch(LEDGER_SQL)
        .map_err(|e| TimetravelError::storage_with_source("failed to create schema_migrations", e))?;

    let mut ordered: Vec<&Migration> = migrations.iter().collect();
    ordered.sort_by(|a, b| a.name.cmp(&b.name));

    let mut applied = Vec::new();
    for migration in ordered {
        let newly_applied =
            execute_in_transaction(conn, TransactionBehavior::Immediate, |tx| {
                let exists = tx
                    .query_row(
                        "SELECT 1 FROM schema_migrations WHERE version = ?1",
                        params![migration.name],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                if exists {
                    return Ok(false);
                }

                tx.execute_batch(&migration.sql).map_err(|e| {
                    TimetravelError::storage_with_source(
                        format!("failed to execute migration {}", migration.name),
                        e,
                    )
                })?;
                tx.execute(
                    "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                    params![migration.name, Utc::now().to_rfc3339()],
                )?;
                Ok::<_, TimetravelError>(true)
            })?;

        if newly_applied {
            tracing::info!(migration = %migration.name, "applied migration");
            applied.push(migration.name.clone());
        } else {
            tracing::debug!(migration = %migration.name, "migration already applied");
        }
    }

    Ok(applied)
}

/// Names recorded in the ledger, in application order
pub fn applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    conn.execute_batch(LEDGER_SQL)?;
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}
