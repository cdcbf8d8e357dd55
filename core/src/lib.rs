//! Versioned policyholder records and feature flags
//!
//! Two subsystems over one SQLite database:
//! - the versioned record store, which keeps every historical version of a
//!   policyholder's record alongside an audit snapshot and an event log
//! - the feature flag engine, which serves flag evaluations from an in-memory
//!   cache that is refreshed on demand
//!
//! Thin controllers sit on top of both and validate caller input.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod controller;
pub mod db;
pub mod errors;
pub mod flags;
pub mod models;
pub mod records;

use std::sync::Arc;

pub use config::TimetravelConfig;
pub use controller::{FlagController, FlagEvaluator, RecordController, RequestContext};
pub use db::Database;
pub use errors::{ErrorKind, Result, TimetravelError};
pub use flags::{
    EvaluationRecorder, FlagEngine, FlagEvaluationCounters, FlagSource, NoopRecorder,
    ROLLOUT_HASH_VERSION, SqliteFlagSource,
};
pub use models::{
    AuditEntry, EventAction, EventLogEntry, EventType, FeatureFlag, NewPolicyholder, Policyholder,
    Record, RecordData, RecordPatch,
};
pub use records::{RecordStore, RecordStoreOptions, SqliteRecordStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fully wired services over one database
///
/// Owns the pool, the record store, the flag engine and the controllers. Every
/// instance is independent; nothing is process-global.
pub struct Timetravel {
    db: Database,
    store: Arc<SqliteRecordStore>,
    flag_source: Arc<SqliteFlagSource>,
    flags: Arc<FlagEngine>,
    counters: Arc<FlagEvaluationCounters>,
    records: RecordController,
    flag_controller: FlagController,
}

impl Timetravel {
    /// Open the configured database, migrate if asked to, and load flags
    pub fn open(cfg: &TimetravelConfig) -> Result<Self> {
        cfg.validate()?;
        let db = Database::open(&cfg.database)?;

        if cfg.migrations.run_on_startup {
            let applied = match &cfg.migrations.dir {
                Some(dir) => db.migrate_from_dir(dir)?,
                None => db.migrate()?,
            };
            if !applied.is_empty() {
                tracing::info!(count = applied.len(), "schema migrations applied");
            }
        }

        Self::from_database(db, cfg)
    }

    /// Wire services over an already-opened (and migrated) database
    pub fn from_database(db: Database, cfg: &TimetravelConfig) -> Result<Self> {
        let store = Arc::new(SqliteRecordStore::with_options(
            db.clone(),
            RecordStoreOptions {
                log_reads: cfg.records.log_reads,
            },
        ));
        let flag_source = Arc::new(SqliteFlagSource::new(db.clone()));
        let counters = Arc::new(FlagEvaluationCounters::new()?);
        let flags = Arc::new(FlagEngine::with_recorder(
            Arc::clone(&flag_source) as Arc<dyn FlagSource>,
            Arc::clone(&counters) as Arc<dyn EvaluationRecorder>,
        )?);

        let records = RecordController::new(Arc::clone(&store) as Arc<dyn RecordStore>);
        let flag_controller = FlagController::new(Arc::clone(&flags) as Arc<dyn FlagEvaluator>);

        tracing::debug!(version = VERSION, "timetravel services ready");

        Ok(Self {
            db,
            store,
            flag_source,
            flags,
            counters,
            records,
            flag_controller,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Direct store access for audit and event-log reads
    pub fn store(&self) -> &SqliteRecordStore {
        &self.store
    }

    pub fn flag_source(&self) -> &SqliteFlagSource {
        &self.flag_source
    }

    pub fn flag_engine(&self) -> &FlagEngine {
        &self.flags
    }

    pub fn evaluation_counters(&self) -> &FlagEvaluationCounters {
        &self.counters
    }

    pub fn records(&self) -> &RecordController {
        &self.records
    }

    pub fn flags(&self) -> &FlagController {
        &self.flag_controller
    }
}

impl std::fmt::Debug for Timetravel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timetravel")
            .field("db", &self.db)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}
