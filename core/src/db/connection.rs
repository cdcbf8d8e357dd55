//! Connection pooling and pragma configuration

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

use super::SqlitePool;
use crate::config::DatabaseConfig;
use crate::errors::{Result, TimetravelError};

/// Initialize a connection pool with the pragmas every connection needs
///
/// - WAL mode so readers never wait on the single writer
/// - Foreign key enforcement (cascade deletes from records to history)
/// - Busy timeout so concurrent writers queue on the write lock
pub fn initialize_pool(db_path: &Path, cfg: &DatabaseConfig) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            TimetravelError::storage_with_source(
                format!("failed to create db directory: {}", parent.display()),
                e,
            )
        })?;
    }

    let busy_timeout = cfg.busy_timeout();
    let manager =
        SqliteConnectionManager::file(db_path).with_init(move |c| apply_pragmas(c, busy_timeout));

    let pool = r2d2::Pool::builder()
        .max_size(cfg.pool_size)
        .connection_timeout(cfg.connection_timeout())
        .build(manager)
        .map_err(|e| {
            TimetravelError::storage_with_source(
                format!("failed to open db at {}", db_path.display()),
                e,
            )
        })?;

    verify_pragmas(&*pool.get()?)?;

    tracing::debug!(
        path = %db_path.display(),
        pool_size = cfg.pool_size,
        "connection pool initialized"
    );

    Ok(pool)
}

fn apply_pragmas(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update(None, "foreign_keys", true)?;
    // In-memory databases report "memory" and stay that way.
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "cache_size", -32000)?;
    Ok(())
}

fn verify_pragmas(conn: &Connection) -> Result<()> {
    let foreign_keys: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
    if foreign_keys != 1 {
        return Err(TimetravelError::storage("foreign key enforcement is disabled"));
    }
    Ok(())
}

/// Handle to the durable table set
///
/// Cheap to clone; the record store and the flag source share one pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database described by `cfg`
    pub fn open(cfg: &DatabaseConfig) -> Result<Self> {
        let path = cfg.resolved_path();
        Self::open_at_path(&path, cfg)
    }

    pub fn open_at_path(path: &Path, cfg: &DatabaseConfig) -> Result<Self> {
        Ok(Self {
            pool: initialize_pool(path, cfg)?,
        })
    }

    /// Single-connection in-memory database (for testing)
    ///
    /// Each pooled connection to `:memory:` would be its own database, so the
    /// pool is capped at one connection.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|c| apply_pragmas(c, Duration::from_millis(0)));
        let pool = r2d2::Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)
            .map_err(|e| TimetravelError::storage_with_source("failed to open in-memory db", e))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check out a connection from the pool
    pub fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Apply the migrations embedded in this crate
    pub fn migrate(&self) -> Result<Vec<String>> {
        let mut conn = self.conn()?;
        super::migrations::migrate_embedded(&mut conn)
    }

    /// Apply `*.sql` files from a directory
    pub fn migrate_from_dir(&self, dir: &Path) -> Result<Vec<String>> {
        let mut conn = self.conn()?;
        super::migrations::migrate_dir(&mut conn, dir)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("max_size", &self.pool.max_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config() -> DatabaseConfig {
        DatabaseConfig {
            pool_size: 4,
            ..DatabaseConfig::default()
        }
    }

    #[test]
    fn test_pool_initialization() {
        let temp_dir = TempDir::new().unwrap();
        let pool = initialize_pool(&temp_dir.path().join("test.db"), &test_config()).unwrap();
        assert_eq!(pool.max_size(), 4);
    }

    #[test]
    fn test_creates_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("dir").join("test.db");
        initialize_pool(&db_path, &test_config()).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_pragmas_applied() {
        let temp_dir = TempDir::new().unwrap();
        let pool = initialize_pool(&temp_dir.path().join("test.db"), &test_config()).unwrap();
        let conn = pool.get().unwrap();

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(journal_mode, "wal");

        let foreign_keys: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(foreign_keys, 1);

        let busy_timeout: i32 = conn
            .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
            .unwrap();
        assert_eq!(busy_timeout, 5000);

        let cache_size: i32 = conn
            .query_row("PRAGMA cache_size", [], |row| row.get(0))
            .unwrap();
        assert_eq!(cache_size, -32000);
    }

    #[test]
    fn test_in_memory_database_shares_one_connection() {
        let db = Database::open_in_memory().unwrap();
        {
            let conn = db.conn().unwrap();
            conn.execute("CREATE TABLE t (id INTEGER)", []).unwrap();
        }
        let conn = db.conn().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='t'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
