//! Versioned record store
//!
//! Every mutation runs in one `IMMEDIATE` transaction that:
//! 1. ensures the policyholder row exists,
//! 2. reads the current record (if any),
//! 3. writes version 1 or `current + 1` with a compare-and-swap on `version`,
//! 4. appends the audit snapshot for that version and one event-log row.
//!
//! The current version, the audit trail and the event log therefore never
//! disagree. Concurrent writers for the same policyholder queue on SQLite's
//! write lock (busy timeout), and the `UNIQUE (record_id, version)` constraint
//! on `audit_history` rejects any duplicate that slipped past both.

use chrono::{SubsecRound, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};

use crate::db::{Database, execute_in_transaction};
use crate::errors::{Result, TimetravelError};
use crate::models::{
    AuditEntry, EventAction, EventLogEntry, EventType, NewPolicyholder, Policyholder, Record,
    RecordData, RecordPatch, format_timestamp, parse_timestamp,
};

/// Operations the controllers need from a record store
pub trait RecordStore: Send + Sync {
    /// Current record for a policyholder
    fn get(&self, policyholder_id: i64) -> Result<Record>;

    /// Write `data` as the next version (version 1 when no record exists)
    fn create_or_update(&self, policyholder_id: i64, data: RecordData) -> Result<Record>;

    /// Resolve `patch` against the current payload and write the result as the
    /// next version, inside the same transaction as the read
    fn update_fields(&self, policyholder_id: i64, patch: &RecordPatch) -> Result<Record>;

    /// Payload exactly as it was after the given version was written
    fn get_version(&self, policyholder_id: i64, version: i64) -> Result<RecordData>;

    /// Every version written for the policyholder's record, ascending
    fn list_versions(&self, policyholder_id: i64) -> Result<Vec<i64>>;
}

#[derive(Debug, Clone, Default)]
pub struct RecordStoreOptions {
    /// Append a `read` event-log row on every successful `get`
    pub log_reads: bool,
}

/// SQLite-backed [`RecordStore`]
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    db: Database,
    options: RecordStoreOptions,
}

fn ensure_valid_id(policyholder_id: i64) -> Result<()> {
    if policyholder_id <= 0 {
        return Err(TimetravelError::InvalidIdentifier {
            id: policyholder_id,
        });
    }
    Ok(())
}

fn parse_data(idx: usize, raw: &str) -> rusqlite::Result<RecordData> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn record_from_row(policyholder_id: i64, row: &Row<'_>) -> rusqlite::Result<Record> {
    Ok(Record {
        record_id: row.get(0)?,
        policyholder_id,
        data: parse_data(1, &row.get::<_, String>(1)?)?,
        version: row.get(2)?,
        created_at: parse_timestamp(3, &row.get::<_, String>(3)?)?,
        updated_at: parse_timestamp(4, &row.get::<_, String>(4)?)?,
    })
}

fn load_current(conn: &Connection, policyholder_id: i64) -> Result<Option<Record>> {
    let record = conn
        .query_row(
            r#"
            SELECT record_id, data, version, created_at, updated_at
            FROM policyholder_records
            WHERE policyholder_id = ?1
            "#,
            params![policyholder_id],
            |row| record_from_row(policyholder_id, row),
        )
        .optional()?;
    Ok(record)
}

fn append_event(
    conn: &Connection,
    record_id: i64,
    action: EventAction,
    details: &str,
    timestamp: &str,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO event_logs (record_id, action, details, timestamp)
        VALUES (?1, ?2, ?3, ?4)
        "#,
        params![record_id, action.as_str(), details, timestamp],
    )?;
    Ok(())
}

impl SqliteRecordStore {
    pub fn new(db: Database) -> Self {
        Self::with_options(db, RecordStoreOptions::default())
    }

    pub fn with_options(db: Database, options: RecordStoreOptions) -> Self {
        Self { db, options }
    }

    /// Run one read-modify-write as a single transaction
    ///
    /// `resolve` receives the current payload (`None` when no record exists)
    /// and returns the payload to store. An error from `resolve` aborts the
    /// transaction with nothing written.
    fn write_version<F>(&self, policyholder_id: i64, resolve: F) -> Result<Record>
    where
        F: FnOnce(Option<&RecordData>) -> Result<RecordData>,
    {
        ensure_valid_id(policyholder_id)?;

        let mut conn = self.db.conn()?;
        let (record, event_type) =
            execute_in_transaction(&mut conn, TransactionBehavior::Immediate, |tx| {
                Self::write_version_tx(tx, policyholder_id, resolve)
            })?;

        tracing::debug!(
            policyholder_id,
            record_id = record.record_id,
            version = record.version,
            event = %event_type,
            "record version written"
        );

        Ok(record)
    }

    fn write_version_tx<F>(
        tx: &Transaction<'_>,
        policyholder_id: i64,
        resolve: F,
    ) -> Result<(Record, EventType)>
    where
        F: FnOnce(Option<&RecordData>) -> Result<RecordData>,
    {
        let current = load_current(tx, policyholder_id)?;
        let data = resolve(current.as_ref().map(|r| &r.data))?;

        let payload = serde_json::to_string(&data)?;
        let now = Utc::now().trunc_subsecs(6);
        let now_text = format_timestamp(&now);

        // Insert-if-absent; an existing policyholder keeps its name.
        tx.execute(
            r#"
            INSERT OR IGNORE INTO policyholders (policyholder_id, name, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            "#,
            params![
                policyholder_id,
                data.get("name").map(String::as_str).unwrap_or_default(),
                now_text
            ],
        )
        .map_err(|e| TimetravelError::storage_with_source("failed to ensure policyholder exists", e))?;

        let (record, event_type) = match current {
            None => {
                tx.execute(
                    r#"
                    INSERT INTO policyholder_records
                        (policyholder_id, data, version, created_at, updated_at)
                    VALUES (?1, ?2, 1, ?3, ?3)
                    "#,
                    params![policyholder_id, payload, now_text],
                )?;
                let record = Record {
                    record_id: tx.last_insert_rowid(),
                    policyholder_id,
                    data,
                    version: 1,
                    created_at: now,
                    updated_at: now,
                };
                (record, EventType::Create)
            }
            Some(current) => {
                let next = current.version + 1;
                let changed = tx.execute(
                    r#"
                    UPDATE policyholder_records
                    SET data = ?1, version = ?2, updated_at = ?3
                    WHERE record_id = ?4 AND version = ?5
                    "#,
                    params![payload, next, now_text, current.record_id, current.version],
                )?;
                if changed != 1 {
                    return Err(TimetravelError::VersionConflict {
                        policyholder_id,
                        expected: current.version,
                    });
                }
                let record = Record {
                    data,
                    version: next,
                    updated_at: now,
                    ..current
                };
                (record, EventType::Update)
            }
        };

        tx.execute(
            r#"
            INSERT INTO audit_history (record_id, version, data, event_type, changed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                record.record_id,
                record.version,
                payload,
                event_type.as_str(),
                now_text
            ],
        )?;
        append_event(
            tx,
            record.record_id,
            event_type.into(),
            &payload,
            &now_text,
        )?;

        Ok((record, event_type))
    }

    /// Policyholder row for `policyholder_id`
    pub fn policyholder(&self, policyholder_id: i64) -> Result<Policyholder> {
        ensure_valid_id(policyholder_id)?;
        let conn = self.db.conn()?;
        conn.query_row(
            r#"
            SELECT policyholder_id, name, email, country_code, created_at, updated_at
            FROM policyholders
            WHERE policyholder_id = ?1
            "#,
            params![policyholder_id],
            |row| {
                Ok(Policyholder {
                    policyholder_id: row.get(0)?,
                    name: row.get(1)?,
                    email: row.get(2)?,
                    country_code: row.get(3)?,
                    created_at: parse_timestamp(4, &row.get::<_, String>(4)?)?,
                    updated_at: parse_timestamp(5, &row.get::<_, String>(5)?)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| TimetravelError::not_found(policyholder_id))
    }

    /// Create a policyholder under a generated id
    pub fn register_policyholder(&self, new: &NewPolicyholder) -> Result<Policyholder> {
        let now = Utc::now().trunc_subsecs(6);
        let now_text = format_timestamp(&now);
        let conn = self.db.conn()?;
        conn.execute(
            r#"
            INSERT INTO policyholders (name, email, country_code, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            "#,
            params![new.name, new.email, new.country_code, now_text],
        )?;
        let policyholder_id = conn.last_insert_rowid();

        tracing::debug!(policyholder_id, "policyholder registered");

        Ok(Policyholder {
            policyholder_id,
            name: new.name.clone(),
            email: new.email.clone(),
            country_code: new.country_code.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Full audit trail for the policyholder's record, ascending by version
    pub fn audit_trail(&self, policyholder_id: i64) -> Result<Vec<AuditEntry>> {
        ensure_valid_id(policyholder_id)?;
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT ah.audit_id, ah.record_id, ah.version, ah.data, ah.event_type, ah.changed_at
            FROM audit_history ah
            JOIN policyholder_records pr ON pr.record_id = ah.record_id
            WHERE pr.policyholder_id = ?1
            ORDER BY ah.version
            "#,
        )?;
        let entries = stmt
            .query_map(params![policyholder_id], |row| {
                let raw_type: String = row.get(4)?;
                let event_type = EventType::parse(&raw_type).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        4,
                        rusqlite::types::Type::Text,
                        format!("unknown event type {raw_type}").into(),
                    )
                })?;
                Ok(AuditEntry {
                    audit_id: row.get(0)?,
                    record_id: row.get(1)?,
                    version: row.get(2)?,
                    data: parse_data(3, &row.get::<_, String>(3)?)?,
                    event_type,
                    changed_at: parse_timestamp(5, &row.get::<_, String>(5)?)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Event log for the policyholder's record, oldest first
    pub fn events(&self, policyholder_id: i64) -> Result<Vec<EventLogEntry>> {
        ensure_valid_id(policyholder_id)?;
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT el.event_id, el.record_id, el.action, el.details, el.timestamp
            FROM event_logs el
            JOIN policyholder_records pr ON pr.record_id = el.record_id
            WHERE pr.policyholder_id = ?1
            ORDER BY el.event_id
            "#,
        )?;
        let entries = stmt
            .query_map(params![policyholder_id], |row| {
                let raw_action: String = row.get(2)?;
                let action = EventAction::parse(&raw_action).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        2,
                        rusqlite::types::Type::Text,
                        format!("unknown event action {raw_action}").into(),
                    )
                })?;
                Ok(EventLogEntry {
                    event_id: row.get(0)?,
                    record_id: row.get(1)?,
                    action,
                    details: row.get(3)?,
                    timestamp: parse_timestamp(4, &row.get::<_, String>(4)?)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

impl RecordStore for SqliteRecordStore {
    fn get(&self, policyholder_id: i64) -> Result<Record> {
        ensure_valid_id(policyholder_id)?;
        let conn = self.db.conn()?;
        let record =
            load_current(&conn, policyholder_id)?.ok_or_else(|| TimetravelError::not_found(policyholder_id))?;

        if self.options.log_reads {
            let details = serde_json::json!({ "version": record.version }).to_string();
            let now = format_timestamp(&Utc::now().trunc_subsecs(6));
            // The read itself succeeded; a missing trace row must not fail it.
            if let Err(e) = append_event(&conn, record.record_id, EventAction::Read, &details, &now)
            {
                tracing::warn!(
                    policyholder_id,
                    record_id = record.record_id,
                    error = %e,
                    "failed to log record read"
                );
            }
        }

        Ok(record)
    }

    fn create_or_update(&self, policyholder_id: i64, data: RecordData) -> Result<Record> {
        self.write_version(policyholder_id, |_| Ok(data))
    }

    fn update_fields(&self, policyholder_id: i64, patch: &RecordPatch) -> Result<Record> {
        self.write_version(policyholder_id, |current| match current {
            Some(current) => {
                let mut data = current.clone();
                patch.apply_to(&mut data);
                Ok(data)
            }
            None => Err(TimetravelError::not_found(policyholder_id)),
        })
    }

    fn get_version(&self, policyholder_id: i64, version: i64) -> Result<RecordData> {
        ensure_valid_id(policyholder_id)?;
        let conn = self.db.conn()?;
        conn.query_row(
            r#"
            SELECT ah.data
            FROM audit_history ah
            JOIN policyholder_records pr ON pr.record_id = ah.record_id
            WHERE pr.policyholder_id = ?1 AND ah.version = ?2
            "#,
            params![policyholder_id, version],
            |row| parse_data(0, &row.get::<_, String>(0)?),
        )
        .optional()?
        .ok_or_else(|| TimetravelError::version_not_found(policyholder_id, version))
    }

    fn list_versions(&self, policyholder_id: i64) -> Result<Vec<i64>> {
        ensure_valid_id(policyholder_id)?;
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT ah.version
            FROM audit_history ah
            JOIN policyholder_records pr ON pr.record_id = ah.record_id
            WHERE pr.policyholder_id = ?1
            ORDER BY ah.version
            "#,
        )?;
        let versions = stmt
            .query_map(params![policyholder_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(versions)
    }
}
