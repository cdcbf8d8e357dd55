use std::sync::Arc;

use crate::errors::{ErrorKind, Result, TimetravelError};
use crate::models::{Record, RecordData, RecordPatch};
use crate::records::RecordStore;

/// Validates identifiers and forwards record operations to a [`RecordStore`]
#[derive(Clone)]
pub struct RecordController {
    store: Arc<dyn RecordStore>,
}

fn validate_id(policyholder_id: i64) -> Result<()> {
    if policyholder_id <= 0 {
        tracing::warn!(policyholder_id, "rejected non-positive policyholder id");
        return Err(TimetravelError::InvalidIdentifier {
            id: policyholder_id,
        });
    }
    Ok(())
}

/// Not-found is an expected outcome; everything else is worth an error line.
fn log_failure<T>(result: Result<T>, op: &'static str, policyholder_id: i64) -> Result<T> {
    if let Err(e) = &result {
        match e.kind() {
            ErrorKind::NotFound => tracing::debug!(op, policyholder_id, "record not found"),
            kind => tracing::error!(
                op,
                policyholder_id,
                kind = kind.as_str(),
                error = %e,
                "record operation failed"
            ),
        }
    }
    result
}

impl RecordController {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn get_record(&self, policyholder_id: i64) -> Result<Record> {
        validate_id(policyholder_id)?;
        log_failure(self.store.get(policyholder_id), "get", policyholder_id)
    }

    /// Replace the record's data wholesale (creating version 1 if needed)
    pub fn upsert_record(&self, policyholder_id: i64, data: RecordData) -> Result<Record> {
        validate_id(policyholder_id)?;
        log_failure(
            self.store.create_or_update(policyholder_id, data),
            "upsert",
            policyholder_id,
        )
    }

    /// Apply a partial update to an existing record
    ///
    /// `Some(value)` sets a key, `None` removes it, absent keys are kept.
    /// Fails with `RecordNotFound` when there is no current record.
    pub fn update_record(&self, policyholder_id: i64, patch: &RecordPatch) -> Result<Record> {
        validate_id(policyholder_id)?;
        log_failure(
            self.store.update_fields(policyholder_id, patch),
            "update",
            policyholder_id,
        )
    }

    pub fn get_version(&self, policyholder_id: i64, version: i64) -> Result<RecordData> {
        validate_id(policyholder_id)?;
        log_failure(
            self.store.get_version(policyholder_id, version),
            "get_version",
            policyholder_id,
        )
    }

    pub fn list_versions(&self, policyholder_id: i64) -> Result<Vec<i64>> {
        validate_id(policyholder_id)?;
        log_failure(
            self.store.list_versions(policyholder_id),
            "list_versions",
            policyholder_id,
        )
    }
}

impl std::fmt::Debug for RecordController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordController").finish_non_exhaustive()
    }
}
