//! Where flag definitions come from

use chrono::{SubsecRound, Utc};
use rusqlite::params;

use crate::db::Database;
use crate::errors::Result;
use crate::models::{FeatureFlag, format_timestamp, parse_timestamp};

/// Loads every flag definition in one call
pub trait FlagSource: Send + Sync {
    fn load_flags(&self) -> Result<Vec<FeatureFlag>>;
}

/// `feature_flags` table
#[derive(Debug, Clone)]
pub struct SqliteFlagSource {
    db: Database,
}

impl SqliteFlagSource {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace a flag definition
    ///
    /// Running engines keep serving their cached copy until refreshed.
    pub fn save_flag(&self, flag: &FeatureFlag) -> Result<()> {
        let now = format_timestamp(&Utc::now().trunc_subsecs(6));
        let conn = self.db.conn()?;
        conn.execute(
            r#"
            INSERT INTO feature_flags (flag_key, enabled, description, rollout_percentage, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(flag_key) DO UPDATE SET
                enabled = excluded.enabled,
                description = excluded.description,
                rollout_percentage = excluded.rollout_percentage,
                updated_at = excluded.updated_at
            "#,
            params![
                flag.key,
                flag.enabled,
                flag.description,
                flag.rollout_percentage.min(100),
                now
            ],
        )?;

        tracing::debug!(
            flag = %flag.key,
            enabled = flag.enabled,
            rollout = flag.rollout_percentage,
            "feature flag saved"
        );
        Ok(())
    }
}

/// Stored percentages outside 0..=100 are clamped; NULL means everyone.
fn normalize_rollout(raw: Option<i64>) -> u8 {
    match raw {
        None => 100,
        // In 0..=100 after the clamp, so the cast is lossless.
        Some(pct) => pct.clamp(0, 100) as u8,
    }
}

impl FlagSource for SqliteFlagSource {
    fn load_flags(&self) -> Result<Vec<FeatureFlag>> {
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT flag_key, enabled, description, rollout_percentage, updated_at
            FROM feature_flags
            "#,
        )?;
        let flags = stmt
            .query_map([], |row| {
                let updated_at = row
                    .get::<_, Option<String>>(4)?
                    .map(|raw| parse_timestamp(4, &raw))
                    .transpose()?;
                Ok(FeatureFlag {
                    key: row.get(0)?,
                    enabled: row.get(1)?,
                    description: row.get(2)?,
                    rollout_percentage: normalize_rollout(row.get(3)?),
                    updated_at,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(flags)
    }
}
