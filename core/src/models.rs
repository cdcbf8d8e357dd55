//! Rows of the durable table set, as seen by callers

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Flat string-to-string data payload of a record
pub type RecordData = BTreeMap<String, String>;

/// Partial update: `Some(v)` sets a key, `None` (JSON `null`) deletes it.
/// Keys not present are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordPatch(pub BTreeMap<String, Option<String>>);

impl RecordPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), Some(value.into()));
        self
    }

    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.0.insert(key.into(), None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolve the patch against `data` into a full payload
    pub fn apply_to(&self, data: &mut RecordData) {
        for (key, value) in &self.0 {
            match value {
                Some(v) => {
                    data.insert(key.clone(), v.clone());
                }
                None => {
                    data.remove(key);
                }
            }
        }
    }
}

impl FromIterator<(String, Option<String>)> for RecordPatch {
    fn from_iter<I: IntoIterator<Item = (String, Option<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Identity anchor for records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policyholder {
    pub policyholder_id: i64,
    pub name: String,
    pub email: Option<String>,
    pub country_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for registering a policyholder under a generated id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPolicyholder {
    pub name: String,
    pub email: Option<String>,
    pub country_code: Option<String>,
}

/// Current (latest) state of a policyholder's record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub record_id: i64,
    pub policyholder_id: i64,
    pub data: RecordData,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Why an audit snapshot was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Create,
    Update,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of a record at one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub audit_id: i64,
    pub record_id: i64,
    pub version: i64,
    pub data: RecordData,
    pub event_type: EventType,
    pub changed_at: DateTime<Utc>,
}

/// Action recorded in the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Create,
    Update,
    Read,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

impl From<EventType> for EventAction {
    fn from(event_type: EventType) -> Self {
        match event_type {
            EventType::Create => Self::Create,
            EventType::Update => Self::Update,
        }
    }
}

/// Traceability row; never used to reconstruct state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub event_id: i64,
    pub record_id: i64,
    pub action: EventAction,
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Cached feature flag definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlag {
    pub key: String,
    pub enabled: bool,
    /// 0..=100
    pub rollout_percentage: u8,
    pub description: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl FeatureFlag {
    pub fn new(key: impl Into<String>, enabled: bool, rollout_percentage: u8) -> Self {
        Self {
            key: key.into(),
            enabled,
            rollout_percentage: rollout_percentage.min(100),
            description: None,
            updated_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Canonical text form for timestamps written to SQLite
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp, surfacing malformed text as a column error
pub(crate) fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn data(pairs: &[(&str, &str)]) -> RecordData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_patch_sets_overwrites_and_deletes() {
        let mut current = data(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let patch = RecordPatch::new().set("a", "updated").set("d", "new").delete("b");

        patch.apply_to(&mut current);

        assert_eq!(current, data(&[("a", "updated"), ("c", "3"), ("d", "new")]));
    }

    #[test]
    fn test_patch_delete_of_absent_key_is_noop() {
        let mut current = data(&[("a", "1")]);
        RecordPatch::new().delete("zzz").apply_to(&mut current);
        assert_eq!(current, data(&[("a", "1")]));
    }

    #[test]
    fn test_patch_deserializes_null_as_delete() {
        let patch: RecordPatch = serde_json::from_str(r#"{"b": null, "c": "x"}"#).unwrap();
        assert_eq!(patch, RecordPatch::new().delete("b").set("c", "x"));
    }

    #[test]
    fn test_event_type_round_trip_strings() {
        assert_eq!(EventType::parse("create"), Some(EventType::Create));
        assert_eq!(EventType::parse("delete"), None);
        assert_eq!(EventAction::from(EventType::Update).as_str(), "update");
    }

    #[test]
    fn test_parse_timestamp_accepts_sqlite_default_format() {
        let ts = parse_timestamp(0, "2024-03-01T10:20:30.123Z").unwrap();
        assert_eq!(format_timestamp(&ts), "2024-03-01T10:20:30.123000Z");
        assert!(parse_timestamp(0, "yesterday").is_err());
    }

    #[test]
    fn test_feature_flag_clamps_rollout() {
        assert_eq!(FeatureFlag::new("f", true, 250).rollout_percentage, 100);
    }
}
