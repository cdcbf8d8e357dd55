//! Integration tests for versioned records over a file-backed pool
//!
//! Each test opens its own database in a temp dir through the same path the
//! binary uses (`Timetravel::open`).

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;
use timetravel_core::config::{DatabaseConfig, TimetravelConfig};
use timetravel_core::{
    EventAction, EventType, RecordData, RecordPatch, RecordStore, RequestContext, Timetravel,
};

fn open(temp_dir: &TempDir) -> Timetravel {
    let cfg = TimetravelConfig {
        database: DatabaseConfig {
            path: temp_dir
                .path()
                .join("timetravel.db")
                .to_string_lossy()
                .into_owned(),
            pool_size: 8,
            ..DatabaseConfig::default()
        },
        ..TimetravelConfig::default()
    };
    Timetravel::open(&cfg).unwrap()
}

fn data(pairs: &[(&str, &str)]) -> RecordData {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_create_then_update_keeps_both_versions() {
    let temp_dir = TempDir::new().unwrap();
    let app = open(&temp_dir);
    let records = app.records();

    let created = records.upsert_record(1, data(&[("name", "John")])).unwrap();
    assert_eq!(created.version, 1);

    let updated = records
        .upsert_record(1, data(&[("name", "John Updated")]))
        .unwrap();
    assert_eq!(updated.version, 2);

    assert_eq!(records.get_version(1, 1).unwrap(), data(&[("name", "John")]));
    assert_eq!(
        records.get_version(1, 2).unwrap(),
        data(&[("name", "John Updated")])
    );
    assert_eq!(records.list_versions(1).unwrap(), vec![1, 2]);
    assert_eq!(records.get_record(1).unwrap(), updated);
}

#[test]
fn test_versions_are_gapless_and_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let app = open(&temp_dir);
    let records = app.records();

    let payloads: Vec<RecordData> = (1..=10)
        .map(|i| data(&[("counter", i.to_string().as_str()), ("name", "Ada")]))
        .collect();
    for (i, payload) in payloads.iter().enumerate() {
        let record = records.upsert_record(17, payload.clone()).unwrap();
        assert_eq!(record.version, i as i64 + 1);
    }

    assert_eq!(records.list_versions(17).unwrap(), (1..=10).collect::<Vec<_>>());
    for (i, payload) in payloads.iter().enumerate() {
        assert_eq!(&records.get_version(17, i as i64 + 1).unwrap(), payload);
    }
    assert!(records.get_version(17, 11).unwrap_err().is_not_found());
}

#[test]
fn test_patch_delete_leaves_history_intact() {
    let temp_dir = TempDir::new().unwrap();
    let app = open(&temp_dir);
    let records = app.records();

    records
        .upsert_record(2, data(&[("name", "Grace"), ("plan", "gold")]))
        .unwrap();
    let patched = records
        .update_record(2, &RecordPatch::new().delete("plan"))
        .unwrap();

    assert_eq!(patched.data, data(&[("name", "Grace")]));
    assert_eq!(
        records.get_version(2, 1).unwrap(),
        data(&[("name", "Grace"), ("plan", "gold")])
    );
}

#[test]
fn test_audit_and_event_rows_match_versions() {
    let temp_dir = TempDir::new().unwrap();
    let app = open(&temp_dir);

    app.records().upsert_record(3, data(&[("a", "1")])).unwrap();
    app.records().upsert_record(3, data(&[("a", "2")])).unwrap();
    app.records().upsert_record(3, data(&[("a", "3")])).unwrap();

    let trail = app.store().audit_trail(3).unwrap();
    let versions: Vec<i64> = trail.iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![1, 2, 3]);
    assert_eq!(trail[0].event_type, EventType::Create);
    assert!(trail[1..].iter().all(|e| e.event_type == EventType::Update));

    let events = app.store().events(3).unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].action, EventAction::Create);
    assert!(events[1..].iter().all(|e| e.action == EventAction::Update));
}

#[test]
fn test_concurrent_writers_get_distinct_versions() {
    const WRITERS: usize = 16;
    const WRITES_EACH: usize = 5;

    let temp_dir = TempDir::new().unwrap();
    let app = Arc::new(open(&temp_dir));

    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let app = Arc::clone(&app);
            thread::spawn(move || {
                for write in 0..WRITES_EACH {
                    let payload = data(&[
                        ("writer", writer.to_string().as_str()),
                        ("write", write.to_string().as_str()),
                    ]);
                    app.records().upsert_record(99, payload).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total = (WRITERS * WRITES_EACH) as i64;
    let current = app.records().get_record(99).unwrap();
    assert_eq!(current.version, total);
    assert_eq!(
        app.records().list_versions(99).unwrap(),
        (1..=total).collect::<Vec<_>>()
    );

    // The current payload is the last snapshot written
    assert_eq!(app.records().get_version(99, total).unwrap(), current.data);

    let events = app.store().events(99).unwrap();
    assert_eq!(events.len(), WRITERS * WRITES_EACH);
}

#[test]
fn test_concurrent_patches_do_not_lose_fields() {
    const WRITERS: usize = 8;

    let temp_dir = TempDir::new().unwrap();
    let app = Arc::new(open(&temp_dir));
    app.records()
        .upsert_record(5, data(&[("name", "Linus")]))
        .unwrap();

    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let app = Arc::clone(&app);
            thread::spawn(move || {
                let patch = RecordPatch::new().set(format!("field_{writer}"), "set");
                app.records().update_record(5, &patch).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let current = app.records().get_record(5).unwrap();
    assert_eq!(current.version, WRITERS as i64 + 1);
    for writer in 0..WRITERS {
        assert_eq!(
            current.data.get(&format!("field_{writer}")).map(String::as_str),
            Some("set")
        );
    }
}

#[test]
fn test_deleting_policyholder_cascades() {
    let temp_dir = TempDir::new().unwrap();
    let app = open(&temp_dir);
    app.records().upsert_record(4, data(&[("a", "1")])).unwrap();
    app.records().upsert_record(4, data(&[("a", "2")])).unwrap();

    {
        let conn = app.database().conn().unwrap();
        conn.execute("DELETE FROM policyholders WHERE policyholder_id = 4", [])
            .unwrap();
        for table in ["policyholder_records", "audit_history", "event_logs"] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 0, "{table} not cleared");
        }
    }

    assert!(app.records().get_record(4).unwrap_err().is_not_found());
    assert!(app.records().list_versions(4).unwrap().is_empty());
}

#[test]
fn test_records_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let app = open(&temp_dir);
        app.records()
            .upsert_record(8, data(&[("name", "Barbara")]))
            .unwrap();
    }

    let app = open(&temp_dir);
    let record = app.store().get(8).unwrap();
    assert_eq!(record.version, 1);
    assert_eq!(record.data, data(&[("name", "Barbara")]));
    // Reopening does not re-run migrations or reseed anything
    assert!(app.database().migrate().unwrap().is_empty());
    assert!(!app.flags().is_enabled(&RequestContext::for_user(1), "enable_v2_api"));
}
