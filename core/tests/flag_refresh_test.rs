//! Integration tests for the flag engine over the `feature_flags` table

use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;
use timetravel_core::config::{DatabaseConfig, TimetravelConfig};
use timetravel_core::{
    Database, FeatureFlag, FlagEngine, FlagSource, RequestContext, SqliteFlagSource, Timetravel,
};

fn config(temp_dir: &TempDir) -> TimetravelConfig {
    TimetravelConfig {
        database: DatabaseConfig {
            path: temp_dir
                .path()
                .join("flags.db")
                .to_string_lossy()
                .into_owned(),
            ..DatabaseConfig::default()
        },
        ..TimetravelConfig::default()
    }
}

#[test]
fn test_rollout_change_visible_only_after_refresh() {
    let temp_dir = TempDir::new().unwrap();
    let app = Timetravel::open(&config(&temp_dir)).unwrap();
    let ctx = RequestContext::for_user(12345);

    app.flag_source()
        .save_flag(&FeatureFlag::new("enable_v2_api", true, 100))
        .unwrap();
    app.flags().refresh().unwrap();
    assert!(app.flags().is_enabled(&ctx, "enable_v2_api"));

    app.flag_source()
        .save_flag(&FeatureFlag::new("enable_v2_api", true, 0))
        .unwrap();
    // Cache is authoritative until refreshed
    assert!(app.flags().is_enabled(&ctx, "enable_v2_api"));

    app.flags().refresh().unwrap();
    assert!(!app.flags().is_enabled(&ctx, "enable_v2_api"));
}

#[test]
fn test_seeded_flag_starts_disabled() {
    let temp_dir = TempDir::new().unwrap();
    let app = Timetravel::open(&config(&temp_dir)).unwrap();

    let flag = app.flag_engine().flag("enable_v2_api").unwrap();
    assert!(!flag.enabled);
    for user_id in 1..=50 {
        assert!(!app.flags().is_enabled(&RequestContext::for_user(user_id), "enable_v2_api"));
    }
}

#[test]
fn test_anonymous_caller_never_enabled() {
    let temp_dir = TempDir::new().unwrap();
    let app = Timetravel::open(&config(&temp_dir)).unwrap();
    app.flag_source()
        .save_flag(&FeatureFlag::new("everyone", true, 100))
        .unwrap();
    app.flags().refresh().unwrap();

    assert!(!app.flags().is_enabled(&RequestContext::anonymous(), "everyone"));
    // Rejected before the engine, so nothing was counted
    assert_eq!(app.evaluation_counters().count("everyone", false), 0);
    assert_eq!(app.evaluation_counters().count("everyone", true), 0);
}

#[test]
fn test_partial_rollout_matches_pinned_buckets() {
    let temp_dir = TempDir::new().unwrap();
    let app = Timetravel::open(&config(&temp_dir)).unwrap();
    app.flag_source()
        .save_flag(&FeatureFlag::new("gradual", true, 20))
        .unwrap();
    app.flags().refresh().unwrap();

    // user 42 -> bucket 11, user 1 -> bucket 44, user 7 -> bucket 6
    assert!(app.flags().is_enabled(&RequestContext::for_user(42), "gradual"));
    assert!(!app.flags().is_enabled(&RequestContext::for_user(1), "gradual"));
    assert!(app.flags().is_enabled(&RequestContext::for_user(7), "gradual"));

    assert_eq!(app.evaluation_counters().count("gradual", true), 2);
    assert_eq!(app.evaluation_counters().count("gradual", false), 1);
}

#[test]
fn test_engines_over_one_database_are_independent() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open_at_path(
        &temp_dir.path().join("shared.db"),
        &DatabaseConfig::default(),
    )
    .unwrap();
    db.migrate().unwrap();
    let source = Arc::new(SqliteFlagSource::new(db));

    let first = FlagEngine::new(Arc::clone(&source) as Arc<dyn FlagSource>).unwrap();
    source
        .save_flag(&FeatureFlag::new("late", true, 100))
        .unwrap();
    let second = FlagEngine::new(Arc::clone(&source) as Arc<dyn FlagSource>).unwrap();

    assert!(!first.is_enabled("late", 1));
    assert!(second.is_enabled("late", 1));
    assert_eq!(first.refresh().unwrap(), second.flags().len());
    assert!(first.is_enabled("late", 1));
}
