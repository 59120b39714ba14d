mod common;

use chrono::Utc;
use common::make_coredump;

use coredump_monitor::db::Database;
use coredump_monitor::model::{AnalysisResults, CoredumpState, RestartEvent};

// ══════════════════════════════════════════════════════════════════
// Persistence integration tests
//
// Exercises the on-disk store (WAL file, schema, unique constraints)
// rather than the in-memory variant the unit tests use.
// ══════════════════════════════════════════════════════════════════

#[test]
fn test_open_creates_file_and_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("monitor.db");

    {
        let db = Database::open(&path).unwrap();
        let file = make_coredump("/dumps/core.milvus.1000.1700000000.1", 64, 11, Utc::now());
        db.upsert_coredump(&file).unwrap();
    }
    assert!(path.exists(), "database file created with parent dirs");

    // A fresh process sees the processed path.
    let db = Database::open(&path).unwrap();
    assert!(
        db.known_coredump_paths()
            .unwrap()
            .contains("/dumps/core.milvus.1000.1700000000.1")
    );
}

#[test]
fn test_analysis_round_trip_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("monitor.db")).unwrap();

    let mut file = make_coredump("/dumps/core.milvus.1000.1700000000.2", 64, 11, Utc::now());
    db.upsert_coredump(&file).unwrap();

    file.state = CoredumpState::Analyzed;
    file.value_score = 9.5;
    let analysis = AnalysisResults {
        crash_reason: "Segmentation fault (SIGSEGV)".to_string(),
        stack_trace: "#0 raise".to_string(),
        thread_count: 4,
        ..Default::default()
    };
    db.record_analysis(&file, &analysis).unwrap();
    db.update_coredump_state(&file.path, CoredumpState::Stored, None)
        .unwrap();
    assert_eq!(db.coredump_count().unwrap(), 1);
}

#[test]
fn test_restart_events_respect_retention() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("monitor.db")).unwrap();

    let event = RestartEvent {
        pod_name: "p1".to_string(),
        namespace: "ns1".to_string(),
        container_name: "c1".to_string(),
        restart_time: Utc::now(),
        exit_code: 139,
        signal: 11,
        reason: "Error".to_string(),
        message: String::new(),
        instance_name: "rel1".to_string(),
        is_panic: true,
    };
    db.insert_restart_event(&event).unwrap();

    // Fresh events survive a retention pass.
    assert_eq!(db.cleanup_old_records(7).unwrap(), 0);
}
