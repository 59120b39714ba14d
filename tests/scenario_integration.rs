mod common;

use chrono::Utc;
use common::{make_coredump, uncorrelated};

use coredump_monitor::analyzer::{
    basic_analysis, compute_value_score, crash_reason_from_backtrace, parse_gdb_output,
};
use coredump_monitor::collector::parse_core_filename;
use coredump_monitor::config::AnalyzerConfig;
use coredump_monitor::discovery::classify_panic;
use coredump_monitor::model::AnalysisResults;
use coredump_monitor::storage::{select_retention_deletions, storage_object_name, StoredFile};

// ══════════════════════════════════════════════════════════════════
// Scenario integration tests (no cluster required)
//
// Walks the literal pipeline scenarios: a panic restart with a dump,
// a liveness-probe restart, size-based retention, and the debugger
// timeout fallback.
// ══════════════════════════════════════════════════════════════════

#[test]
fn test_panic_restart_with_dump_scores_and_names() {
    // Pod p1 restarts on SIGSEGV; the matching dump appears on disk.
    assert!(classify_panic("Error", "", 139, 11));

    let parsed = parse_core_filename("core.milvus.1000.1700000000.12345").expect("valid filename");
    assert_eq!(parsed.executable, "milvus");
    assert_eq!(parsed.pid, 12345);

    let now = Utc::now();
    let mut file = make_coredump(
        "/var/dumps/core.milvus.1000.1700000000.12345",
        150 * 1024 * 1024,
        11,
        now - chrono::Duration::minutes(1),
    );
    file.executable = parsed.executable;
    file.pid = parsed.pid;

    let analysis = AnalysisResults {
        crash_reason: crash_reason_from_backtrace("Program terminated with signal SIGSEGV"),
        stack_trace: "#0 raise ()\n".repeat(20),
        thread_count: 12,
        ..Default::default()
    };
    assert_eq!(analysis.crash_reason, "Segmentation fault (SIGSEGV)");

    // Every dimension fires: 4 + 2 + 1 + 1.5 + 0.5 + 1 + 1 + 0.5 + 0.5 = 12.
    let breakdown = compute_value_score(
        &file,
        &analysis,
        &AnalyzerConfig::default().panic_keywords,
        now,
    );
    assert_eq!(breakdown.total, 10.0, "score clamps to 10");

    file.value_score = breakdown.total;
    let name = storage_object_name(&file, true);
    assert!(name.starts_with("rel1/"), "stored under the instance: {name}");
    assert!(name.ends_with("_p1_c1.core.gz"), "pod and container in the name: {name}");
}

#[test]
fn test_liveness_probe_restart_is_ignored() {
    // Same pod, reason "Liveness probe failed": no panic, no collection.
    assert!(!classify_panic("Liveness probe failed", "", 137, 0));
}

#[test]
fn test_retention_by_size_deletes_lowest_value_dump() {
    // Six 20 GB files against a 100 GB budget, all fresh.
    const GB: u64 = 1024 * 1024 * 1024;
    let now = Utc::now();
    let files: Vec<StoredFile> = [7.0, 9.0, 3.5, 8.0, 6.0, 9.5]
        .iter()
        .enumerate()
        .map(|(i, score)| StoredFile {
            path: format!("rel1/dump-{i}.core.gz"),
            size: 20 * GB,
            stored_at: now - chrono::Duration::days(1),
            value_score: *score,
            instance_name: "rel1".to_string(),
        })
        .collect();

    let deletions = select_retention_deletions(files, now, 30, 100 * GB);
    assert_eq!(deletions.len(), 1, "exactly one deletion brings us to budget");
    assert_eq!(deletions[0].path, "rel1/dump-2.core.gz", "lowest score goes first");
}

#[test]
fn test_debugger_timeout_falls_back_to_signal_analysis() {
    // The debugger never returned; only the signal and pod metadata remain.
    let now = Utc::now();
    let file = make_coredump(
        "/var/dumps/core.milvus.1000.1700000000.99",
        500 * 1024 * 1024,
        11,
        now - chrono::Duration::hours(2),
    );
    let analysis = basic_analysis(file.signal, "");
    assert_eq!(analysis.crash_reason, "Segmentation fault (SIGSEGV)");

    let breakdown = compute_value_score(
        &file,
        &analysis,
        &AnalyzerConfig::default().panic_keywords,
        now,
    );
    assert_eq!(breakdown.stack_trace, 0.0);
    assert_eq!(breakdown.threads, 0.0);
    assert_eq!(breakdown.pod_association, 1.0);
    assert_eq!(breakdown.signal, 1.0);
    assert!(breakdown.total < 10.0);
}

#[test]
fn test_uncorrelated_dump_uses_fallback_name_and_loses_the_point() {
    let now = Utc::now();
    let file = uncorrelated(make_coredump(
        "/var/dumps/core.milvus.1000.1700000000.7",
        1024,
        11,
        now,
    ));
    let breakdown = compute_value_score(
        &file,
        &AnalysisResults::default(),
        &AnalyzerConfig::default().panic_keywords,
        now,
    );
    assert_eq!(breakdown.pod_association, 0.0);

    let name = storage_object_name(&file, true);
    assert!(name.contains("core.milvus.1000.1700000000.7"));
    assert!(!name.contains('/'), "no instance directory without correlation");
}

#[test]
fn test_full_debugger_output_drives_the_score() {
    let output = "\
=====BACKTRACE=====
Program terminated with signal SIGABRT, Aborted.
#0  0x00007f00dead0000 in abort ()
=====THREADS=====
* 1 Thread 0x1 (LWP 1) abort ()
  2 Thread 0x2 (LWP 2) poll ()
";
    let analysis = parse_gdb_output(output);
    assert_eq!(analysis.crash_reason, "Abort signal (SIGABRT)");
    assert_eq!(analysis.crash_address, "0x00007f00dead0000");
    assert_eq!(analysis.thread_count, 2);
}
