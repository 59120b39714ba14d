use std::sync::LazyLock;

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Registry, TextEncoder,
};

/* ============================= REGISTRY ============================= */

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

fn counter(name: &str, help: &str) -> IntCounter {
    let c = IntCounter::new(name, help).expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
}

fn gauge(name: &str, help: &str) -> IntGauge {
    let g = IntGauge::new(name, help).expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
}

fn float_gauge(name: &str, help: &str) -> Gauge {
    let g = Gauge::new(name, help).expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
}

/* ============================= COLLECTOR ============================= */

pub static COREDUMPS_DISCOVERED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "coredump_monitor_coredumps_discovered_total",
        "Total coredump files discovered on disk",
    )
});

pub static COREDUMPS_PROCESSED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "coredump_monitor_coredumps_processed_total",
        "Total coredump files fully processed",
    )
});

pub static COREDUMPS_SKIPPED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "coredump_monitor_coredumps_skipped_total",
        "Total coredump files skipped by policy",
    )
});

pub static COREDUMPS_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "coredump_monitor_coredumps_errors_total",
        "Total coredump files that failed processing",
    )
});

pub static LAST_PROCESSED_TIMESTAMP: LazyLock<IntGauge> = LazyLock::new(|| {
    gauge(
        "coredump_monitor_last_processed_file_timestamp",
        "Unix timestamp of the most recently processed coredump file",
    )
});

/* ============================= ANALYZER ============================= */

pub static ANALYSIS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "coredump_monitor_analysis_total",
        "Total coredump analyses attempted",
    )
});

pub static ANALYSIS_SUCCESSFUL: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "coredump_monitor_analysis_successful_total",
        "Total coredump analyses that completed",
    )
});

pub static ANALYSIS_FAILED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "coredump_monitor_analysis_failed_total",
        "Total coredump analyses that failed",
    )
});

pub static ANALYSIS_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    let h = Histogram::with_opts(
        HistogramOpts::new(
            "coredump_monitor_analysis_duration_seconds",
            "Wall-clock duration of coredump analysis",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(h.clone()))
        .expect("metric not yet registered");
    h
});

pub static VALUE_SCORE_DISTRIBUTION: LazyLock<Histogram> = LazyLock::new(|| {
    let h = Histogram::with_opts(
        HistogramOpts::new(
            "coredump_monitor_value_score_distribution",
            "Distribution of computed coredump value scores",
        )
        .buckets((0..=10).map(|v| v as f64).collect()),
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(h.clone()))
        .expect("metric not yet registered");
    h
});

/* ============================= STORAGE ============================= */

pub static FILES_STORED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "coredump_monitor_files_stored_total",
        "Total coredump files persisted to storage",
    )
});

pub static STORAGE_SIZE_BYTES: LazyLock<IntGauge> = LazyLock::new(|| {
    gauge(
        "coredump_monitor_storage_size_bytes",
        "Total bytes currently held in coredump storage",
    )
});

pub static FILES_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "coredump_monitor_files_deleted_total",
        "Total stored coredump files removed by retention",
    )
});

pub static STORAGE_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "coredump_monitor_storage_errors_total",
        "Total storage operations that failed",
    )
});

/* ============================= CLEANER ============================= */

pub static INSTANCES_UNINSTALLED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "coredump_monitor_instances_uninstalled_total",
        "Total crash-looping instances decommissioned",
    )
});

pub static CLEANUP_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "coredump_monitor_cleanup_errors_total",
        "Total cleanup attempts that failed or were denied",
    )
});

pub static RESTART_COUNTS: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let g = IntGaugeVec::new(
        prometheus::Opts::new(
            "coredump_monitor_restart_counts",
            "Panic restarts currently counted per instance window",
        ),
        &["instance", "namespace"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

/* ============================= DISCOVERY ============================= */

pub static UP: LazyLock<IntGauge> = LazyLock::new(|| {
    gauge("coredump_monitor_up", "Whether the agent is serving (always 1)")
});

pub static MILVUS_INSTANCES: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let g = IntGaugeVec::new(
        prometheus::Opts::new(
            "coredump_monitor_milvus_instances_total",
            "Discovered Milvus instances by namespace, deployment type and status",
        ),
        &["namespace", "type", "status"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

/* ============================= CONTROLLER ============================= */

pub static CONTROLLER_AI_COST_MONTHLY: LazyLock<Gauge> = LazyLock::new(|| {
    float_gauge(
        "coredump_monitor_controller_ai_cost_monthly",
        "Accumulated LLM cost in USD for the current month",
    )
});

pub static CONTROLLER_AI_ANALYSES: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "coredump_monitor_controller_ai_analyses_total",
        "Total LLM analyses approved by the controller",
    )
});

pub static CONTROLLER_PENDING_CLEANUPS: LazyLock<IntGauge> = LazyLock::new(|| {
    gauge(
        "coredump_monitor_controller_pending_cleanups",
        "Cleanup tasks currently pending or in progress",
    )
});

pub static CONTROLLER_ACTIVE_AGENTS: LazyLock<IntGauge> = LazyLock::new(|| {
    gauge(
        "coredump_monitor_controller_active_agents",
        "Agents with a recent heartbeat",
    )
});

pub static HEARTBEATS_RECEIVED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new(
            "coredump_monitor_controller_heartbeats_total",
            "Heartbeats received per agent",
        ),
        &["node"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

/* ============================= EXPORT ============================= */

/// Render every registered metric in Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normative_metric_names_registered() {
        LazyLock::force(&COREDUMPS_DISCOVERED);
        LazyLock::force(&ANALYSIS_DURATION);
        LazyLock::force(&VALUE_SCORE_DISTRIBUTION);
        LazyLock::force(&FILES_STORED);
        LazyLock::force(&INSTANCES_UNINSTALLED);
        LazyLock::force(&MILVUS_INSTANCES);
        LazyLock::force(&CONTROLLER_AI_COST_MONTHLY);
        LazyLock::force(&UP);

        let names: Vec<String> = REGISTRY
            .gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();
        for expected in [
            "coredump_monitor_coredumps_discovered_total",
            "coredump_monitor_analysis_duration_seconds",
            "coredump_monitor_value_score_distribution",
            "coredump_monitor_files_stored_total",
            "coredump_monitor_instances_uninstalled_total",
            "coredump_monitor_milvus_instances_total",
            "coredump_monitor_controller_ai_cost_monthly",
            "coredump_monitor_up",
        ] {
            assert!(
                names.iter().any(|n| n == expected),
                "{expected} should be registered"
            );
        }
    }

    #[test]
    fn test_render_emits_text_format() {
        UP.set(1);
        let body = render();
        assert!(body.contains("coredump_monitor_up 1"));
    }
}
