use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::CollectorConfig;
use crate::db::Database;
use crate::discovery::InstanceMap;
use crate::metrics;
use crate::model::{CollectionEvent, CoredumpFile, CoredumpState, RestartEvent};

/* ============================= FILENAME PARSING ============================= */

/// Targeted collection polls for this long after a panic restart.
const TARGETED_SEARCH_DEADLINE: Duration = Duration::from_secs(30);
const TARGETED_SEARCH_POLL: Duration = Duration::from_secs(2);

/// Correlation window for the periodic walk (pod last-restart vs file modtime).
fn walk_correlation_window() -> chrono::Duration {
    chrono::Duration::minutes(5)
}

/// Correlation window for restart-triggered targeted collection.
fn targeted_correlation_window() -> chrono::Duration {
    chrono::Duration::minutes(2)
}

/// Executable names containing this substring are treated as belonging to the
/// workload regardless of pod identity.
const WORKLOAD_EXECUTABLE_TOKEN: &str = "milvus";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCoreFilename {
    pub executable: String,
    pub uid: u32,
    pub boot_id: Option<String>,
    pub wall_time: i64,
    pub pid: u32,
}

impl ParsedCoreFilename {
    /// Re-serialize into the filename this was parsed from.
    pub fn to_filename(&self) -> String {
        match &self.boot_id {
            Some(boot_id) => format!(
                "core.{}.{}.{}.{}.{}",
                self.executable, self.uid, boot_id, self.wall_time, self.pid
            ),
            None => format!(
                "core.{}.{}.{}.{}",
                self.executable, self.uid, self.wall_time, self.pid
            ),
        }
    }
}

/// Accepts the two conventional shapes:
/// `core.<executable>.<uid>.<wallTime>.<pid>` and
/// `core.<executable>.<uid>.<bootHexId>.<wallTime>.<pid>`.
pub fn parse_core_filename(filename: &str) -> Option<ParsedCoreFilename> {
    let parts: Vec<&str> = filename.split('.').collect();
    if parts.first() != Some(&"core") {
        return None;
    }
    match parts.len() {
        5 => Some(ParsedCoreFilename {
            executable: parts[1].to_string(),
            uid: parts[2].parse().ok()?,
            boot_id: None,
            wall_time: parts[3].parse().ok()?,
            pid: parts[4].parse().ok()?,
        }),
        6 => {
            let boot_id = parts[3];
            if boot_id.is_empty() || !boot_id.chars().all(|c| c.is_ascii_hexdigit()) {
                return None;
            }
            Some(ParsedCoreFilename {
                executable: parts[1].to_string(),
                uid: parts[2].parse().ok()?,
                boot_id: Some(boot_id.to_string()),
                wall_time: parts[4].parse().ok()?,
                pid: parts[5].parse().ok()?,
            })
        }
        _ => None,
    }
}

fn coredump_from_parts(
    path: &Path,
    parsed: ParsedCoreFilename,
    size: u64,
    mod_time: DateTime<Utc>,
) -> CoredumpFile {
    let now = Utc::now();
    CoredumpFile {
        path: path.to_string_lossy().into_owned(),
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        size,
        mod_time,
        executable: parsed.executable,
        pid: parsed.pid,
        uid: parsed.uid,
        gid: 0,
        signal: 0,
        timestamp: DateTime::<Utc>::from_timestamp(parsed.wall_time, 0).unwrap_or(mod_time),
        boot_id: parsed.boot_id,
        pod_name: None,
        pod_namespace: None,
        container_name: None,
        instance_name: None,
        state: CoredumpState::Discovered,
        value_score: 0.0,
        created_at: now,
        updated_at: now,
        error_message: None,
        analysis: None,
    }
}

/* ============================= CORRELATION ============================= */

/// The permissive association rule: a dump belongs to a pod when its
/// executable carries the workload token, or its modtime sits inside the
/// window around the pod's last restart.
pub fn is_pod_related(
    executable: &str,
    mod_time: DateTime<Utc>,
    last_restart: Option<DateTime<Utc>>,
    window: chrono::Duration,
) -> bool {
    if executable
        .to_lowercase()
        .contains(WORKLOAD_EXECUTABLE_TOKEN)
    {
        return true;
    }
    match last_restart {
        Some(restart) => (mod_time - restart).abs() < window,
        None => false,
    }
}

fn correlate_with_instances(file: &mut CoredumpFile, instances: &InstanceMap) {
    let Ok(guard) = instances.read() else { return };
    for instance in guard.values() {
        for pod in &instance.pods {
            if is_pod_related(
                &file.executable,
                file.mod_time,
                pod.last_restart,
                walk_correlation_window(),
            ) {
                file.pod_name = Some(pod.name.clone());
                file.pod_namespace = Some(pod.namespace.clone());
                file.instance_name = Some(instance.name.clone());
                if file.container_name.is_none() {
                    file.container_name = pod.containers.first().map(|c| c.name.clone());
                }
                return;
            }
        }
    }
}

/* ============================= COLLECTOR ============================= */

pub struct Collector {
    config: CollectorConfig,
    db: Arc<Database>,
    instances: InstanceMap,
    events_tx: mpsc::Sender<CollectionEvent>,
    processed: HashSet<String>,
}

impl Collector {
    pub fn new(
        config: CollectorConfig,
        db: Arc<Database>,
        instances: InstanceMap,
        events_tx: mpsc::Sender<CollectionEvent>,
    ) -> Collector {
        // Known paths survive restarts through the relational store.
        let processed = db.known_coredump_paths().unwrap_or_else(|e| {
            warn!(error = %e, "processed_set_seed_failed");
            HashSet::new()
        });
        Collector {
            config,
            db,
            instances,
            events_tx,
            processed,
        }
    }

    /// Main loop: periodic directory walks plus targeted searches on panic
    /// restarts. Both producers feed the same bounded output channel.
    pub async fn run(
        mut self,
        mut restart_rx: mpsc::Receiver<RestartEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(self.config.watch_interval);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("collector_stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.scan_directory();
                }
                event = restart_rx.recv() => {
                    match event {
                        Some(event) if event.is_panic => {
                            if let Err(e) = self
                                .events_tx
                                .try_send(CollectionEvent::RestartDetected(event.clone()))
                            {
                                warn!(error = %e, "collection_event_dropped");
                            }
                            self.targeted_collect(&event).await;
                        }
                        Some(_) => {} // non-panic restarts trigger no collection
                        None => {
                            info!("collector_restart_channel_closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// The walk guarantees eventual discovery of every dump the targeted
    /// search missed.
    fn scan_directory(&mut self) {
        let entries = match std::fs::read_dir(&self.config.coredump_path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.config.coredump_path, error = %e, "coredump_dir_read_failed");
                return;
            }
        };

        let now = Utc::now();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if self.processed.contains(path.to_string_lossy().as_ref()) {
                continue;
            }
            let Some(parsed) = parse_core_filename(filename) else {
                continue;
            };
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    let file = coredump_from_parts(&path, parsed, 0, now);
                    self.fail(file, format!("cannot stat candidate: {e}"));
                    continue;
                }
            };
            let mod_time: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or(now);

            let age = now.signed_duration_since(mod_time);
            let max_age =
                chrono::Duration::from_std(self.config.max_file_age).unwrap_or(chrono::Duration::zero());
            if age > max_age {
                debug!(file = %filename, "coredump_too_old");
                continue;
            }
            if metadata.len() > self.config.max_file_size {
                let file = coredump_from_parts(&path, parsed, metadata.len(), mod_time);
                self.skip(file, format!("size {} exceeds collector cap", metadata.len()));
                continue;
            }

            let mut file = coredump_from_parts(&path, parsed, metadata.len(), mod_time);
            correlate_with_instances(&mut file, &self.instances);
            self.emit(file, false);
        }
    }

    /// Low-latency path: after a panic restart, poll for a dump whose modtime
    /// lands near the restart. Gives up after the deadline; the periodic walk
    /// picks up stragglers.
    async fn targeted_collect(&mut self, event: &RestartEvent) {
        info!(
            pod = %event.pod_name,
            container = %event.container_name,
            "targeted_collection_started"
        );
        let deadline = tokio::time::Instant::now() + TARGETED_SEARCH_DEADLINE;

        loop {
            if let Some(mut file) = self.find_matching_dump(event) {
                file.pod_name = Some(event.pod_name.clone());
                file.pod_namespace = Some(event.namespace.clone());
                file.container_name = Some(event.container_name.clone());
                file.instance_name = Some(event.instance_name.clone());
                if file.signal == 0 {
                    file.signal = event.signal;
                }
                self.emit(file, true);
                return;
            }
            if tokio::time::Instant::now() + TARGETED_SEARCH_POLL > deadline {
                debug!(pod = %event.pod_name, "targeted_collection_found_nothing");
                return;
            }
            tokio::time::sleep(TARGETED_SEARCH_POLL).await;
        }
    }

    fn find_matching_dump(&self, event: &RestartEvent) -> Option<CoredumpFile> {
        let entries = std::fs::read_dir(&self.config.coredump_path).ok()?;
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if self.processed.contains(path.to_string_lossy().as_ref()) {
                continue;
            }
            let Some(parsed) = parse_core_filename(filename) else {
                continue;
            };
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if metadata.len() > self.config.max_file_size {
                continue;
            }
            let mod_time: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            if is_pod_related(
                &parsed.executable,
                mod_time,
                Some(event.restart_time),
                targeted_correlation_window(),
            ) {
                return Some(coredump_from_parts(&path, parsed, metadata.len(), mod_time));
            }
        }
        None
    }

    /// Mark processed, persist, and hand off. A full downstream channel drops
    /// the event with a warning; the record stays in the store. Targeted
    /// finds arrive already correlated and are flagged as such.
    fn emit(&mut self, file: CoredumpFile, targeted: bool) {
        self.processed.insert(file.path.clone());
        metrics::COREDUMPS_DISCOVERED.inc();

        if let Err(e) = self.db.upsert_coredump(&file) {
            warn!(path = %file.path, error = %e, "coredump_persist_failed");
        }

        info!(
            path = %file.path,
            executable = %file.executable,
            pid = file.pid,
            size = file.size,
            instance = file.instance_name.as_deref().unwrap_or("-"),
            targeted,
            "coredump_discovered"
        );

        let event = if targeted {
            CollectionEvent::FileProcessed(file)
        } else {
            CollectionEvent::FileDiscovered(file)
        };
        if let Err(e) = self.events_tx.try_send(event) {
            warn!(error = %e, "collection_event_dropped");
        }
    }

    /// Recoverable per-candidate failure: reported, not remembered, so the
    /// next walk retries it.
    fn fail(&mut self, mut file: CoredumpFile, error: String) {
        metrics::COREDUMPS_ERRORS.inc();
        file.state = CoredumpState::Error;
        file.error_message = Some(error.clone());
        warn!(path = %file.path, error = %error, "coredump_candidate_failed");
        if let Err(e) = self
            .events_tx
            .try_send(CollectionEvent::FileError { file, error })
        {
            warn!(error = %e, "collection_event_dropped");
        }
    }

    /// Candidates the collector itself rules out still leave a record, so the
    /// walk does not re-announce them every tick.
    fn skip(&mut self, mut file: CoredumpFile, reason: String) {
        self.processed.insert(file.path.clone());
        metrics::COREDUMPS_SKIPPED.inc();
        file.state = CoredumpState::Skipped;
        file.error_message = Some(reason.clone());
        if let Err(e) = self.db.upsert_coredump(&file) {
            warn!(path = %file.path, error = %e, "coredump_persist_failed");
        }
        info!(path = %file.path, reason = %reason, "coredump_skipped_by_collector");
        if let Err(e) = self
            .events_tx
            .try_send(CollectionEvent::FileSkipped { file, reason })
        {
            warn!(error = %e, "collection_event_dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /* ───── filename parsing ───── */

    #[test]
    fn test_parse_kernel_form() {
        let parsed = parse_core_filename("core.milvus.1000.1700000000.12345").unwrap();
        assert_eq!(parsed.executable, "milvus");
        assert_eq!(parsed.uid, 1000);
        assert_eq!(parsed.boot_id, None);
        assert_eq!(parsed.wall_time, 1_700_000_000);
        assert_eq!(parsed.pid, 12345);
    }

    #[test]
    fn test_parse_host_manager_form() {
        let parsed =
            parse_core_filename("core.milvus.1000.ab12cd34.1700000000.12345").unwrap();
        assert_eq!(parsed.boot_id.as_deref(), Some("ab12cd34"));
        assert_eq!(parsed.wall_time, 1_700_000_000);
        assert_eq!(parsed.pid, 12345);
    }

    #[test]
    fn test_parse_rejects_other_shapes() {
        assert!(parse_core_filename("core.milvus.1000.1700000000").is_none());
        assert!(parse_core_filename("dump.milvus.1000.1700000000.1").is_none());
        assert!(parse_core_filename("core.milvus.xx.1700000000.1").is_none());
        assert!(parse_core_filename("core.milvus.1000.notahex!.1700000000.1").is_none());
        assert!(parse_core_filename("random.txt").is_none());
    }

    #[test]
    fn test_filename_round_trip() {
        for name in [
            "core.milvus.1000.1700000000.12345",
            "core.etcd.0.deadbeef.1699999999.42",
        ] {
            let parsed = parse_core_filename(name).unwrap();
            assert_eq!(parsed.to_filename(), name);
        }
    }

    /* ───── correlation ───── */

    #[test]
    fn test_workload_executable_always_related() {
        let now = Utc::now();
        assert!(is_pod_related("milvus", now, None, walk_correlation_window()));
        assert!(is_pod_related(
            "milvus-standalone",
            now,
            None,
            walk_correlation_window()
        ));
    }

    #[test]
    fn test_unrelated_executable_needs_time_window() {
        let now = Utc::now();
        let recent = now - chrono::Duration::minutes(3);
        let stale = now - chrono::Duration::minutes(8);
        assert!(is_pod_related("etcd", now, Some(recent), walk_correlation_window()));
        assert!(!is_pod_related("etcd", now, Some(stale), walk_correlation_window()));
        assert!(!is_pod_related("etcd", now, None, walk_correlation_window()));
    }

    #[test]
    fn test_targeted_window_is_tighter() {
        let restart = Utc::now();
        let three_min_later = restart + chrono::Duration::minutes(3);
        assert!(!is_pod_related(
            "etcd",
            three_min_later,
            Some(restart),
            targeted_correlation_window()
        ));
        assert!(is_pod_related(
            "etcd",
            restart + chrono::Duration::seconds(90),
            Some(restart),
            targeted_correlation_window()
        ));
    }

    /* ───── coredump construction ───── */

    #[test]
    fn test_coredump_from_parts_uses_wall_time() {
        let parsed = parse_core_filename("core.milvus.1000.1700000000.12345").unwrap();
        let mod_time = Utc::now();
        let file = coredump_from_parts(Path::new("/d/core.milvus.1000.1700000000.12345"), parsed, 7, mod_time);
        assert_eq!(file.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(file.state, CoredumpState::Discovered);
        assert_eq!(file.filename, "core.milvus.1000.1700000000.12345");
        assert!(!file.has_pod_association());
    }
}
