use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::model::{
    AnalysisResults, CleanupTask, CoredumpFile, CoredumpState, RestartEvent, TaskStatus,
    WorkloadInstance,
};

/* ============================= SCHEMA ============================= */

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS instances (
    id              INTEGER PRIMARY KEY,
    name            TEXT NOT NULL UNIQUE,
    namespace       TEXT NOT NULL,
    deployment_kind TEXT NOT NULL,
    status          TEXT NOT NULL,
    labels          TEXT NOT NULL DEFAULT '{}',
    discovered_at   TEXT NOT NULL,
    last_seen       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pods (
    id             INTEGER PRIMARY KEY,
    name           TEXT NOT NULL,
    namespace      TEXT NOT NULL,
    instance_id    INTEGER NOT NULL REFERENCES instances(id) ON DELETE CASCADE,
    restart_count  INTEGER NOT NULL DEFAULT 0,
    last_restart   TEXT,
    UNIQUE(name, namespace)
);

CREATE TABLE IF NOT EXISTS coredumps (
    id             INTEGER PRIMARY KEY,
    path           TEXT NOT NULL UNIQUE,
    filename       TEXT NOT NULL,
    size           INTEGER NOT NULL,
    mod_time       TEXT NOT NULL,
    executable     TEXT NOT NULL,
    pid            INTEGER NOT NULL,
    uid            INTEGER NOT NULL,
    gid            INTEGER NOT NULL,
    signal         INTEGER NOT NULL,
    timestamp      TEXT NOT NULL,
    pod_name       TEXT,
    pod_namespace  TEXT,
    container_name TEXT,
    instance_name  TEXT,
    state          TEXT NOT NULL,
    value_score    REAL NOT NULL DEFAULT 0,
    error_message  TEXT,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS analyses (
    id            INTEGER PRIMARY KEY,
    coredump_id   INTEGER NOT NULL REFERENCES coredumps(id) ON DELETE CASCADE,
    stack_trace   TEXT NOT NULL,
    crash_reason  TEXT NOT NULL,
    crash_address TEXT NOT NULL,
    thread_count  INTEGER NOT NULL,
    details       TEXT NOT NULL,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS restart_events (
    id             INTEGER PRIMARY KEY,
    pod_name       TEXT NOT NULL,
    namespace      TEXT NOT NULL,
    container_name TEXT NOT NULL,
    restart_time   TEXT NOT NULL,
    exit_code      INTEGER NOT NULL,
    signal         INTEGER NOT NULL,
    reason         TEXT NOT NULL,
    message        TEXT NOT NULL,
    instance_name  TEXT NOT NULL,
    is_panic       INTEGER NOT NULL,
    created_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS storage_events (
    id          INTEGER PRIMARY KEY,
    coredump_id INTEGER REFERENCES coredumps(id) ON DELETE SET NULL,
    event_type  TEXT NOT NULL,
    stored_path TEXT NOT NULL,
    size        INTEGER NOT NULL DEFAULT 0,
    detail      TEXT,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cleanup_tasks (
    id            INTEGER PRIMARY KEY,
    task_id       TEXT NOT NULL UNIQUE,
    instance_name TEXT NOT NULL,
    namespace     TEXT NOT NULL,
    restart_count INTEGER NOT NULL,
    scheduled_at  TEXT NOT NULL,
    assigned_to   TEXT NOT NULL,
    status        TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS log_entries (
    id         INTEGER PRIMARY KEY,
    source     TEXT NOT NULL,
    level      TEXT NOT NULL,
    message    TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS metric_entries (
    id         INTEGER PRIMARY KEY,
    name       TEXT NOT NULL,
    labels     TEXT NOT NULL DEFAULT '{}',
    value      REAL NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS controller_state (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/* ============================= DATABASE ============================= */

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

/// Single-file embedded store shared by every stage of one process.
///
/// All multi-row writes go through one transaction. In steady state a failed
/// write is logged and skipped by the caller; the filesystem remains the
/// source of truth.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Database> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create database directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("cannot open database {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("cannot enable WAL journalling")?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("cannot enable foreign keys")?;
        conn.execute_batch(SCHEMA).context("cannot apply schema")?;
        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Database> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /* ============================= INSTANCES / PODS ============================= */

    /// Replace the stored view of one instance and its pods in a single
    /// transaction.
    pub fn sync_instance(&self, instance: &WorkloadInstance) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO instances (name, namespace, deployment_kind, status, labels, discovered_at, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(name) DO UPDATE SET
                 namespace = excluded.namespace,
                 deployment_kind = excluded.deployment_kind,
                 status = excluded.status,
                 labels = excluded.labels,
                 last_seen = excluded.last_seen",
            params![
                instance.name,
                instance.namespace,
                instance.kind.as_str(),
                instance.status.as_str(),
                serde_json::to_string(&instance.labels)?,
                ts(instance.discovered_at),
                ts(instance.last_seen),
            ],
        )?;
        let instance_id: i64 = tx.query_row(
            "SELECT id FROM instances WHERE name = ?1",
            params![instance.name],
            |row| row.get(0),
        )?;
        for pod in &instance.pods {
            tx.execute(
                "INSERT INTO pods (name, namespace, instance_id, restart_count, last_restart)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(name, namespace) DO UPDATE SET
                     instance_id = excluded.instance_id,
                     restart_count = excluded.restart_count,
                     last_restart = excluded.last_restart",
                params![
                    pod.name,
                    pod.namespace,
                    instance_id,
                    pod.restart_count,
                    pod.last_restart.map(ts),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Cascades to the instance's pods.
    pub fn delete_instance(&self, name: &str) -> Result<()> {
        self.lock()
            .execute("DELETE FROM instances WHERE name = ?1", params![name])?;
        Ok(())
    }

    pub fn instance_count(&self) -> Result<u64> {
        let count: i64 =
            self.lock()
                .query_row("SELECT COUNT(*) FROM instances", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /* ============================= RESTART EVENTS ============================= */

    pub fn insert_restart_event(&self, event: &RestartEvent) -> Result<()> {
        self.lock().execute(
            "INSERT INTO restart_events
                 (pod_name, namespace, container_name, restart_time, exit_code, signal,
                  reason, message, instance_name, is_panic, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                event.pod_name,
                event.namespace,
                event.container_name,
                ts(event.restart_time),
                event.exit_code,
                event.signal,
                event.reason,
                event.message,
                event.instance_name,
                event.is_panic as i64,
                ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /* ============================= COREDUMPS ============================= */

    pub fn upsert_coredump(&self, file: &CoredumpFile) -> Result<()> {
        self.lock().execute(
            "INSERT INTO coredumps
                 (path, filename, size, mod_time, executable, pid, uid, gid, signal, timestamp,
                  pod_name, pod_namespace, container_name, instance_name, state, value_score,
                  error_message, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
             ON CONFLICT(path) DO UPDATE SET
                 size = excluded.size,
                 mod_time = excluded.mod_time,
                 pod_name = excluded.pod_name,
                 pod_namespace = excluded.pod_namespace,
                 container_name = excluded.container_name,
                 instance_name = excluded.instance_name,
                 state = excluded.state,
                 value_score = excluded.value_score,
                 error_message = excluded.error_message,
                 updated_at = excluded.updated_at",
            params![
                file.path,
                file.filename,
                file.size as i64,
                ts(file.mod_time),
                file.executable,
                file.pid,
                file.uid,
                file.gid,
                file.signal,
                ts(file.timestamp),
                file.pod_name,
                file.pod_namespace,
                file.container_name,
                file.instance_name,
                file.state.as_str(),
                file.value_score,
                file.error_message,
                ts(file.created_at),
                ts(file.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Coredump update plus its analysis row, atomically.
    pub fn record_analysis(&self, file: &CoredumpFile, analysis: &AnalysisResults) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE coredumps SET state = ?1, value_score = ?2, signal = ?3, updated_at = ?4
             WHERE path = ?5",
            params![
                file.state.as_str(),
                file.value_score,
                file.signal,
                ts(Utc::now()),
                file.path,
            ],
        )?;
        let coredump_id: Option<i64> = tx
            .query_row(
                "SELECT id FROM coredumps WHERE path = ?1",
                params![file.path],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(coredump_id) = coredump_id {
            tx.execute(
                "INSERT INTO analyses
                     (coredump_id, stack_trace, crash_reason, crash_address, thread_count, details, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    coredump_id,
                    analysis.stack_trace,
                    analysis.crash_reason,
                    analysis.crash_address,
                    analysis.thread_count,
                    serde_json::to_string(analysis)?,
                    ts(Utc::now()),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn update_coredump_state(
        &self,
        path: &str,
        state: CoredumpState,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.lock().execute(
            "UPDATE coredumps SET state = ?1, error_message = ?2, updated_at = ?3 WHERE path = ?4",
            params![state.as_str(), error_message, ts(Utc::now()), path],
        )?;
        Ok(())
    }

    /// Paths already known to the store; seeds the collector's processed set
    /// across restarts.
    pub fn known_coredump_paths(&self) -> Result<HashSet<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT path FROM coredumps")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut paths = HashSet::new();
        for row in rows {
            paths.insert(row?);
        }
        Ok(paths)
    }

    pub fn coredump_count(&self) -> Result<u64> {
        let count: i64 =
            self.lock()
                .query_row("SELECT COUNT(*) FROM coredumps", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /* ============================= STORAGE EVENTS ============================= */

    pub fn insert_storage_event(
        &self,
        coredump_path: Option<&str>,
        event_type: &str,
        stored_path: &str,
        size: u64,
        detail: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock();
        let coredump_id: Option<i64> = match coredump_path {
            Some(path) => conn
                .query_row(
                    "SELECT id FROM coredumps WHERE path = ?1",
                    params![path],
                    |row| row.get(0),
                )
                .optional()?,
            None => None,
        };
        conn.execute(
            "INSERT INTO storage_events (coredump_id, event_type, stored_path, size, detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![coredump_id, event_type, stored_path, size as i64, detail, ts(Utc::now())],
        )?;
        Ok(())
    }

    /* ============================= CLEANUP TASKS ============================= */

    pub fn save_cleanup_task(&self, task: &CleanupTask) -> Result<()> {
        self.lock().execute(
            "INSERT INTO cleanup_tasks
                 (task_id, instance_name, namespace, restart_count, scheduled_at, assigned_to, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(task_id) DO UPDATE SET
                 restart_count = excluded.restart_count,
                 assigned_to = excluded.assigned_to,
                 status = excluded.status,
                 updated_at = excluded.updated_at",
            params![
                task.task_id(),
                task.instance_name,
                task.namespace,
                task.restart_count,
                ts(task.scheduled_at),
                task.assigned_to,
                task.status.as_str(),
                ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn load_open_cleanup_tasks(&self) -> Result<Vec<CleanupTask>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT instance_name, namespace, restart_count, scheduled_at, assigned_to, status
             FROM cleanup_tasks WHERE status IN ('pending', 'in_progress')",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        let mut tasks = Vec::new();
        for row in rows {
            let (instance_name, namespace, restart_count, scheduled_at, assigned_to, status) = row?;
            let status = match status.as_str() {
                "in_progress" => TaskStatus::InProgress,
                _ => TaskStatus::Pending,
            };
            tasks.push(CleanupTask {
                instance_name,
                namespace,
                restart_count,
                scheduled_at: parse_ts(&scheduled_at),
                assigned_to,
                status,
            });
        }
        Ok(tasks)
    }

    /* ============================= CONTROLLER SNAPSHOT ============================= */

    pub fn save_controller_snapshot(&self, key: &str, value: &str) -> Result<()> {
        self.lock().execute(
            "INSERT INTO controller_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, ts(Utc::now())],
        )?;
        Ok(())
    }

    pub fn load_controller_snapshot(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .lock()
            .query_row(
                "SELECT value FROM controller_state WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /* ============================= RETENTION ============================= */

    /// Delete event-shaped records older than the retention horizon, in one
    /// transaction. Instances, pods and coredump records live until their
    /// owners remove them.
    pub fn cleanup_old_records(&self, retention_days: u32) -> Result<u64> {
        let horizon = ts(Utc::now() - Duration::days(retention_days as i64));
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut deleted = 0u64;
        for table in ["restart_events", "storage_events", "log_entries", "metric_entries"] {
            let n = tx.execute(
                &format!("DELETE FROM {table} WHERE created_at < ?1"),
                params![horizon],
            )?;
            deleted += n as u64;
        }
        let n = tx.execute(
            "DELETE FROM cleanup_tasks
             WHERE status IN ('completed', 'failed') AND updated_at < ?1",
            params![horizon],
        )?;
        deleted += n as u64;
        tx.commit()?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeploymentKind, InstanceStatus, PodInfo};
    use std::collections::HashMap;

    fn make_instance(name: &str) -> WorkloadInstance {
        WorkloadInstance {
            name: name.to_string(),
            namespace: "ns1".to_string(),
            kind: DeploymentKind::Helm,
            labels: HashMap::new(),
            status: InstanceStatus::Running,
            discovered_at: Utc::now(),
            last_seen: Utc::now(),
            pods: vec![PodInfo {
                name: format!("{name}-pod-0"),
                namespace: "ns1".to_string(),
                instance_name: name.to_string(),
                restart_count: 2,
                last_restart: Some(Utc::now()),
                containers: vec![],
            }],
        }
    }

    fn make_coredump(path: &str) -> CoredumpFile {
        CoredumpFile {
            path: path.to_string(),
            filename: "core.milvus.1000.1700000000.12345".to_string(),
            size: 1024,
            mod_time: Utc::now(),
            executable: "milvus".to_string(),
            pid: 12345,
            uid: 1000,
            gid: 0,
            signal: 11,
            timestamp: Utc::now(),
            boot_id: None,
            pod_name: Some("p1".to_string()),
            pod_namespace: Some("ns1".to_string()),
            container_name: Some("c1".to_string()),
            instance_name: Some("rel1".to_string()),
            state: CoredumpState::Discovered,
            value_score: 0.0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            error_message: None,
            analysis: None,
        }
    }

    #[test]
    fn test_instance_sync_and_cascade_delete() {
        let db = Database::open_in_memory().unwrap();
        db.sync_instance(&make_instance("rel1")).unwrap();
        db.sync_instance(&make_instance("rel1")).unwrap();
        assert_eq!(db.instance_count().unwrap(), 1);

        db.delete_instance("rel1").unwrap();
        assert_eq!(db.instance_count().unwrap(), 0);
        let pods: i64 = db
            .lock()
            .query_row("SELECT COUNT(*) FROM pods", [], |row| row.get(0))
            .unwrap();
        assert_eq!(pods, 0, "pods should cascade with their instance");
    }

    #[test]
    fn test_coredump_path_unique() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_coredump(&make_coredump("/dumps/core.a")).unwrap();
        let mut updated = make_coredump("/dumps/core.a");
        updated.state = CoredumpState::Analyzed;
        db.upsert_coredump(&updated).unwrap();
        assert_eq!(db.coredump_count().unwrap(), 1);
        assert!(
            db.known_coredump_paths()
                .unwrap()
                .contains("/dumps/core.a")
        );
    }

    #[test]
    fn test_record_analysis_is_transactional() {
        let db = Database::open_in_memory().unwrap();
        let mut file = make_coredump("/dumps/core.b");
        db.upsert_coredump(&file).unwrap();

        file.state = CoredumpState::Analyzed;
        file.value_score = 8.5;
        let analysis = AnalysisResults {
            crash_reason: "Segmentation fault (SIGSEGV)".to_string(),
            thread_count: 12,
            ..Default::default()
        };
        db.record_analysis(&file, &analysis).unwrap();

        let (state, score): (String, f64) = db
            .lock()
            .query_row(
                "SELECT state, value_score FROM coredumps WHERE path = '/dumps/core.b'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(state, "analyzed");
        assert_eq!(score, 8.5);

        let analyses: i64 = db
            .lock()
            .query_row("SELECT COUNT(*) FROM analyses", [], |row| row.get(0))
            .unwrap();
        assert_eq!(analyses, 1);
    }

    #[test]
    fn test_storage_event_set_null_on_dump_delete() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_coredump(&make_coredump("/dumps/core.c")).unwrap();
        db.insert_storage_event(Some("/dumps/core.c"), "stored", "rel1/x.core.gz", 42, None)
            .unwrap();

        db.lock()
            .execute("DELETE FROM coredumps WHERE path = '/dumps/core.c'", [])
            .unwrap();

        let orphaned: Option<i64> = db
            .lock()
            .query_row("SELECT coredump_id FROM storage_events LIMIT 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(orphaned, None, "storage event should survive with NULL dump");
    }

    #[test]
    fn test_cleanup_old_records() {
        let db = Database::open_in_memory().unwrap();
        let old = ts(Utc::now() - Duration::days(30));
        db.lock()
            .execute(
                "INSERT INTO restart_events
                     (pod_name, namespace, container_name, restart_time, exit_code, signal,
                      reason, message, instance_name, is_panic, created_at)
                 VALUES ('p', 'ns', 'c', ?1, 0, 0, '', '', 'i', 0, ?1)",
                params![old],
            )
            .unwrap();
        let event = RestartEvent {
            pod_name: "p".to_string(),
            namespace: "ns".to_string(),
            container_name: "c".to_string(),
            restart_time: Utc::now(),
            exit_code: 139,
            signal: 11,
            reason: "Error".to_string(),
            message: String::new(),
            instance_name: "i".to_string(),
            is_panic: true,
        };
        db.insert_restart_event(&event).unwrap();

        let deleted = db.cleanup_old_records(7).unwrap();
        assert_eq!(deleted, 1, "only the old event should be removed");
    }

    #[test]
    fn test_cleanup_task_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let task = CleanupTask {
            instance_name: "rel1".to_string(),
            namespace: "ns1".to_string(),
            restart_count: 3,
            scheduled_at: Utc::now(),
            assigned_to: "node-a".to_string(),
            status: TaskStatus::Pending,
        };
        db.save_cleanup_task(&task).unwrap();
        let open = db.load_open_cleanup_tasks().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].task_id(), "ns1/rel1");
        assert_eq!(open[0].assigned_to, "node-a");

        let mut done = task.clone();
        done.status = TaskStatus::Completed;
        db.save_cleanup_task(&done).unwrap();
        assert!(db.load_open_cleanup_tasks().unwrap().is_empty());
    }

    #[test]
    fn test_controller_snapshot_round_trip() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.load_controller_snapshot("global").unwrap().is_none());
        db.save_controller_snapshot("global", r#"{"monthlyCost":1.5}"#)
            .unwrap();
        db.save_controller_snapshot("global", r#"{"monthlyCost":2.0}"#)
            .unwrap();
        assert_eq!(
            db.load_controller_snapshot("global").unwrap().as_deref(),
            Some(r#"{"monthlyCost":2.0}"#)
        );
    }
}
