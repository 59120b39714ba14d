use chrono::{DateTime, Utc};

use coredump_monitor::model::{CoredumpFile, CoredumpState};

/// A correlated coredump record the way the collector emits one for a
/// Milvus pod crash.
#[allow(dead_code)]
pub fn make_coredump(path: &str, size: u64, signal: i32, mod_time: DateTime<Utc>) -> CoredumpFile {
    let filename = path.rsplit('/').next().unwrap_or(path).to_string();
    CoredumpFile {
        path: path.to_string(),
        filename,
        size,
        mod_time,
        executable: "milvus".to_string(),
        pid: 12345,
        uid: 1000,
        gid: 0,
        signal,
        timestamp: mod_time,
        boot_id: None,
        pod_name: Some("p1".to_string()),
        pod_namespace: Some("ns1".to_string()),
        container_name: Some("c1".to_string()),
        instance_name: Some("rel1".to_string()),
        state: CoredumpState::Discovered,
        value_score: 0.0,
        created_at: mod_time,
        updated_at: mod_time,
        error_message: None,
        analysis: None,
    }
}

#[allow(dead_code)]
pub fn uncorrelated(mut file: CoredumpFile) -> CoredumpFile {
    file.pod_name = None;
    file.pod_namespace = None;
    file.container_name = None;
    file.instance_name = None;
    file
}
