use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client};
use kube_runtime::watcher::{Config as WatcherConfig, Event, watcher};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::db::Database;
use crate::metrics;
use crate::model::{
    ContainerStatusInfo, DeploymentKind, InstanceStatus, PodInfo, RestartEvent, WorkloadInstance,
};

/* ============================= PANIC CLASSIFICATION ============================= */

/// Termination reasons/messages that never count as a panic.
const PROBE_TOKENS: [&str; 3] = ["liveness", "readiness", "startup"];

/// Reason/message substrings that mark an abnormal termination.
const PANIC_TOKENS: [&str; 8] = [
    "panic",
    "sigsegv",
    "segmentation fault",
    "sigabrt",
    "core dumped",
    "fatal error",
    "stack overflow",
    "assert",
];

/// Signals that indicate a crash regardless of the reported reason.
const PANIC_SIGNALS: [i32; 3] = [11, 6, 8];

/// Exit codes of orderly termination (success, generic error, SIGINT, SIGTERM).
const NORMAL_EXIT_CODES: [i32; 4] = [0, 1, 130, 143];

/// Decide whether a container restart is a panic restart.
///
/// Probe-driven restarts are never panics, even when the exit code looks
/// abnormal.
pub fn classify_panic(reason: &str, message: &str, exit_code: i32, signal: i32) -> bool {
    let reason_lower = reason.to_lowercase();
    let message_lower = message.to_lowercase();
    if PROBE_TOKENS
        .iter()
        .any(|t| reason_lower.contains(t) || message_lower.contains(t))
    {
        return false;
    }
    let token_hit = PANIC_TOKENS
        .iter()
        .any(|t| reason_lower.contains(t) || message_lower.contains(t));
    token_hit || PANIC_SIGNALS.contains(&signal) || !NORMAL_EXIT_CODES.contains(&exit_code)
}

/* ============================= CLASSIFICATION ============================= */

/// A label requirement, either bare `key` or `key=value`.
fn label_matches(labels: &BTreeMap<String, String>, requirement: &str) -> bool {
    match requirement.split_once('=') {
        Some((key, value)) => labels.get(key).is_some_and(|v| v == value),
        None => labels.contains_key(requirement),
    }
}

fn all_labels_match(labels: &BTreeMap<String, String>, requirements: &[String]) -> bool {
    !requirements.is_empty() && requirements.iter().all(|r| label_matches(labels, r))
}

/// Classify a pod's deployment flavour. Helm wins ties because it is first in
/// declared order.
pub fn classify_pod(labels: &BTreeMap<String, String>, config: &DiscoveryConfig) -> Option<DeploymentKind> {
    if all_labels_match(labels, &config.helm_release_labels) {
        return Some(DeploymentKind::Helm);
    }
    if all_labels_match(labels, &config.operator_labels) {
        return Some(DeploymentKind::Operator);
    }
    None
}

/// The owning instance name: first present of the configured label list,
/// falling back to the pod name.
pub fn instance_name_for(labels: &BTreeMap<String, String>, pod_name: &str, config: &DiscoveryConfig) -> String {
    for label in &config.instance_name_labels {
        if let Some(value) = labels.get(label) {
            return value.clone();
        }
    }
    pod_name.to_string()
}

fn pod_labels(pod: &Pod) -> BTreeMap<String, String> {
    pod.metadata.labels.clone().unwrap_or_default()
}

fn instance_status(pods: &[PodInfo], phases: &HashMap<String, String>, terminating: bool) -> InstanceStatus {
    if terminating {
        return InstanceStatus::Terminating;
    }
    let mut any_failed = false;
    let mut all_running = !pods.is_empty();
    for pod in pods {
        match phases.get(&pod.name).map(String::as_str) {
            Some("Running") => {}
            Some("Failed") => {
                any_failed = true;
                all_running = false;
            }
            _ => all_running = false,
        }
    }
    if any_failed {
        InstanceStatus::Failed
    } else if all_running {
        InstanceStatus::Running
    } else {
        InstanceStatus::Pending
    }
}

/* ============================= INSTANCE MAP ============================= */

/// The published view of discovered instances, replaced wholesale on each
/// scan tick. Readers clone what they need and never hold the lock across an
/// await.
pub type InstanceMap = Arc<RwLock<HashMap<String, WorkloadInstance>>>;

pub fn new_instance_map() -> InstanceMap {
    Arc::new(RwLock::new(HashMap::new()))
}

pub fn lookup_instance(map: &InstanceMap, namespace: &str, name: &str) -> Option<WorkloadInstance> {
    let key = format!("{namespace}/{name}");
    match map.read() {
        Ok(guard) => guard.get(&key).cloned(),
        Err(_) => None,
    }
}

/* ============================= DISCOVERY ============================= */

pub struct Discovery {
    client: Client,
    config: DiscoveryConfig,
    db: Arc<Database>,
    instances: InstanceMap,
    restart_tx: mpsc::Sender<RestartEvent>,
}

impl Discovery {
    pub fn new(
        client: Client,
        config: DiscoveryConfig,
        db: Arc<Database>,
        instances: InstanceMap,
        restart_tx: mpsc::Sender<RestartEvent>,
    ) -> Discovery {
        Discovery {
            client,
            config,
            db,
            instances,
            restart_tx,
        }
    }

    /// Periodic namespace scan. Runs once immediately, then on every tick.
    /// List errors are logged and retried next tick; they never abort the
    /// component.
    pub async fn run_scan_loop(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.scan_interval);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("discovery_scan_stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_once().await {
                        warn!(error = %e, "discovery_scan_failed");
                    }
                }
            }
        }
    }

    async fn scan_once(&self) -> Result<()> {
        let now = Utc::now();
        let mut fresh: HashMap<String, WorkloadInstance> = HashMap::new();

        for namespace in &self.config.namespaces {
            let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
            let pod_list = match pods.list(&ListParams::default()).await {
                Ok(list) => list,
                Err(e) => {
                    warn!(namespace = %namespace, error = %e, "pod_list_failed");
                    continue;
                }
            };

            let mut phases: HashMap<String, String> = HashMap::new();
            let mut terminating: HashMap<String, bool> = HashMap::new();

            for pod in pod_list.items {
                let labels = pod_labels(&pod);
                let Some(kind) = classify_pod(&labels, &self.config) else {
                    continue;
                };
                let pod_name = pod.metadata.name.clone().unwrap_or_default();
                let instance_name = instance_name_for(&labels, &pod_name, &self.config);
                let key = format!("{namespace}/{instance_name}");

                if let Some(status) = &pod.status {
                    if let Some(phase) = &status.phase {
                        phases.insert(pod_name.clone(), phase.clone());
                    }
                }
                terminating.insert(key.clone(), pod.metadata.deletion_timestamp.is_some());

                let info = build_pod_info(&pod, namespace, &instance_name);
                let entry = fresh.entry(key).or_insert_with(|| WorkloadInstance {
                    name: instance_name.clone(),
                    namespace: namespace.clone(),
                    kind,
                    labels: labels.clone().into_iter().collect(),
                    status: InstanceStatus::Pending,
                    discovered_at: now,
                    last_seen: now,
                    pods: Vec::new(),
                });
                entry.last_seen = now;
                entry.pods.push(info);
            }

            for instance in fresh.values_mut().filter(|i| i.namespace == *namespace) {
                let key = instance.key();
                instance.status = instance_status(
                    &instance.pods,
                    &phases,
                    terminating.get(&key).copied().unwrap_or(false),
                );
            }
        }

        // Carry over recently seen instances that this scan missed; drop the
        // ones past the staleness window.
        let stale_after =
            chrono::Duration::from_std(self.config.stale_after).unwrap_or(chrono::Duration::zero());
        let previous: Vec<WorkloadInstance> = match self.instances.read() {
            Ok(guard) => guard.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        for old in previous {
            let key = old.key();
            if fresh.contains_key(&key) {
                if let Some(existing) = fresh.get_mut(&key) {
                    existing.discovered_at = old.discovered_at;
                }
            } else if now.signed_duration_since(old.last_seen) <= stale_after {
                fresh.insert(key, old);
            } else {
                info!(instance = %old.name, namespace = %old.namespace, "instance_stale_dropped");
            }
        }

        for instance in fresh.values() {
            if let Err(e) = self.db.sync_instance(instance) {
                warn!(instance = %instance.name, error = %e, "instance_persist_failed");
            }
        }

        publish_instance_metrics(&fresh);

        let count = fresh.len();
        if let Ok(mut guard) = self.instances.write() {
            *guard = fresh;
        }
        debug!(instances = count, "discovery_scan_complete");
        Ok(())
    }

    /// Watch pods for container restarts. One watcher per namespace; the
    /// informer re-lists on connection loss.
    pub async fn run_restart_watch(&self, namespace: String, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        let mut stream = watcher(pods, WatcherConfig::default()).boxed();

        // container restart counts per pod, keyed by pod name
        let mut snapshots: HashMap<String, HashMap<String, i32>> = HashMap::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(namespace = %namespace, "restart_watch_stopped");
                    return Ok(());
                }
                event = stream.next() => {
                    match event {
                        Some(Ok(Event::Applied(pod))) => {
                            self.handle_pod_update(&namespace, &pod, &mut snapshots);
                        }
                        Some(Ok(Event::Deleted(pod))) => {
                            if let Some(name) = &pod.metadata.name {
                                snapshots.remove(name);
                            }
                        }
                        Some(Ok(Event::Restarted(pods))) => {
                            // Re-list after reconnect: re-prime counters without
                            // emitting events for restarts we may have missed.
                            snapshots.clear();
                            for pod in &pods {
                                if let Some(name) = &pod.metadata.name {
                                    snapshots.insert(name.clone(), container_restart_counts(pod));
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!(namespace = %namespace, error = %e, "restart_watch_error");
                        }
                        None => {
                            warn!(namespace = %namespace, "restart_watch_stream_ended");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn handle_pod_update(
        &self,
        namespace: &str,
        pod: &Pod,
        snapshots: &mut HashMap<String, HashMap<String, i32>>,
    ) {
        let labels = pod_labels(pod);
        if classify_pod(&labels, &self.config).is_none() {
            return;
        }
        let pod_name = pod.metadata.name.clone().unwrap_or_default();
        let instance_name = instance_name_for(&labels, &pod_name, &self.config);

        let current = container_restart_counts(pod);
        let previous = snapshots.insert(pod_name.clone(), current.clone());
        let Some(previous) = previous else {
            return; // first sighting; nothing to compare against
        };

        let Some(status) = &pod.status else { return };
        let Some(container_statuses) = &status.container_statuses else {
            return;
        };

        for cs in container_statuses {
            let old = previous.get(&cs.name).copied().unwrap_or(0);
            if cs.restart_count <= old {
                continue;
            }

            let (exit_code, signal, reason, message, finished_at) = cs
                .last_state
                .as_ref()
                .and_then(|s| s.terminated.as_ref())
                .map(|t| {
                    (
                        t.exit_code,
                        t.signal.unwrap_or(0),
                        t.reason.clone().unwrap_or_default(),
                        t.message.clone().unwrap_or_default(),
                        t.finished_at.as_ref().map(|f| f.0),
                    )
                })
                .unwrap_or((0, 0, String::new(), String::new(), None));

            let event = RestartEvent {
                pod_name: pod_name.clone(),
                namespace: namespace.to_string(),
                container_name: cs.name.clone(),
                restart_time: finished_at.unwrap_or_else(Utc::now),
                exit_code,
                signal,
                reason: reason.clone(),
                message: message.clone(),
                instance_name: instance_name.clone(),
                is_panic: classify_panic(&reason, &message, exit_code, signal),
            };

            info!(
                pod = %event.pod_name,
                container = %event.container_name,
                restarts = cs.restart_count,
                exit_code = event.exit_code,
                signal = event.signal,
                is_panic = event.is_panic,
                "container_restart_detected"
            );

            if let Err(e) = self.db.insert_restart_event(&event) {
                warn!(error = %e, "restart_event_persist_failed");
            }

            // Non-blocking producer: a full channel drops the event. The
            // periodic scans downstream resynchronize.
            if let Err(e) = self.restart_tx.try_send(event) {
                warn!(error = %e, "restart_event_dropped");
            }
        }
    }
}

fn container_restart_counts(pod: &Pod) -> HashMap<String, i32> {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .map(|cs| (cs.name.clone(), cs.restart_count))
                .collect()
        })
        .unwrap_or_default()
}

fn build_pod_info(pod: &Pod, namespace: &str, instance_name: &str) -> PodInfo {
    let mut containers = Vec::new();
    let mut total_restarts = 0;
    let mut last_restart: Option<DateTime<Utc>> = None;

    if let Some(status) = &pod.status
        && let Some(container_statuses) = &status.container_statuses
    {
        for cs in container_statuses {
            total_restarts += cs.restart_count;
            let terminated = cs.last_state.as_ref().and_then(|s| s.terminated.as_ref());
            if let Some(finished) = terminated.and_then(|t| t.finished_at.as_ref()) {
                let finished = finished.0;
                if last_restart.is_none_or(|prev| finished > prev) {
                    last_restart = Some(finished);
                }
            }
            containers.push(ContainerStatusInfo {
                name: cs.name.clone(),
                ready: cs.ready,
                restart_count: cs.restart_count,
                last_termination_reason: terminated.and_then(|t| t.reason.clone()),
                last_termination_message: terminated.and_then(|t| t.message.clone()),
                exit_code: terminated.map(|t| t.exit_code),
                signal: terminated.and_then(|t| t.signal),
            });
        }
    }

    PodInfo {
        name: pod.metadata.name.clone().unwrap_or_default(),
        namespace: namespace.to_string(),
        instance_name: instance_name.to_string(),
        restart_count: total_restarts,
        last_restart,
        containers,
    }
}

fn publish_instance_metrics(instances: &HashMap<String, WorkloadInstance>) {
    metrics::MILVUS_INSTANCES.reset();
    let mut counts: HashMap<(String, &'static str, &'static str), i64> = HashMap::new();
    for instance in instances.values() {
        *counts
            .entry((
                instance.namespace.clone(),
                instance.kind.as_str(),
                instance.status.as_str(),
            ))
            .or_insert(0) += 1;
    }
    for ((namespace, kind, status), count) in counts {
        metrics::MILVUS_INSTANCES
            .with_label_values(&[namespace.as_str(), kind, status])
            .set(count);
    }
}
