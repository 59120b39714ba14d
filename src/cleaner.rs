use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, ListParams};
use kube::{Api, Client};
use tokio::sync::{Mutex, broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::agent_client::ControllerClient;
use crate::config::CleanerConfig;
use crate::db::Database;
use crate::discovery::{InstanceMap, lookup_instance};
use crate::metrics;
use crate::model::{
    CleanupTask, DeploymentKind, RestartEvent, StorageEvent, TaskStatus,
};

/* ============================= TRACKERS ============================= */

/// Trackers idle for this long are garbage collected.
const TRACKER_IDLE_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct RestartTracker {
    pub count: u32,
    pub first_restart: DateTime<Utc>,
    pub last_restart: DateTime<Utc>,
    pub cleaned: bool,
}

/// Sliding-window update for one panic restart. A window that has expired
/// starts counting from one again; `cleaned` survives resets so a
/// decommissioned instance is not acted on twice.
pub fn observe_panic_restart(
    trackers: &mut HashMap<String, RestartTracker>,
    key: &str,
    event_time: DateTime<Utc>,
    window: chrono::Duration,
) -> u32 {
    match trackers.get_mut(key) {
        Some(tracker) => {
            if event_time.signed_duration_since(tracker.first_restart) > window {
                tracker.count = 1;
                tracker.first_restart = event_time;
            } else {
                tracker.count += 1;
            }
            tracker.last_restart = event_time;
            tracker.count
        }
        None => {
            trackers.insert(
                key.to_string(),
                RestartTracker {
                    count: 1,
                    first_restart: event_time,
                    last_restart: event_time,
                    cleaned: false,
                },
            );
            1
        }
    }
}

/// Drop trackers whose last restart is older than the idle horizon.
pub fn gc_trackers(trackers: &mut HashMap<String, RestartTracker>, now: DateTime<Utc>) -> usize {
    let before = trackers.len();
    trackers.retain(|_, t| {
        now.signed_duration_since(t.last_restart) <= chrono::Duration::hours(TRACKER_IDLE_HOURS)
    });
    before - trackers.len()
}

/* ============================= CLEANER ============================= */

pub struct Cleaner {
    config: CleanerConfig,
    client: Client,
    db: Arc<Database>,
    controller: Option<Arc<ControllerClient>>,
    instances: InstanceMap,
    node_name: String,
    trackers: Mutex<HashMap<String, RestartTracker>>,
}

impl Cleaner {
    pub fn new(
        config: CleanerConfig,
        client: Client,
        db: Arc<Database>,
        controller: Option<Arc<ControllerClient>>,
        instances: InstanceMap,
        node_name: String,
    ) -> Cleaner {
        Cleaner {
            config,
            client,
            db,
            controller,
            instances,
            node_name,
            trackers: Mutex::new(HashMap::new()),
        }
    }

    /// Consume panic restarts and storage events; garbage collect hourly.
    /// The whole component is a no-op when disabled.
    pub async fn run(
        self: Arc<Self>,
        mut restart_rx: mpsc::Receiver<RestartEvent>,
        mut storage_rx: mpsc::Receiver<StorageEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        if !self.config.enabled {
            info!("cleaner_disabled");
            let _ = shutdown.recv().await;
            return;
        }
        let mut gc_ticker = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("cleaner_stopped");
                    return;
                }
                _ = gc_ticker.tick() => {
                    let mut trackers = self.trackers.lock().await;
                    let removed = gc_trackers(&mut trackers, Utc::now());
                    if removed > 0 {
                        debug!(removed, "cleaner_trackers_gc");
                    }
                }
                event = restart_rx.recv() => {
                    match event {
                        Some(event) if event.is_panic => {
                            self.clone().handle_panic(&event).await;
                        }
                        Some(_) => {}
                        None => {
                            info!("cleaner_restart_channel_closed");
                            return;
                        }
                    }
                }
                event = storage_rx.recv() => {
                    match event {
                        Some(StorageEvent::FileStored { file, .. }) => {
                            if let (Some(namespace), Some(instance)) =
                                (file.pod_namespace.clone(), file.instance_name.clone())
                            {
                                self.clone().reevaluate(&namespace, &instance).await;
                            }
                        }
                        Some(_) => {}
                        None => {
                            info!("cleaner_storage_channel_closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn handle_panic(self: Arc<Self>, event: &RestartEvent) {
        let key = format!("{}/{}", event.namespace, event.instance_name);
        let window = chrono::Duration::from_std(self.config.restart_time_window)
            .unwrap_or_else(|_| chrono::Duration::minutes(10));

        let (count, cleaned) = {
            let mut trackers = self.trackers.lock().await;
            let count = observe_panic_restart(&mut trackers, &key, event.restart_time, window);
            let cleaned = trackers.get(&key).map(|t| t.cleaned).unwrap_or(false);
            (count, cleaned)
        };

        metrics::RESTART_COUNTS
            .with_label_values(&[event.instance_name.as_str(), event.namespace.as_str()])
            .set(count as i64);

        debug!(
            instance = %event.instance_name,
            namespace = %event.namespace,
            count,
            "panic_restart_counted"
        );

        if count >= self.config.max_restart_count && !cleaned {
            self.schedule_cleanup(
                event.namespace.clone(),
                event.instance_name.clone(),
                count,
                self.config.cleanup_delay,
            );
        }
    }

    /// Storage cross-signal: a freshly stored dump for an instance already
    /// over the threshold triggers cleanup without waiting for another
    /// restart.
    async fn reevaluate(self: Arc<Self>, namespace: &str, instance: &str) {
        let key = format!("{namespace}/{instance}");
        let over_threshold = {
            let trackers = self.trackers.lock().await;
            trackers
                .get(&key)
                .map(|t| t.count >= self.config.max_restart_count && !t.cleaned)
                .unwrap_or(false)
        };
        if over_threshold {
            info!(instance = %instance, namespace = %namespace, "cleanup_reevaluated_after_store");
            let count = {
                let trackers = self.trackers.lock().await;
                trackers.get(&key).map(|t| t.count).unwrap_or(0)
            };
            self.schedule_cleanup(
                namespace.to_string(),
                instance.to_string(),
                count,
                std::time::Duration::ZERO,
            );
        }
    }

    fn schedule_cleanup(
        self: &Arc<Self>,
        namespace: String,
        instance: String,
        count: u32,
        delay: std::time::Duration,
    ) {
        info!(
            instance = %instance,
            namespace = %namespace,
            restarts = count,
            delay_secs = delay.as_secs(),
            "cleanup_scheduled"
        );
        let cleaner = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            cleaner.attempt_cleanup(&namespace, &instance, count).await;
        });
    }

    async fn attempt_cleanup(&self, namespace: &str, instance: &str, count: u32) {
        let key = format!("{namespace}/{instance}");

        // Claim the tracker before acting; a concurrent schedule for the same
        // key finds `cleaned` already set and backs off.
        {
            let mut trackers = self.trackers.lock().await;
            let Some(tracker) = trackers.get_mut(&key) else {
                return;
            };
            if tracker.cleaned || tracker.count < self.config.max_restart_count {
                return;
            }
            tracker.cleaned = true;
        }

        // Never act unilaterally: a missing or unreachable controller defers
        // to the next panic.
        let decision = match &self.controller {
            Some(controller) => {
                let kind = self.deployment_kind(namespace, instance);
                controller
                    .request_cleanup(&self.node_name, instance, namespace, count, kind.as_str())
                    .await
            }
            None => {
                self.rollback(&key).await;
                debug!(instance = %instance, "cleanup_skipped_no_controller");
                return;
            }
        };

        match decision {
            Ok(decision) if decision.allowed => {}
            Ok(decision) => {
                info!(
                    instance = %instance,
                    reason = %decision.reason,
                    assigned_to = %decision.assigned_to.unwrap_or_default(),
                    "cleanup_denied"
                );
                metrics::CLEANUP_ERRORS.inc();
                self.rollback(&key).await;
                return;
            }
            Err(e) => {
                warn!(instance = %instance, error = %e, "controller_unreachable_cleanup_deferred");
                self.rollback(&key).await;
                return;
            }
        }

        let task = CleanupTask {
            instance_name: instance.to_string(),
            namespace: namespace.to_string(),
            restart_count: count,
            scheduled_at: Utc::now(),
            assigned_to: self.node_name.clone(),
            status: TaskStatus::InProgress,
        };
        if let Err(e) = self.db.save_cleanup_task(&task) {
            warn!(error = %e, "cleanup_task_persist_failed");
        }

        match self.decommission(namespace, instance).await {
            Ok(()) => {
                metrics::INSTANCES_UNINSTALLED.inc();
                info!(instance = %instance, namespace = %namespace, "instance_decommissioned");
                let mut done = task;
                done.status = TaskStatus::Completed;
                if let Err(e) = self.db.save_cleanup_task(&done) {
                    warn!(error = %e, "cleanup_task_persist_failed");
                }
                if let Err(e) = self.db.delete_instance(instance) {
                    warn!(error = %e, "instance_delete_failed");
                }
            }
            Err(e) => {
                metrics::CLEANUP_ERRORS.inc();
                warn!(instance = %instance, error = %e, "decommission_failed");
                let mut failed = task;
                failed.status = TaskStatus::Failed;
                if let Err(db_err) = self.db.save_cleanup_task(&failed) {
                    warn!(error = %db_err, "cleanup_task_persist_failed");
                }
                self.rollback(&key).await;
            }
        }
    }

    async fn rollback(&self, key: &str) {
        let mut trackers = self.trackers.lock().await;
        if let Some(tracker) = trackers.get_mut(key) {
            tracker.cleaned = false;
        }
    }

    fn deployment_kind(&self, namespace: &str, instance: &str) -> DeploymentKind {
        lookup_instance(&self.instances, namespace, instance)
            .map(|i| i.kind)
            .unwrap_or(DeploymentKind::Helm)
    }

    async fn decommission(&self, namespace: &str, instance: &str) -> Result<()> {
        match self.deployment_kind(namespace, instance) {
            DeploymentKind::Helm => self.helm_uninstall(namespace, instance).await,
            DeploymentKind::Operator => self.operator_delete(namespace, instance).await,
        }
    }

    /// `helm uninstall <release> -n <namespace>`; an already-removed release
    /// is a success.
    async fn helm_uninstall(&self, namespace: &str, release: &str) -> Result<()> {
        let output = tokio::time::timeout(
            self.config.uninstall_timeout,
            tokio::process::Command::new(&self.config.helm_path)
                .args(["uninstall", release, "-n", namespace])
                .kill_on_drop(true)
                .output(),
        )
        .await
        .context("helm uninstall timed out")?
        .context("helm did not run")?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.to_lowercase().contains("not found") {
            info!(release = %release, "helm_release_already_gone");
            return Ok(());
        }
        bail!("helm uninstall failed: {}", stderr.trim());
    }

    /// Delete every pod and deployment labelled with the instance name.
    async fn operator_delete(&self, namespace: &str, instance: &str) -> Result<()> {
        let selector = format!("{}={}", self.config.instance_label, instance);
        let lp = ListParams::default().labels(&selector);
        let dp = DeleteParams::default();

        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        let delete_all = async {
            deployments
                .delete_collection(&dp, &lp)
                .await
                .context("deployment deletion failed")?;
            pods.delete_collection(&dp, &lp)
                .await
                .context("pod deletion failed")?;
            Ok::<(), anyhow::Error>(())
        };

        tokio::time::timeout(self.config.uninstall_timeout, delete_all)
            .await
            .context("operator deletion timed out")?
    }
}
