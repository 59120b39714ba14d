use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::db::Database;
use crate::metrics;
use crate::model::{AgentInfo, AgentStatus, CleanupTask, TaskStatus};

/* ============================= WIRE TYPES ============================= */

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiAnalysisRequest {
    pub node_name: String,
    pub coredump_path: String,
    pub value_score: f64,
    pub estimated_cost: f64,
    #[serde(default)]
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiAnalysisResponse {
    pub allowed: bool,
    pub reason: String,
    pub remaining_cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupRequest {
    pub node_name: String,
    pub instance_name: String,
    pub namespace: String,
    pub restart_count: u32,
    pub deployment_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub allowed: bool,
    pub reason: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub node_name: String,
    pub version: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub acknowledged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub global: GlobalState,
    pub agents: HashMap<String, AgentInfo>,
}

/* ============================= GLOBAL STATE ============================= */

/// Cluster-wide soft state. Snapshotted to the store on shutdown and
/// reloaded opportunistically on start; losing one snapshot interval of
/// counter increments is acceptable because the limits are conservative
/// caps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalState {
    pub monthly_cost: f64,
    pub hourly_count: u32,
    pub hourly_reset: Option<DateTime<Utc>>,
    pub last_monthly_reset: Option<DateTime<Utc>>,
    pub total_ai_analyses: u64,
    pub cleanup_tasks: HashMap<String, CleanupTask>,
    pub completed_cleanups: Vec<CleanupTask>,
}

const COMPLETED_CLEANUP_HISTORY: usize = 100;
const SNAPSHOT_KEY: &str = "global";

/* ============================= CONTROLLER ============================= */

pub struct Controller {
    config: ControllerConfig,
    state: RwLock<GlobalState>,
    agents: RwLock<HashMap<String, AgentInfo>>,
    db: Arc<Database>,
}

impl Controller {
    pub fn new(config: ControllerConfig, db: Arc<Database>) -> Controller {
        let mut state = match db.load_controller_snapshot(SNAPSHOT_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<GlobalState>(&raw) {
                Ok(state) => {
                    info!(
                        monthly_cost = state.monthly_cost,
                        open_tasks = state.cleanup_tasks.len(),
                        "controller_state_restored"
                    );
                    state
                }
                Err(e) => {
                    warn!(error = %e, "controller_snapshot_unreadable_starting_fresh");
                    GlobalState::default()
                }
            },
            Ok(None) => GlobalState::default(),
            Err(e) => {
                warn!(error = %e, "controller_snapshot_load_failed");
                GlobalState::default()
            }
        };

        // Leases written after the last snapshot survive through the store.
        match db.load_open_cleanup_tasks() {
            Ok(tasks) => {
                for task in tasks {
                    state.cleanup_tasks.entry(task.task_id()).or_insert(task);
                }
            }
            Err(e) => warn!(error = %e, "open_cleanup_tasks_load_failed"),
        }

        Controller {
            config,
            state: RwLock::new(state),
            agents: RwLock::new(HashMap::new()),
            db,
        }
    }

    fn state_write(&self) -> std::sync::RwLockWriteGuard<'_, GlobalState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn state_read(&self) -> std::sync::RwLockReadGuard<'_, GlobalState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /* ============================= AI ARBITRATION ============================= */

    pub fn decide_ai(&self, request: &AiAnalysisRequest) -> AiAnalysisResponse {
        self.decide_ai_at(request, Utc::now())
    }

    /// Decision order: global switch, monthly budget, hourly rate, allow.
    /// State is mutated only in the accepting branch, so transport retries
    /// of denied requests are harmless.
    pub fn decide_ai_at(&self, request: &AiAnalysisRequest, now: DateTime<Utc>) -> AiAnalysisResponse {
        let mut state = self.state_write();
        roll_counters(&mut state, now);

        if !self.config.ai_analysis_enabled {
            return AiAnalysisResponse {
                allowed: false,
                reason: "AI analysis is disabled globally".to_string(),
                remaining_cost: self.config.max_cost_per_month - state.monthly_cost,
            };
        }

        let remaining = self.config.max_cost_per_month - state.monthly_cost;
        if state.monthly_cost + request.estimated_cost > self.config.max_cost_per_month {
            return AiAnalysisResponse {
                allowed: false,
                reason: format!("Monthly cost limit would be exceeded (remaining: ${remaining:.2})"),
                remaining_cost: remaining,
            };
        }

        if state.hourly_count >= self.config.max_analysis_per_hour {
            return AiAnalysisResponse {
                allowed: false,
                reason: format!(
                    "Hourly analysis limit of {} reached",
                    self.config.max_analysis_per_hour
                ),
                remaining_cost: remaining,
            };
        }

        state.monthly_cost += request.estimated_cost;
        state.hourly_count += 1;
        state.total_ai_analyses += 1;
        if state.hourly_reset.is_none() {
            state.hourly_reset = Some(now);
        }
        metrics::CONTROLLER_AI_COST_MONTHLY.set(state.monthly_cost);
        metrics::CONTROLLER_AI_ANALYSES.inc();

        debug!(
            node = %request.node_name,
            path = %request.coredump_path,
            cost = request.estimated_cost,
            monthly = state.monthly_cost,
            "ai_analysis_approved"
        );

        AiAnalysisResponse {
            allowed: true,
            reason: "approved".to_string(),
            remaining_cost: self.config.max_cost_per_month - state.monthly_cost,
        }
    }

    /* ============================= CLEANUP ARBITRATION ============================= */

    pub fn decide_cleanup(&self, request: &CleanupRequest) -> CleanupResponse {
        self.decide_cleanup_at(request, Utc::now())
    }

    pub fn decide_cleanup_at(&self, request: &CleanupRequest, now: DateTime<Utc>) -> CleanupResponse {
        if !self.config.cleanup_enabled {
            return CleanupResponse {
                allowed: false,
                reason: "cleanup is disabled globally".to_string(),
                task_id: None,
                assigned_to: None,
            };
        }

        if request.restart_count < self.config.max_restart_count {
            return CleanupResponse {
                allowed: false,
                reason: format!(
                    "restart count {} below global threshold {}",
                    request.restart_count, self.config.max_restart_count
                ),
                task_id: None,
                assigned_to: None,
            };
        }

        let key = format!("{}/{}", request.namespace, request.instance_name);
        let mut state = self.state_write();

        if let Some(existing) = state.cleanup_tasks.get(&key)
            && existing.status.is_open()
        {
            return CleanupResponse {
                allowed: false,
                reason: "a cleanup task for this instance is already pending".to_string(),
                task_id: Some(key),
                assigned_to: Some(existing.assigned_to.clone()),
            };
        }

        let task = CleanupTask {
            instance_name: request.instance_name.clone(),
            namespace: request.namespace.clone(),
            restart_count: request.restart_count,
            scheduled_at: now,
            assigned_to: request.node_name.clone(),
            status: TaskStatus::Pending,
        };
        if let Err(e) = self.db.save_cleanup_task(&task) {
            warn!(error = %e, "cleanup_task_persist_failed");
        }
        state.cleanup_tasks.insert(key.clone(), task);
        metrics::CONTROLLER_PENDING_CLEANUPS.set(open_task_count(&state) as i64);

        info!(
            node = %request.node_name,
            instance = %request.instance_name,
            namespace = %request.namespace,
            "cleanup_approved"
        );

        CleanupResponse {
            allowed: true,
            reason: "approved".to_string(),
            task_id: Some(key),
            assigned_to: Some(request.node_name.clone()),
        }
    }

    /* ============================= HEARTBEATS ============================= */

    pub fn heartbeat(&self, request: &HeartbeatRequest) -> HeartbeatResponse {
        self.heartbeat_at(request, Utc::now())
    }

    pub fn heartbeat_at(&self, request: &HeartbeatRequest, now: DateTime<Utc>) -> HeartbeatResponse {
        let mut agents = match self.agents.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        agents.insert(
            request.node_name.clone(),
            AgentInfo {
                last_heartbeat: now,
                version: request.version.clone(),
                status: AgentStatus::Active,
            },
        );
        metrics::HEARTBEATS_RECEIVED
            .with_label_values(&[request.node_name.as_str()])
            .inc();
        metrics::CONTROLLER_ACTIVE_AGENTS.set(
            agents
                .values()
                .filter(|a| a.status == AgentStatus::Active)
                .count() as i64,
        );
        HeartbeatResponse { acknowledged: true }
    }

    /* ============================= STATS ============================= */

    pub fn stats(&self) -> StatsResponse {
        let state = self.state_read().clone();
        let agents = match self.agents.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        StatsResponse {
            global: state,
            agents,
        }
    }

    /* ============================= BACKGROUND LOOPS ============================= */

    /// Hourly: monthly rollover, history trim, stale-lease expiry.
    pub async fn run_maintenance(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(3600));
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = ticker.tick() => self.maintenance_tick(Utc::now()),
            }
        }
    }

    pub fn maintenance_tick(&self, now: DateTime<Utc>) {
        let mut state = self.state_write();
        roll_counters(&mut state, now);

        if state.completed_cleanups.len() > COMPLETED_CLEANUP_HISTORY {
            let excess = state.completed_cleanups.len() - COMPLETED_CLEANUP_HISTORY;
            state.completed_cleanups.drain(..excess);
        }

        // Open leases whose agent never finished expire after an hour so the
        // instance can be retried.
        let stale: Vec<String> = state
            .cleanup_tasks
            .iter()
            .filter(|(_, task)| {
                task.status.is_open()
                    && now.signed_duration_since(task.scheduled_at) > chrono::Duration::hours(1)
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            if let Some(mut task) = state.cleanup_tasks.remove(&key) {
                info!(task = %key, "cleanup_lease_expired");
                task.status = TaskStatus::Failed;
                if let Err(e) = self.db.save_cleanup_task(&task) {
                    warn!(error = %e, "cleanup_task_persist_failed");
                }
                state.completed_cleanups.push(task);
            }
        }

        metrics::CONTROLLER_PENDING_CLEANUPS.set(open_task_count(&state) as i64);
        metrics::CONTROLLER_AI_COST_MONTHLY.set(state.monthly_cost);
    }

    /// Every 30 s: agents silent past twice the heartbeat interval go
    /// inactive.
    pub async fn run_agent_health(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = ticker.tick() => self.agent_health_tick(Utc::now()),
            }
        }
    }

    pub fn agent_health_tick(&self, now: DateTime<Utc>) {
        let deadline = chrono::Duration::from_std(self.config.heartbeat_interval * 2)
            .unwrap_or_else(|_| chrono::Duration::minutes(2));
        let mut agents = match self.agents.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut active = 0i64;
        for (node, agent) in agents.iter_mut() {
            if now.signed_duration_since(agent.last_heartbeat) > deadline {
                if agent.status == AgentStatus::Active {
                    info!(node = %node, "agent_marked_inactive");
                }
                agent.status = AgentStatus::Inactive;
            }
            if agent.status == AgentStatus::Active {
                active += 1;
            }
        }
        metrics::CONTROLLER_ACTIVE_AGENTS.set(active);
    }

    /// Every 5 min: recompute aggregate totals from the store.
    pub async fn run_stats_refresh(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(300));
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = ticker.tick() => {
                    match (self.db.instance_count(), self.db.coredump_count()) {
                        (Ok(instances), Ok(coredumps)) => {
                            debug!(instances, coredumps, "controller_stats_refreshed");
                        }
                        (Err(e), _) | (_, Err(e)) => {
                            warn!(error = %e, "controller_stats_refresh_failed");
                        }
                    }
                }
            }
        }
    }

    /// Best-effort snapshot, called during shutdown.
    pub fn save_snapshot(&self) -> Result<()> {
        let raw = serde_json::to_string(&*self.state_read())?;
        self.db.save_controller_snapshot(SNAPSHOT_KEY, &raw)?;
        info!("controller_state_saved");
        Ok(())
    }
}

fn open_task_count(state: &GlobalState) -> usize {
    state
        .cleanup_tasks
        .values()
        .filter(|t| t.status.is_open())
        .count()
}

/// Calendar-month rollover plus the one-hour rate window.
fn roll_counters(state: &mut GlobalState, now: DateTime<Utc>) {
    match state.last_monthly_reset {
        Some(last) if last.month() == now.month() && last.year() == now.year() => {}
        Some(_) => {
            info!(previous_cost = state.monthly_cost, "monthly_cost_reset");
            state.monthly_cost = 0.0;
            state.hourly_count = 0;
            state.last_monthly_reset = Some(now);
        }
        None => state.last_monthly_reset = Some(now),
    }

    match state.hourly_reset {
        Some(last) if now.signed_duration_since(last) >= chrono::Duration::hours(1) => {
            state.hourly_count = 0;
            state.hourly_reset = Some(now);
        }
        None => state.hourly_reset = Some(now),
        _ => {}
    }
}
