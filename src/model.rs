use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/* ============================= WORKLOAD INSTANCES ============================= */

/// How a workload instance is deployed, which decides how it is decommissioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentKind {
    /// Installed by a Helm release; removed via `helm uninstall`.
    #[serde(rename = "helm")]
    Helm,
    /// Managed by the operator; removed by label-selected deletion.
    #[serde(rename = "operator")]
    Operator,
}

impl DeploymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentKind::Helm => "helm",
            DeploymentKind::Operator => "operator",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Pending,
    Running,
    Failed,
    Terminating,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Running => "running",
            InstanceStatus::Failed => "failed",
            InstanceStatus::Terminating => "terminating",
        }
    }
}

/// A discovered Milvus deployment, owned by the discovery stage.
///
/// Everything downstream refers to instances by name only; pods are the only
/// child collection and the ownership is strictly one-way.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadInstance {
    pub name: String,
    pub namespace: String,
    pub kind: DeploymentKind,
    pub labels: HashMap<String, String>,
    pub status: InstanceStatus,
    pub discovered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub pods: Vec<PodInfo>,
}

impl WorkloadInstance {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub instance_name: String,
    pub restart_count: i32,
    pub last_restart: Option<DateTime<Utc>>,
    pub containers: Vec<ContainerStatusInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatusInfo {
    pub name: String,
    pub ready: bool,
    pub restart_count: i32,
    pub last_termination_reason: Option<String>,
    pub last_termination_message: Option<String>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

/* ============================= RESTART EVENTS ============================= */

/// Immutable record of one observed container restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartEvent {
    pub pod_name: String,
    pub namespace: String,
    pub container_name: String,
    pub restart_time: DateTime<Utc>,
    pub exit_code: i32,
    pub signal: i32,
    pub reason: String,
    pub message: String,
    pub instance_name: String,
    pub is_panic: bool,
}

/* ============================= COREDUMP FILES ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoredumpState {
    Discovered,
    Processing,
    Analyzed,
    Stored,
    Skipped,
    Error,
}

impl CoredumpState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoredumpState::Discovered => "discovered",
            CoredumpState::Processing => "processing",
            CoredumpState::Analyzed => "analyzed",
            CoredumpState::Stored => "stored",
            CoredumpState::Skipped => "skipped",
            CoredumpState::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<CoredumpState> {
        match s {
            "discovered" => Some(CoredumpState::Discovered),
            "processing" => Some(CoredumpState::Processing),
            "analyzed" => Some(CoredumpState::Analyzed),
            "stored" => Some(CoredumpState::Stored),
            "skipped" => Some(CoredumpState::Skipped),
            "error" => Some(CoredumpState::Error),
            _ => None,
        }
    }
}

/// One crash dump on disk, identified by its absolute path.
///
/// Each pipeline stage mutates only the state tag and its own sub-fields; the
/// record travels through the stages by value on bounded channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoredumpFile {
    pub path: String,
    pub filename: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,

    pub executable: String,
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
    pub signal: i32,
    pub timestamp: DateTime<Utc>,
    pub boot_id: Option<String>,

    pub pod_name: Option<String>,
    pub pod_namespace: Option<String>,
    pub container_name: Option<String>,
    pub instance_name: Option<String>,

    pub state: CoredumpState,
    pub value_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub analysis: Option<AnalysisResults>,
}

impl CoredumpFile {
    pub fn is_analyzed(&self) -> bool {
        self.analysis.is_some()
    }

    pub fn has_pod_association(&self) -> bool {
        self.pod_name.is_some() && self.instance_name.is_some()
    }
}

/* ============================= ANALYSIS RESULTS ============================= */

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySummary {
    pub virtual_kb: u64,
    pub resident_kb: u64,
    pub heap_kb: u64,
    pub stack_kb: u64,
}

/// Debugger-extracted evidence. Created once by the analyzer and never
/// mutated after emission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResults {
    pub stack_trace: String,
    pub crash_reason: String,
    pub crash_address: String,
    pub thread_count: u32,
    pub library_versions: HashMap<String, String>,
    pub registers: HashMap<String, String>,
    pub shared_libraries: Vec<String>,
    pub memory: MemorySummary,
    pub ai: Option<AIAnalysisResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionPriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSuggestion {
    pub file: String,
    pub function: String,
    pub line: u32,
    pub issue: String,
    pub suggestion: String,
    pub priority: SuggestionPriority,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AIAnalysisResult {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub analyzed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub impact: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub estimated_cost: f64,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub related_issues: Vec<String>,
    #[serde(default)]
    pub code_suggestions: Vec<CodeSuggestion>,
}

/* ============================= STAGE EVENTS ============================= */

#[derive(Debug, Clone)]
pub enum CollectionEvent {
    FileDiscovered(CoredumpFile),
    FileProcessed(CoredumpFile),
    FileSkipped { file: CoredumpFile, reason: String },
    FileError { file: CoredumpFile, error: String },
    RestartDetected(RestartEvent),
}

#[derive(Debug, Clone)]
pub enum AnalysisEvent {
    Complete(CoredumpFile),
    Skipped { file: CoredumpFile, reason: String },
    Error { file: CoredumpFile, error: String },
}

#[derive(Debug, Clone)]
pub enum StorageEvent {
    FileStored {
        file: CoredumpFile,
        stored_path: String,
        stored_size: u64,
    },
    FileDeleted {
        stored_path: String,
        reason: String,
    },
    Error {
        stored_path: String,
        error: String,
    },
}

/* ============================= CONTROLLER STATE ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::InProgress)
    }
}

/// One decommissioning lease held in the controller registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupTask {
    pub instance_name: String,
    pub namespace: String,
    pub restart_count: u32,
    pub scheduled_at: DateTime<Utc>,
    pub assigned_to: String,
    pub status: TaskStatus,
}

impl CleanupTask {
    pub fn task_id(&self) -> String {
        format!("{}/{}", self.namespace, self.instance_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Inactive,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Inactive => "inactive",
            AgentStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub last_heartbeat: DateTime<Utc>,
    pub version: String,
    pub status: AgentStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coredump_state_round_trip() {
        for state in [
            CoredumpState::Discovered,
            CoredumpState::Processing,
            CoredumpState::Analyzed,
            CoredumpState::Stored,
            CoredumpState::Skipped,
            CoredumpState::Error,
        ] {
            assert_eq!(CoredumpState::parse(state.as_str()), Some(state));
        }
        assert_eq!(CoredumpState::parse("bogus"), None);
    }

    #[test]
    fn test_task_id_is_namespace_scoped() {
        let task = CleanupTask {
            instance_name: "rel1".to_string(),
            namespace: "ns1".to_string(),
            restart_count: 3,
            scheduled_at: Utc::now(),
            assigned_to: "node-a".to_string(),
            status: TaskStatus::Pending,
        };
        assert_eq!(task.task_id(), "ns1/rel1");
        assert!(task.status.is_open());
    }

    #[test]
    fn test_ai_result_tolerates_partial_json() {
        let parsed: AIAnalysisResult =
            serde_json::from_str(r#"{"summary":"heap corruption","confidence":0.8}"#)
                .expect("partial AI payload should deserialize");
        assert_eq!(parsed.summary, "heap corruption");
        assert!(parsed.recommendations.is_empty());
        assert!(parsed.error_message.is_none());
    }
}
