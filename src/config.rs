use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Deserializer};

/* ============================= DURATION / SIZE PARSING ============================= */

/// Parse a human duration: `"30s"`, `"10m"`, `"24h"`, or a bare number of
/// seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        bail!("empty duration");
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    let (num, unit) = s.split_at(s.len() - 1);
    let value: u64 = num
        .trim()
        .parse()
        .with_context(|| format!("invalid duration: {s:?}"))?;
    match unit {
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        "d" => Ok(Duration::from_secs(value * 86400)),
        _ => bail!("invalid duration unit in {s:?} (expected s, m, h or d)"),
    }
}

/// Parse a storage size: `KB`, `MB`, `GB` suffixes (case-insensitive), bare
/// numbers are bytes.
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        bail!("empty size");
    }
    let upper = s.to_uppercase();
    let (num, mult) = if let Some(prefix) = upper.strip_suffix("KB") {
        (prefix, 1024u64)
    } else if let Some(prefix) = upper.strip_suffix("MB") {
        (prefix, 1024 * 1024)
    } else if let Some(prefix) = upper.strip_suffix("GB") {
        (prefix, 1024 * 1024 * 1024)
    } else {
        (upper.as_str(), 1)
    };
    let value: u64 = num
        .trim()
        .parse()
        .with_context(|| format!("invalid size: {s:?}"))?;
    Ok(value * mult)
}

fn de_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
    }
}

fn de_size<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bytes(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Bytes(n) => Ok(n),
        Raw::Text(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}

/* ============================= SECTIONS ============================= */

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    pub name: String,
    pub node_name: String,
    pub log_level: String,
    pub metrics_port: u16,
    pub health_port: u16,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "coredump-monitor".to_string(),
            node_name: String::new(),
            log_level: "info".to_string(),
            metrics_port: 9090,
            health_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerConfig {
    pub enabled: bool,
    pub url: String,
    #[serde(deserialize_with = "de_duration")]
    pub timeout: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub heartbeat_interval: Duration,
    pub listen_port: u16,
    pub max_cost_per_month: f64,
    pub max_analysis_per_hour: u32,
    pub max_restart_count: u32,
    pub cleanup_enabled: bool,
    pub ai_analysis_enabled: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://coredump-controller:8090".to_string(),
            timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(60),
            listen_port: 8090,
            max_cost_per_month: 100.0,
            max_analysis_per_hour: 10,
            max_restart_count: 3,
            cleanup_enabled: true,
            ai_analysis_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    #[serde(deserialize_with = "de_duration")]
    pub conn_max_lifetime: Duration,
    pub retention_days: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "/var/lib/coredump-monitor/monitor.db".to_string(),
            max_open_conns: 4,
            max_idle_conns: 2,
            conn_max_lifetime: Duration::from_secs(3600),
            retention_days: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscoveryConfig {
    #[serde(deserialize_with = "de_duration")]
    pub scan_interval: Duration,
    pub namespaces: Vec<String>,
    /// Labels that mark a pod as part of a Helm release, `key` or `key=value`.
    pub helm_release_labels: Vec<String>,
    /// Labels that mark a pod as operator-managed.
    pub operator_labels: Vec<String>,
    /// Pod labels consulted (in order) for the owning instance name.
    pub instance_name_labels: Vec<String>,
    /// Instances unseen for this long are dropped from the published map.
    #[serde(deserialize_with = "de_duration")]
    pub stale_after: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            namespaces: vec!["default".to_string()],
            helm_release_labels: vec![
                "app.kubernetes.io/name=milvus".to_string(),
                "helm.sh/chart".to_string(),
            ],
            operator_labels: vec!["milvus.io/operator".to_string()],
            instance_name_labels: vec![
                "app.kubernetes.io/instance".to_string(),
                "milvus.io/instance".to_string(),
            ],
            stale_after: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectorConfig {
    pub coredump_path: String,
    pub host_coredump_path: String,
    #[serde(deserialize_with = "de_duration")]
    pub watch_interval: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub max_file_age: Duration,
    #[serde(deserialize_with = "de_size")]
    pub max_file_size: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            coredump_path: "/host/coredumps".to_string(),
            host_coredump_path: "/var/lib/systemd/coredump".to_string(),
            watch_interval: Duration::from_secs(60),
            max_file_age: Duration::from_secs(24 * 3600),
            max_file_size: 2 * 1024 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AiAnalysisConfig {
    pub enabled: bool,
    pub provider: String,
    pub model: String,
    pub api_key: String,
    #[serde(rename = "baseURL")]
    pub base_url: String,
    #[serde(deserialize_with = "de_duration")]
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f64,
    pub enable_cost_control: bool,
    pub max_cost_per_month: f64,
    pub max_analysis_per_hour: u32,
}

impl Default for AiAnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "glm".to_string(),
            model: "glm-4".to_string(),
            api_key: String::new(),
            base_url: "https://open.bigmodel.cn/api/paas/v4/chat/completions".to_string(),
            timeout: Duration::from_secs(60),
            max_tokens: 2000,
            temperature: 0.3,
            enable_cost_control: true,
            max_cost_per_month: 100.0,
            max_analysis_per_hour: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyzerConfig {
    pub enable_gdb_analysis: bool,
    pub gdb_path: String,
    #[serde(deserialize_with = "de_duration")]
    pub gdb_timeout: Duration,
    pub value_threshold: f64,
    pub ignore_patterns: Vec<String>,
    pub panic_keywords: Vec<String>,
    pub ai_analysis: AiAnalysisConfig,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            enable_gdb_analysis: true,
            gdb_path: "gdb".to_string(),
            gdb_timeout: Duration::from_secs(120),
            value_threshold: 5.0,
            ignore_patterns: vec![],
            panic_keywords: vec![
                "panic".to_string(),
                "fatal".to_string(),
                "assert".to_string(),
                "segfault".to_string(),
                "sigsegv".to_string(),
                "abort".to_string(),
            ],
            ai_analysis: AiAnalysisConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    pub backend: String,
    pub local_path: String,
    #[serde(deserialize_with = "de_size")]
    pub max_storage_size: u64,
    pub retention_days: u32,
    pub compression_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "local".to_string(),
            local_path: "/var/lib/coredump-monitor/dumps".to_string(),
            max_storage_size: 50 * 1024 * 1024 * 1024,
            retention_days: 30,
            compression_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CleanerConfig {
    pub enabled: bool,
    pub max_restart_count: u32,
    #[serde(deserialize_with = "de_duration")]
    pub restart_time_window: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub cleanup_delay: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub uninstall_timeout: Duration,
    pub helm_path: String,
    /// Label key matched against the instance name when deleting
    /// operator-managed workloads.
    pub instance_label: String,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_restart_count: 3,
            restart_time_window: Duration::from_secs(600),
            cleanup_delay: Duration::from_secs(30),
            uninstall_timeout: Duration::from_secs(300),
            helm_path: "helm".to_string(),
            instance_label: "app.kubernetes.io/instance".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertingConfig {
    pub enabled: bool,
    pub webhook_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    pub prometheus_enabled: bool,
    pub alerting: AlertingConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            prometheus_enabled: true,
            alerting: AlertingConfig::default(),
        }
    }
}

/* ============================= ROOT ============================= */

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agent: AgentConfig,
    pub controller: ControllerConfig,
    pub database: DatabaseConfig,
    pub discovery: DiscoveryConfig,
    pub collector: CollectorConfig,
    pub analyzer: AnalyzerConfig,
    pub storage: StorageConfig,
    pub cleaner: CleanerConfig,
    pub monitor: MonitorConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let mut config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("cannot parse config file {}", path.display()))?;
        config.apply_env_fallbacks();
        config.validate()?;
        Ok(config)
    }

    /// Credentials left empty in the file fall back to provider-specific
    /// environment variables.
    fn apply_env_fallbacks(&mut self) {
        let ai = &mut self.analyzer.ai_analysis;
        if ai.api_key.is_empty() {
            let var = match ai.provider.as_str() {
                "glm" => "GLM_API_KEY",
                "openai" => "OPENAI_API_KEY",
                _ => return,
            };
            if let Ok(key) = std::env::var(var) {
                ai.api_key = key;
            }
        }
        if self.agent.node_name.is_empty()
            && let Ok(node) = std::env::var("NODE_NAME")
        {
            self.agent.node_name = node;
        }
    }

    /// Configuration errors are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if self.agent.metrics_port == 0 || self.agent.health_port == 0 {
            bail!("agent ports must be non-zero");
        }
        if self.discovery.namespaces.is_empty() {
            bail!("discovery.namespaces must name at least one namespace");
        }
        if self.discovery.scan_interval.is_zero() {
            bail!("discovery.scanInterval must be positive");
        }
        if self.collector.watch_interval.is_zero() {
            bail!("collector.watchInterval must be positive");
        }
        match self.storage.backend.as_str() {
            "local" => {}
            "object-store" | "network-fs" => {
                bail!(
                    "storage backend {:?} is not implemented in this build",
                    self.storage.backend
                );
            }
            other => bail!("unknown storage backend {other:?}"),
        }
        if self.cleaner.enabled {
            if self.cleaner.max_restart_count == 0 {
                bail!("cleaner.maxRestartCount must be positive");
            }
            if self.cleaner.restart_time_window.is_zero() {
                bail!("cleaner.restartTimeWindow must be positive");
            }
        }
        if self.analyzer.ai_analysis.enabled && self.analyzer.ai_analysis.api_key.is_empty() {
            bail!("analyzer.aiAnalysis.apiKey is required when AI analysis is enabled");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_parse_size_suffixes() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("4KB").unwrap(), 4096);
        assert_eq!(parse_size("2mb").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("100GB").unwrap(), 100 * 1024 * 1024 * 1024);
        assert!(parse_size("two").is_err());
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.max_storage_size, 50 * 1024 * 1024 * 1024);
        assert_eq!(config.analyzer.value_threshold, 5.0);
    }

    #[test]
    fn test_yaml_durations_and_sizes() {
        let yaml = r#"
discovery:
  scanInterval: 15s
  namespaces: [milvus]
collector:
  watchInterval: 2m
  maxFileSize: 1GB
cleaner:
  enabled: true
  restartTimeWindow: 10m
  cleanupDelay: 30
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.discovery.scan_interval, Duration::from_secs(15));
        assert_eq!(config.collector.watch_interval, Duration::from_secs(120));
        assert_eq!(config.collector.max_file_size, 1024 * 1024 * 1024);
        assert_eq!(config.cleaner.cleanup_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_unknown_backend_is_fatal() {
        let mut config = Config::default();
        config.storage.backend = "ceph".to_string();
        assert!(config.validate().is_err());
        config.storage.backend = "object-store".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ai_enabled_requires_key() {
        let mut config = Config::default();
        config.analyzer.ai_analysis.enabled = true;
        config.analyzer.ai_analysis.api_key = String::new();
        assert!(config.validate().is_err());
        config.analyzer.ai_analysis.api_key = "sk-test".to_string();
        assert!(config.validate().is_ok());
    }
}
