use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::controller::{
    AiAnalysisRequest, AiAnalysisResponse, CleanupRequest, CleanupResponse, HeartbeatRequest,
    HeartbeatResponse,
};
use crate::server::VersionInfo;

/* ============================= CLIENT ============================= */

/// Thin HTTP client for the controller's arbitration API. Transport errors
/// surface to callers, which degrade per their own policy: the analyzer
/// skips AI with a recorded reason, the cleaner defers and retries on the
/// next panic.
pub struct ControllerClient {
    base_url: String,
    http: reqwest::Client,
}

impl ControllerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<ControllerClient> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("cannot build controller HTTP client")?;
        Ok(ControllerClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn post_json<Req, Resp>(&self, path: &str, request: &Req) -> Result<Resp>
    where
        Req: serde::Serialize,
        Resp: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .with_context(|| format!("controller request to {path} failed"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("controller returned {status} for {path}");
        }
        response
            .json()
            .await
            .with_context(|| format!("controller response from {path} is not valid JSON"))
    }

    pub async fn request_ai_analysis(
        &self,
        node_name: &str,
        coredump_path: &str,
        value_score: f64,
        estimated_cost: f64,
    ) -> Result<AiAnalysisResponse> {
        self.post_json(
            "/api/ai-analysis/request",
            &AiAnalysisRequest {
                node_name: node_name.to_string(),
                coredump_path: coredump_path.to_string(),
                value_score,
                estimated_cost,
                priority: None,
            },
        )
        .await
    }

    pub async fn request_cleanup(
        &self,
        node_name: &str,
        instance_name: &str,
        namespace: &str,
        restart_count: u32,
        deployment_type: &str,
    ) -> Result<CleanupResponse> {
        self.post_json(
            "/api/cleanup/request",
            &CleanupRequest {
                node_name: node_name.to_string(),
                instance_name: instance_name.to_string(),
                namespace: namespace.to_string(),
                restart_count,
                deployment_type: deployment_type.to_string(),
            },
        )
        .await
    }

    pub async fn heartbeat(&self, node_name: &str) -> Result<HeartbeatResponse> {
        self.post_json(
            "/api/heartbeat",
            &HeartbeatRequest {
                node_name: node_name.to_string(),
                version: VersionInfo::current().version.to_string(),
                status: "active".to_string(),
            },
        )
        .await
    }
}

/* ============================= HEARTBEAT LOOP ============================= */

/// Periodic liveness ping. A missed beat is logged and retried next tick;
/// the controller marks us inactive on its own schedule.
pub async fn run_heartbeat_loop(
    client: Arc<ControllerClient>,
    node_name: String,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = ticker.tick() => {
                match client.heartbeat(&node_name).await {
                    Ok(response) => {
                        debug!(acknowledged = response.acknowledged, "heartbeat_sent");
                    }
                    Err(e) => {
                        warn!(error = %e, "heartbeat_failed");
                    }
                }
            }
        }
    }
}
