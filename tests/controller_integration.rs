use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use coredump_monitor::config::ControllerConfig;
use coredump_monitor::controller::Controller;
use coredump_monitor::db::Database;
use coredump_monitor::server::build_controller_router;

// ══════════════════════════════════════════════════════════════════
// Controller API integration tests (no cluster required)
//
// Drives the arbitration HTTP surface end to end: budget denials,
// cleanup lease exclusivity, heartbeat liveness, and the error
// behaviour for malformed bodies.
// ══════════════════════════════════════════════════════════════════

fn make_router(config: ControllerConfig) -> (Router, Arc<Controller>) {
    let db = Arc::new(Database::open_in_memory().expect("in-memory db"));
    let controller = Arc::new(Controller::new(config, db));
    (build_controller_router(controller.clone()), controller)
}

async fn post_json(router: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn ai_body(cost: f64) -> Value {
    json!({
        "nodeName": "node-a",
        "coredumpPath": "/dumps/core.milvus.1000.1700000000.12345",
        "valueScore": 8.5,
        "estimatedCost": cost
    })
}

fn cleanup_body(node: &str, restarts: u32) -> Value {
    json!({
        "nodeName": node,
        "instanceName": "rel1",
        "namespace": "ns1",
        "restartCount": restarts,
        "deploymentType": "helm"
    })
}

#[tokio::test]
async fn test_healthz_always_ok() {
    let (router, _) = make_router(ControllerConfig::default());
    let response = router
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_ai_request_approved_and_counted() {
    let (router, controller) = make_router(ControllerConfig::default());
    let (status, body) = post_json(&router, "/api/ai-analysis/request", ai_body(0.5)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);
    assert!((body["remainingCost"].as_f64().unwrap() - 99.5).abs() < 1e-9);

    let stats = controller.stats();
    assert!((stats.global.monthly_cost - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_ai_request_denied_over_monthly_budget() {
    // Monthly budget nearly exhausted: 99.90 of 100.00 spent.
    let (router, _) = make_router(ControllerConfig::default());
    let (status, body) = post_json(&router, "/api/ai-analysis/request", ai_body(99.90)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);

    let (_, denied) = post_json(&router, "/api/ai-analysis/request", ai_body(0.20)).await;
    assert_eq!(denied["allowed"], false);
    assert!((denied["remainingCost"].as_f64().unwrap() - 0.10).abs() < 1e-9);
    assert!(
        denied["reason"].as_str().unwrap().contains("$0.10"),
        "denial carries the remaining budget: {}",
        denied["reason"]
    );
}

#[tokio::test]
async fn test_cleanup_lease_exclusive_across_agents() {
    let (router, _) = make_router(ControllerConfig::default());

    let (status, first) = post_json(&router, "/api/cleanup/request", cleanup_body("node-a", 3)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["allowed"], true);
    assert_eq!(first["taskId"], "ns1/rel1");

    // A concurrent second agent is denied and told who holds the lease.
    let (_, second) = post_json(&router, "/api/cleanup/request", cleanup_body("node-b", 3)).await;
    assert_eq!(second["allowed"], false);
    assert_eq!(second["assignedTo"], "node-a");
}

#[tokio::test]
async fn test_cleanup_denied_below_global_threshold() {
    let (router, _) = make_router(ControllerConfig {
        max_restart_count: 5,
        ..Default::default()
    });
    let (_, body) = post_json(&router, "/api/cleanup/request", cleanup_body("node-a", 3)).await;
    assert_eq!(body["allowed"], false);
}

#[tokio::test]
async fn test_heartbeat_then_stats_reports_agent() {
    let (router, controller) = make_router(ControllerConfig {
        heartbeat_interval: Duration::from_secs(60),
        ..Default::default()
    });
    let (status, body) = post_json(
        &router,
        "/api/heartbeat",
        json!({"nodeName": "node-a", "version": "0.1.0", "status": "active"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["acknowledged"], true);

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/api/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let stats: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(stats["agents"]["node-a"]["status"], "active");

    // Silence past 2x the heartbeat interval flips the agent to inactive.
    let later = chrono::Utc::now() + chrono::Duration::seconds(130);
    controller.agent_health_tick(later);
    assert_eq!(
        serde_json::to_value(controller.stats().agents["node-a"].status).unwrap(),
        "inactive"
    );
}

#[tokio::test]
async fn test_malformed_body_is_client_error() {
    let (router, _) = make_router(ControllerConfig::default());
    let request = Request::builder()
        .method("POST")
        .uri("/api/ai-analysis/request")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_controller_gauges() {
    let (router, _) = make_router(ControllerConfig::default());
    let _ = post_json(&router, "/api/ai-analysis/request", ai_body(0.5)).await;

    let response = router
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("coredump_monitor_controller_ai_cost_monthly"));
}
