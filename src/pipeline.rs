use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use kube::Client;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::agent_client::{ControllerClient, run_heartbeat_loop};
use crate::analyzer::Analyzer;
use crate::cleaner::Cleaner;
use crate::collector::Collector;
use crate::config::Config;
use crate::db::Database;
use crate::discovery::{Discovery, new_instance_map};
use crate::metrics;
use crate::model::RestartEvent;
use crate::server::{AgentHttpState, build_agent_router, build_metrics_router, serve};
use crate::storage::{Storage, make_backend};

/// Every inter-stage queue is bounded at this depth; producers drop with a
/// warning when it fills.
pub const CHANNEL_CAPACITY: usize = 100;

/// HTTP servers get this long to drain on shutdown.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Restart events feed two independent consumers. Each gets its own bounded
/// queue so a slow cleaner cannot starve targeted collection.
async fn fan_out_restarts(
    mut restart_rx: mpsc::Receiver<RestartEvent>,
    collector_tx: mpsc::Sender<RestartEvent>,
    cleaner_tx: mpsc::Sender<RestartEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            event = restart_rx.recv() => {
                let Some(event) = event else { return };
                if let Err(e) = collector_tx.try_send(event.clone()) {
                    warn!(error = %e, "restart_event_dropped_for_collector");
                }
                if let Err(e) = cleaner_tx.try_send(event) {
                    warn!(error = %e, "restart_event_dropped_for_cleaner");
                }
            }
        }
    }
}

/// Wire and run the per-node pipeline: Discovery → Collector → Analyzer →
/// Storage → Cleaner, plus the agent HTTP server and the controller
/// heartbeat. Returns when the process is asked to stop or a stage dies.
pub async fn run_agent(config: Config) -> Result<()> {
    let db = Arc::new(Database::open(std::path::Path::new(&config.database.path))?);
    let client = Client::try_default()
        .await
        .context("cannot connect to the Kubernetes API")?;
    let instances = new_instance_map();

    let controller_client = if config.controller.enabled {
        Some(Arc::new(ControllerClient::new(
            &config.controller.url,
            config.controller.timeout,
        )?))
    } else {
        None
    };

    let backend = make_backend(&config.storage)?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    // One slot per top-level task so a dying stage can always report.
    let (err_tx, mut err_rx) = mpsc::channel::<anyhow::Error>(16);

    let (restart_tx, restart_rx) = mpsc::channel::<RestartEvent>(CHANNEL_CAPACITY);
    let (collector_restart_tx, collector_restart_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (cleaner_restart_tx, cleaner_restart_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (collection_tx, collection_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (analysis_tx, analysis_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (storage_tx, storage_rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(fan_out_restarts(
        restart_rx,
        collector_restart_tx,
        cleaner_restart_tx,
        shutdown_tx.subscribe(),
    ));

    let discovery = Arc::new(Discovery::new(
        client.clone(),
        config.discovery.clone(),
        db.clone(),
        instances.clone(),
        restart_tx,
    ));
    {
        let discovery = discovery.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { discovery.run_scan_loop(shutdown).await });
    }
    for namespace in &config.discovery.namespaces {
        let discovery = discovery.clone();
        let namespace = namespace.clone();
        let shutdown = shutdown_tx.subscribe();
        let err_tx = err_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = discovery.run_restart_watch(namespace, shutdown).await {
                let _ = err_tx.try_send(e);
            }
        });
    }

    let collector = Collector::new(
        config.collector.clone(),
        db.clone(),
        instances.clone(),
        collection_tx,
    );
    tokio::spawn(collector.run(collector_restart_rx, shutdown_tx.subscribe()));

    let analyzer = Arc::new(Analyzer::new(
        config.analyzer.clone(),
        db.clone(),
        config.agent.node_name.clone(),
        controller_client.clone(),
        analysis_tx,
    ));
    tokio::spawn(analyzer.run(collection_rx, shutdown_tx.subscribe()));

    let storage = Storage::new(
        config.storage.clone(),
        config.analyzer.value_threshold,
        backend,
        db.clone(),
        storage_tx,
    );
    tokio::spawn(storage.run(analysis_rx, shutdown_tx.subscribe()));

    let cleaner = Arc::new(Cleaner::new(
        config.cleaner.clone(),
        client,
        db.clone(),
        controller_client.clone(),
        instances,
        config.agent.node_name.clone(),
    ));
    tokio::spawn(cleaner.run(cleaner_restart_rx, storage_rx, shutdown_tx.subscribe()));

    if let Some(controller_client) = controller_client {
        tokio::spawn(run_heartbeat_loop(
            controller_client,
            config.agent.node_name.clone(),
            config.controller.heartbeat_interval,
            shutdown_tx.subscribe(),
        ));
    }

    let ready = Arc::new(AtomicBool::new(false));
    let router = build_agent_router(AgentHttpState {
        ready: ready.clone(),
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.agent.health_port));
    let http_handle = {
        let shutdown = shutdown_tx.subscribe();
        let err_tx = err_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = serve(router, addr, shutdown).await {
                let _ = err_tx.try_send(e);
            }
        })
    };

    if config.monitor.prometheus_enabled && config.agent.metrics_port != config.agent.health_port {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.agent.metrics_port));
        let shutdown = shutdown_tx.subscribe();
        let err_tx = err_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = serve(build_metrics_router(), metrics_addr, shutdown).await {
                let _ = err_tx.try_send(e);
            }
        });
    }

    // Event records age out of the relational store on a slow cycle; the
    // filesystem stays the source of truth.
    {
        let db = db.clone();
        let retention_days = config.database.retention_days;
        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(6 * 3600));
            loop {
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = ticker.tick() => {
                        match db.cleanup_old_records(retention_days) {
                            Ok(deleted) if deleted > 0 => {
                                info!(deleted, "old_records_cleaned");
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "record_cleanup_failed"),
                        }
                    }
                }
            }
        });
    }

    // All stages are running.
    ready.store(true, Ordering::SeqCst);
    metrics::UP.set(1);
    info!(node = %config.agent.node_name, "agent_started");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown_signal_received");
        }
        error = err_rx.recv() => {
            if let Some(error) = error {
                warn!(error = %error, "stage_failed_shutting_down");
            }
        }
    }

    metrics::UP.set(0);
    let _ = shutdown_tx.send(());
    if tokio::time::timeout(SHUTDOWN_DEADLINE, http_handle).await.is_err() {
        warn!("http_server_drain_timed_out");
    }
    info!("agent_stopped");
    Ok(())
}
