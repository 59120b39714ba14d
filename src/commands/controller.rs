use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use coredump_monitor::config::Config;
use coredump_monitor::controller::Controller;
use coredump_monitor::db::Database;
use coredump_monitor::server::{build_controller_router, serve};

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

pub async fn run(config_path: &str) -> Result<()> {
    let config = Config::load(Path::new(config_path))?;
    super::init_tracing(&config.agent.log_level);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.controller.listen_port));

    println!("Starting coredump-monitor controller...\n");
    println!(
        "  Monthly AI budget ........... ${:.2}",
        config.controller.max_cost_per_month
    );
    println!(
        "  Hourly AI limit ............. {}",
        config.controller.max_analysis_per_hour
    );
    println!(
        "  Cleanup threshold ........... {} restarts",
        config.controller.max_restart_count
    );
    println!("  Database .................... {}", config.database.path);
    println!("  HTTP server ................. http://{addr}");
    println!();
    println!("  Available endpoints:");
    println!("    POST /api/ai-analysis/request  LLM budget arbitration");
    println!("    POST /api/cleanup/request .... Cleanup lease arbitration");
    println!("    POST /api/heartbeat .......... Agent liveness");
    println!("    GET  /api/stats .............. Global state snapshot");
    println!("    GET  /healthz ................ Liveness probe");
    println!("    GET  /metrics ................ Prometheus metrics");
    println!();
    println!("Controller running. Press Ctrl+C to stop.\n");
    println!("{}", "=".repeat(70));

    let db = Arc::new(Database::open(Path::new(&config.database.path))?);
    let controller = Arc::new(Controller::new(config.controller.clone(), db.clone()));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    tokio::spawn(controller.clone().run_maintenance(shutdown_tx.subscribe()));
    tokio::spawn(controller.clone().run_agent_health(shutdown_tx.subscribe()));
    tokio::spawn(controller.clone().run_stats_refresh(shutdown_tx.subscribe()));

    // Periodic retention against the relational store.
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

    let router = build_controller_router(controller.clone());
    let http_handle = {
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { serve(router, addr, shutdown).await })
    };

    signal::ctrl_c().await?;
    info!("shutdown_signal_received");
    println!("\n{}", "=".repeat(70));
    println!("Shutdown signal received. Stopping controller...");

    let _ = shutdown_tx.send(());
    if let Err(e) = controller.save_snapshot() {
        warn!(error = %e, "snapshot_save_failed");
    }
    if tokio::time::timeout(SHUTDOWN_DEADLINE, http_handle).await.is_err() {
        warn!("http_server_drain_timed_out");
    }

    println!("Controller stopped.");
    Ok(())
}
